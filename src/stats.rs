use std::{collections::VecDeque, sync::Mutex, time::Duration};

use serde::Serialize;

/// Default number of recent requests kept for the rolling statistics.
pub const DEFAULT_STATS_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Sample {
    stage1: Duration,
    stage2: Duration,
    total: Duration,
}

#[derive(Debug)]
struct Ring {
    samples: VecDeque<Sample>,
    capacity: usize,
    lifetime_count: u64,
}

/// Rolling latency statistics shared by all requests of a process.
///
/// The lock is held only to push or copy samples; aggregation happens on the
/// copy.
#[derive(Debug)]
pub struct StatsWindow {
    ring: Mutex<Ring>,
}

/// Aggregates over the current window. `count` is lifetime, the rest cover
/// only the retained samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub count: u64,
    pub window: usize,
    #[serde(serialize_with = "crate::search::serialize_secs")]
    pub mean_total: Duration,
    #[serde(serialize_with = "crate::search::serialize_secs")]
    pub p95_total: Duration,
    #[serde(serialize_with = "crate::search::serialize_secs")]
    pub mean_stage1: Duration,
    #[serde(serialize_with = "crate::search::serialize_secs")]
    pub mean_stage2: Duration,
}

impl Default for StatsWindow {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_WINDOW)
    }
}

impl StatsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                lifetime_count: 0,
            }),
        }
    }

    /// Append one completed request, evicting the oldest sample when full.
    pub fn record(&self, stage1: Duration, stage2: Duration, total: Duration) {
        // A poisoned lock only means another recorder panicked mid-push; the
        // ring itself is still consistent.
        let mut ring = self
            .ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if ring.samples.len() == ring.capacity {
            ring.samples.pop_front();
        }
        ring.samples.push_back(Sample {
            stage1,
            stage2,
            total,
        });
        ring.lifetime_count += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (samples, count) = {
            let ring = self
                .ring
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (
                ring.samples.iter().copied().collect::<Vec<_>>(),
                ring.lifetime_count,
            )
        };

        if samples.is_empty() {
            return StatsSnapshot {
                count,
                ..Default::default()
            };
        }

        let mean = |f: fn(&Sample) -> Duration| {
            samples.iter().map(f).sum::<Duration>() / samples.len() as u32
        };

        let mut totals: Vec<Duration> =
            samples.iter().map(|s| s.total).collect();
        totals.sort_unstable();
        // Nearest-rank percentile.
        let rank = (totals.len() * 95).div_ceil(100).max(1);

        StatsSnapshot {
            count,
            window: samples.len(),
            mean_total: mean(|s| s.total),
            p95_total: totals[rank - 1],
            mean_stage1: mean(|s| s.stage1),
            mean_stage2: mean(|s| s.stage2),
        }
    }
}

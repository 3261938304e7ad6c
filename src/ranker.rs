use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, hash_map::Entry},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    item::{Candidate, ItemKind, RankedResult},
    text_util,
};

/// How raw scores from the merged pool are mapped onto `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `(score - min) / (max - min)`; all `1.0` when every score is equal.
    #[default]
    MinMax,
    /// `clamp((z + 3) / 6, 0, 1)` with `z = (score - mean) / stddev`;
    /// all `0.5` when the deviation is zero.
    ZScore,
    /// Scores are copied unchanged.
    None,
}

/// z-scores beyond this many deviations clamp to 0 or 1.
const Z_CLAMP: f32 = 3.0;

impl Normalization {
    pub fn as_str(self) -> &'static str {
        match self {
            Normalization::MinMax => "min_max",
            Normalization::ZScore => "z_score",
            Normalization::None => "none",
        }
    }

    /// Normalize a pool of scores, preserving positions.
    pub fn apply(self, scores: &[f32]) -> Vec<f32> {
        if scores.is_empty() {
            return Vec::new();
        }

        match self {
            Normalization::None => scores.to_vec(),
            Normalization::MinMax => {
                let (min, max) = scores.iter().fold(
                    (f32::INFINITY, f32::NEG_INFINITY),
                    |(lo, hi), &s| (lo.min(s), hi.max(s)),
                );
                let range = max - min;
                if range == 0.0 {
                    return vec![1.0; scores.len()];
                }
                scores
                    .iter()
                    .map(|s| ((s - min) / range).clamp(0.0, 1.0))
                    .collect()
            }
            Normalization::ZScore => {
                let n = scores.len() as f32;
                let mean = scores.iter().sum::<f32>() / n;
                let variance =
                    scores.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
                let stddev = variance.sqrt();
                if stddev == 0.0 {
                    return vec![0.5; scores.len()];
                }
                scores
                    .iter()
                    .map(|s| {
                        let z = (s - mean) / stddev;
                        ((z + Z_CLAMP) / (2.0 * Z_CLAMP)).clamp(0.0, 1.0)
                    })
                    .collect()
            }
        }
    }
}

impl FromStr for Normalization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min_max" | "min-max" => Ok(Normalization::MinMax),
            "z_score" | "z-score" => Ok(Normalization::ZScore),
            "none" => Ok(Normalization::None),
            other => {
                Err(Error::Config(format!("unknown normalization '{other}'")))
            }
        }
    }
}

/// Descending score, then ascending id.
pub fn result_order(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// Merges per-collection candidate lists into one ranked response list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultRanker {
    normalization: Normalization,
}

impl ResultRanker {
    pub fn new(normalization: Normalization) -> Self {
        Self { normalization }
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Pool, deduplicate, normalize across the whole pool, attach
    /// highlights, sort, and keep the best `n_results`. Candidates whose
    /// score is NaN or infinite never reach the pool.
    pub fn merge(
        &self,
        query: &str,
        per_collection: BTreeMap<ItemKind, Vec<Candidate>>,
        n_results: usize,
    ) -> Vec<RankedResult> {
        let pool = dedupe(per_collection);

        let raw: Vec<f32> = pool.iter().map(|c| c.score).collect();
        let normalized = self.normalization.apply(&raw);

        let mut results: Vec<RankedResult> = pool
            .into_iter()
            .zip(normalized)
            .map(|(c, normalized_score)| {
                let highlights = match (c.kind, &c.metadata.text_preview) {
                    (ItemKind::Text, Some(text)) => {
                        text_util::highlights(query, text)
                    }
                    _ => Vec::new(),
                };
                RankedResult {
                    id: c.id,
                    doc_id: c.doc_id,
                    kind: c.kind,
                    score: c.score,
                    normalized_score,
                    stage1_score: c.stage1_score,
                    reranked: c.reranked,
                    metadata: c.metadata,
                    highlights,
                }
            })
            .collect();

        results.sort_by(result_order);
        results.truncate(n_results);
        results
    }
}

/// Concatenate collections in key order, keeping the higher-scoring copy of
/// any repeated id. On equal scores the earlier collection wins.
fn dedupe(per_collection: BTreeMap<ItemKind, Vec<Candidate>>) -> Vec<Candidate> {
    let mut pool: Vec<Candidate> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    let scored = per_collection
        .into_values()
        .flatten()
        .filter(|c| c.score.is_finite());
    for candidate in scored {
        match positions.entry(candidate.id.clone()) {
            Entry::Occupied(slot) => {
                let existing = &mut pool[*slot.get()];
                if candidate.score > existing.score {
                    *existing = candidate;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(pool.len());
                pool.push(candidate);
            }
        }
    }

    pool
}

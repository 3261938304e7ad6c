use std::{str::FromStr, time::Duration};

use crate::{
    codec::CodecKind,
    config_db::ConfigDb,
    error::{Error, Result},
    model_manager::DEFAULT_MODEL_DIMENSION,
    ranker::Normalization,
    reranker::Similarity,
    retriever::DEFAULT_CANDIDATE_K,
    stats::DEFAULT_STATS_WINDOW,
};

/// Embedding width of the default ColBERT model.
pub const DEFAULT_DIMENSION: usize = DEFAULT_MODEL_DIMENSION;
/// Roughly one hundred tokens of English text.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 400;

pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_millis(500);
pub const DEFAULT_STAGE1_BUDGET: Duration = Duration::from_millis(200);
pub const DEFAULT_STAGE2_BUDGET: Duration = Duration::from_millis(100);

/// Setting keys accepted by [`SearchConfig::load`] and `config set`.
pub const SETTING_KEYS: &[&str] = &[
    "dimension",
    "max_query_length",
    "candidate_k",
    "rerank_candidates",
    "request_deadline_ms",
    "stage1_budget_ms",
    "stage2_budget_ms",
    "normalization",
    "similarity",
    "codec",
    "stats_window",
    "model",
];

/// Tunables for one [`SearchEngine`](crate::SearchEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub dimension: usize,
    pub max_query_length: usize,
    /// Stage-1 breadth per collection.
    pub candidate_k: usize,
    /// Stage-2 bound per collection; `None` reranks every candidate.
    pub rerank_candidates: Option<usize>,
    pub request_deadline: Duration,
    pub stage1_budget: Duration,
    pub stage2_budget: Duration,
    pub normalization: Normalization,
    pub similarity: Similarity,
    pub codec: CodecKind,
    pub stats_window: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            candidate_k: DEFAULT_CANDIDATE_K,
            rerank_candidates: None,
            request_deadline: DEFAULT_REQUEST_DEADLINE,
            stage1_budget: DEFAULT_STAGE1_BUDGET,
            stage2_budget: DEFAULT_STAGE2_BUDGET,
            normalization: Normalization::default(),
            similarity: Similarity::default(),
            codec: CodecKind::default(),
            stats_window: DEFAULT_STATS_WINDOW,
        }
    }
}

impl SearchConfig {
    /// Layer stored settings over the defaults.
    pub fn load(db: &ConfigDb) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in db.list_settings()? {
            config.apply(&key, &value)?;
        }
        Ok(config)
    }

    /// Set one field from its textual setting.
    ///
    /// `model` is accepted and ignored here; it only selects the embedder.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "dimension" => self.dimension = positive(key, value)?,
            "max_query_length" => self.max_query_length = positive(key, value)?,
            "candidate_k" => self.candidate_k = positive(key, value)?,
            "rerank_candidates" => {
                self.rerank_candidates = match value {
                    "" | "all" => None,
                    _ => Some(positive(key, value)?),
                };
            }
            "request_deadline_ms" => self.request_deadline = millis(key, value)?,
            "stage1_budget_ms" => self.stage1_budget = millis(key, value)?,
            "stage2_budget_ms" => self.stage2_budget = millis(key, value)?,
            "normalization" => self.normalization = value.parse()?,
            "similarity" => self.similarity = value.parse()?,
            "codec" => self.codec = value.parse()?,
            "stats_window" => self.stats_window = positive(key, value)?,
            "model" => {}
            other => {
                return Err(Error::Config(format!(
                    "unknown setting '{other}' (expected one of: {})",
                    SETTING_KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Effective values in [`SETTING_KEYS`] order, excluding `model`.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dimension", self.dimension.to_string()),
            ("max_query_length", self.max_query_length.to_string()),
            ("candidate_k", self.candidate_k.to_string()),
            (
                "rerank_candidates",
                self.rerank_candidates
                    .map_or_else(|| "all".to_string(), |n| n.to_string()),
            ),
            (
                "request_deadline_ms",
                self.request_deadline.as_millis().to_string(),
            ),
            ("stage1_budget_ms", self.stage1_budget.as_millis().to_string()),
            ("stage2_budget_ms", self.stage2_budget.as_millis().to_string()),
            ("normalization", self.normalization.as_str().to_string()),
            ("similarity", self.similarity.as_str().to_string()),
            ("codec", self.codec.as_str().to_string()),
            ("stats_window", self.stats_window.to_string()),
        ]
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("invalid value '{value}' for setting '{key}'"))
    })
}

fn positive(key: &str, value: &str) -> Result<usize> {
    match parse::<usize>(key, value)? {
        0 => Err(Error::Config(format!("setting '{key}' must be positive"))),
        n => Ok(n),
    }
}

fn millis(key: &str, value: &str) -> Result<Duration> {
    positive(key, value).map(|ms| Duration::from_millis(ms as u64))
}

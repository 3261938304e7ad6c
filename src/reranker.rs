use std::{
    collections::HashMap,
    str::FromStr,
    sync::Arc,
    time::Instant,
};

use candle_core::Tensor;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    codec::EmbeddingCodec,
    embedding::MultiVectorEmbedding,
    error::{Error, Result},
    item::{Candidate, ItemKind},
    store::VectorStore,
};

/// Per-vector similarity used inside MaxSim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// Rows are L2-normalized before the dot product.
    #[default]
    Cosine,
    /// Raw dot product, for embeddings that are already normalized.
    Dot,
}

impl Similarity {
    pub fn as_str(self) -> &'static str {
        match self {
            Similarity::Cosine => "cosine",
            Similarity::Dot => "dot",
        }
    }
}

impl FromStr for Similarity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Similarity::Cosine),
            "dot" => Ok(Similarity::Dot),
            other => {
                Err(Error::Config(format!("unknown similarity '{other}'")))
            }
        }
    }
}

/// Candidates after the second stage.
#[derive(Debug)]
pub struct RerankOutcome {
    /// Same candidates, same order; `score` replaced where `reranked`.
    pub candidates: Vec<Candidate>,
    /// Some candidates were left unscored because the deadline passed.
    pub timed_out: bool,
}

/// Stage-2 late-interaction re-ranker.
pub struct Reranker {
    store: Arc<dyn VectorStore>,
    codec: Arc<dyn EmbeddingCodec>,
    similarity: Similarity,
}

impl Reranker {
    pub fn new(
        store: Arc<dyn VectorStore>,
        codec: Arc<dyn EmbeddingCodec>,
        similarity: Similarity,
    ) -> Self {
        Self {
            store,
            codec,
            similarity,
        }
    }

    /// Replace each candidate's score with its MaxSim score against `query`.
    ///
    /// 1. Fetch full embeddings with one batch call per collection
    /// 2. Decode and score candidates in parallel on the rayon pool
    /// 3. Keep the stage-1 score for any candidate whose blob is missing,
    ///    undecodable, or unscorable, or that is reached after `deadline`
    pub fn rerank(
        &self,
        query: &MultiVectorEmbedding,
        candidates: Vec<Candidate>,
        deadline: Option<Instant>,
    ) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome {
                candidates,
                timed_out: false,
            };
        }

        let query_tensor = match prepare(query, self.similarity) {
            Ok(t) => t,
            Err(e) => {
                warn!("cannot prepare query for reranking: {e}");
                return RerankOutcome {
                    candidates,
                    timed_out: false,
                };
            }
        };

        let blobs = self.fetch_blobs(&candidates);
        let expired = |now: Instant| deadline.is_some_and(|d| now >= d);

        let scored: Vec<(Candidate, bool)> = candidates
            .into_par_iter()
            .map(|mut candidate| {
                if expired(Instant::now()) {
                    return (candidate, true);
                }

                let Some(blob) = blobs
                    .get(&candidate.kind)
                    .and_then(|m| m.get(&candidate.id))
                else {
                    debug!(id = %candidate.id, "no full embedding, keeping stage 1 score");
                    return (candidate, false);
                };

                match self.score_blob(&query_tensor, query.dimension(), blob) {
                    Ok(score) => {
                        candidate.score = score;
                        candidate.reranked = true;
                    }
                    Err(e) => {
                        warn!(id = %candidate.id, "reranking failed, keeping stage 1 score: {e}");
                    }
                }
                (candidate, false)
            })
            .collect();

        let timed_out = scored.iter().any(|(_, skipped)| *skipped);
        RerankOutcome {
            candidates: scored.into_iter().map(|(c, _)| c).collect(),
            timed_out,
        }
    }

    fn fetch_blobs(
        &self,
        candidates: &[Candidate],
    ) -> HashMap<ItemKind, HashMap<String, Vec<u8>>> {
        let mut ids: HashMap<ItemKind, Vec<String>> = HashMap::new();
        for c in candidates {
            ids.entry(c.kind).or_default().push(c.id.clone());
        }

        ids.into_iter()
            .map(|(kind, ids)| {
                let blobs = match self.store.get_full_embeddings(kind, &ids) {
                    Ok(blobs) => blobs,
                    Err(e) => {
                        warn!(collection = %kind, "full embedding fetch failed: {e}");
                        HashMap::new()
                    }
                };
                debug!(collection = %kind, requested = ids.len(), found = blobs.len(), "fetched full embeddings");
                (kind, blobs)
            })
            .collect()
    }

    fn score_blob(
        &self,
        query: &Tensor,
        dimension: usize,
        blob: &[u8],
    ) -> Result<f32> {
        let doc = self.codec.decompress(blob)?;
        if doc.dimension() != dimension {
            return Err(Error::Scoring(format!(
                "candidate dimension {} does not match query dimension {dimension}",
                doc.dimension()
            )));
        }
        maxsim(query, &prepare(&doc, self.similarity)?)
    }
}

/// MaxSim between two multi-vector embeddings under `similarity`.
///
/// `(1/m) * sum over query vectors of max over doc vectors of sim(q, d)`,
/// where `m` is the number of query vectors.
pub fn late_interaction_score(
    query: &MultiVectorEmbedding,
    doc: &MultiVectorEmbedding,
    similarity: Similarity,
) -> Result<f32> {
    if query.dimension() != doc.dimension() {
        return Err(Error::Scoring(format!(
            "dimension mismatch: query {} vs doc {}",
            query.dimension(),
            doc.dimension()
        )));
    }
    maxsim(&prepare(query, similarity)?, &prepare(doc, similarity)?)
}

/// Build the `[n, D]` tensor used for scoring, L2-normalizing rows for
/// cosine similarity. Zero rows stay zero.
fn prepare(
    embedding: &MultiVectorEmbedding,
    similarity: Similarity,
) -> Result<Tensor> {
    let tensor = embedding.to_tensor()?;
    match similarity {
        Similarity::Dot => Ok(tensor),
        Similarity::Cosine => {
            let norms = tensor
                .sqr()
                .and_then(|t| t.sum_keepdim(1))
                .and_then(|t| t.sqrt())
                .and_then(|t| t.maximum(1e-12f32))
                .map_err(map_candle_err)?;
            tensor.broadcast_div(&norms).map_err(map_candle_err)
        }
    }
}

/// query: [Q, D], doc: [T, D]. Mean over query rows of the row-wise max of
/// `query @ doc^T`.
fn maxsim(query: &Tensor, doc: &Tensor) -> Result<f32> {
    let sim_matrix = query
        .matmul(&doc.t().map_err(map_candle_err)?)
        .map_err(map_candle_err)?;

    // Best document vector per query vector: [Q]
    let row_maxes = sim_matrix.max(1).map_err(map_candle_err)?;

    let score = row_maxes
        .mean_all()
        .map_err(map_candle_err)?
        .to_scalar::<f32>()
        .map_err(map_candle_err)?;

    if !score.is_finite() {
        return Err(Error::Scoring(format!("non-finite score {score}")));
    }
    Ok(score)
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::Scoring(format!("tensor computation error: {e}"))
}

use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::{
    config::SearchConfig,
    embedder::QueryEmbedder,
    embedding::MultiVectorEmbedding,
    error::{Error, Result},
    filters::Filters,
    item::{Candidate, ItemKind, RankedResult},
    query::QueryProcessor,
    ranker::{Normalization, ResultRanker},
    reranker::Reranker,
    retriever::{CollectionOutcome, Retriever},
    stats::{StatsSnapshot, StatsWindow},
    store::VectorStore,
};

pub const DEFAULT_N_RESULTS: usize = 10;

/// Which collections take part in a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Hybrid,
    VisualOnly,
    TextOnly,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::VisualOnly => "visual_only",
            SearchMode::TextOnly => "text_only",
        }
    }

    pub fn collections(self) -> &'static [ItemKind] {
        match self {
            SearchMode::Hybrid => &ItemKind::ALL,
            SearchMode::VisualOnly => &[ItemKind::Visual],
            SearchMode::TextOnly => &[ItemKind::Text],
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hybrid" => Ok(SearchMode::Hybrid),
            "visual_only" | "visual-only" => Ok(SearchMode::VisualOnly),
            "text_only" | "text-only" => Ok(SearchMode::TextOnly),
            other => {
                Err(Error::Config(format!("unknown search mode '{other}'")))
            }
        }
    }
}

/// One call to [`SearchEngine::search`].
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub n_results: usize,
    pub search_mode: SearchMode,
    pub filters: Filters,
    pub enable_reranking: bool,
    /// Per-collection Stage-2 bound; falls back to the engine setting.
    pub rerank_candidates: Option<usize>,
    /// Overrides the engine's normalization for this request only.
    pub normalization: Option<Normalization>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            n_results: DEFAULT_N_RESULTS,
            search_mode: SearchMode::default(),
            filters: Filters::default(),
            enable_reranking: true,
            rerank_candidates: None,
            normalization: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
    pub total_results: usize,
    pub query: String,
    pub search_mode: SearchMode,
    #[serde(serialize_with = "serialize_secs")]
    pub stage1_time: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub stage2_time: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub total_time: Duration,
    /// Stage-1 candidates from collections that answered.
    pub candidates_retrieved: usize,
    /// Candidates whose score came from MaxSim.
    pub reranked_count: usize,
    /// At least one requested collection failed at Stage-1.
    pub partial: bool,
    /// A stage ran out of time and the result is best-effort.
    pub timed_out: bool,
}

/// Durations serialize as fractional seconds.
pub fn serialize_secs<S: Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Request lifecycle, logged as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Received,
    Embedding,
    Stage1,
    Stage2,
    Merging,
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Received => "received",
            Phase::Embedding => "embedding",
            Phase::Stage1 => "stage1",
            Phase::Stage2 => "stage2",
            Phase::Merging => "merging",
            Phase::Completed => "completed",
        };
        f.write_str(name)
    }
}

fn enter(phase: &mut Phase, next: Phase) {
    debug!(from = %phase, to = %next, "search phase");
    *phase = next;
}

struct Stage1 {
    per_collection: BTreeMap<ItemKind, Vec<Candidate>>,
    candidates_retrieved: usize,
    partial: bool,
    timed_out: bool,
}

struct Stage2 {
    per_collection: BTreeMap<ItemKind, Vec<Candidate>>,
    reranked_count: usize,
    timed_out: bool,
}

/// Two-stage search over the visual and text collections of one store.
///
/// All request state is local to [`search`](Self::search); the only shared
/// mutable state is the statistics window. Wrap in an `Arc` to serve
/// concurrent requests.
pub struct SearchEngine {
    config: SearchConfig,
    processor: QueryProcessor,
    retriever: Retriever,
    reranker: Arc<Reranker>,
    ranker: ResultRanker,
    stats: Arc<StatsWindow>,
}

impl SearchEngine {
    pub fn new(
        config: SearchConfig,
        embedder: Arc<dyn QueryEmbedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let processor = QueryProcessor::new(
            embedder,
            config.dimension,
            config.max_query_length,
        );
        let reranker = Reranker::new(
            Arc::clone(&store),
            config.codec.build(),
            config.similarity,
        );

        Self {
            processor,
            retriever: Retriever::new(store),
            reranker: Arc::new(reranker),
            ranker: ResultRanker::new(config.normalization),
            stats: Arc::new(StatsWindow::new(config.stats_window)),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one request through embedding, both stages, and merging.
    ///
    /// Invalid input and total Stage-1 failure are errors. Partial
    /// collection failure, per-candidate Stage-2 failure, and timeouts all
    /// yield a response, flagged through `partial`, `timed_out`, and each
    /// result's `reranked`.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let mut phase = Phase::Received;

        match self.execute(&request, started, &mut phase).await {
            Ok(response) => {
                enter(&mut phase, Phase::Completed);
                self.stats.record(
                    response.stage1_time,
                    response.stage2_time,
                    response.total_time,
                );
                info!(
                    mode = %response.search_mode,
                    results = response.total_results,
                    candidates = response.candidates_retrieved,
                    reranked = response.reranked_count,
                    partial = response.partial,
                    timed_out = response.timed_out,
                    total_ms = response.total_time.as_millis() as u64,
                    "search completed"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(failed_in = %phase, "search failed: {e}");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: &SearchRequest,
        started: Instant,
        phase: &mut Phase,
    ) -> Result<SearchResponse> {
        let deadline = started + self.config.request_deadline;

        // Everything below may touch the store, so reject bad input first.
        request.filters.validate()?;
        let query_text = self.processor.validate(&request.query)?.to_string();
        if request.n_results == 0 {
            return Err(Error::InvalidQuery(
                "n_results must be at least 1".to_string(),
            ));
        }

        enter(phase, Phase::Embedding);
        let query = self.embed(&query_text, request.search_mode).await?;

        enter(phase, Phase::Stage1);
        let stage1_started = Instant::now();
        let stage1 = self.stage1(request, &query, deadline).await?;
        let stage1_time = stage1_started.elapsed();

        let stage2_started = Instant::now();
        let stage2 = if request.enable_reranking {
            enter(phase, Phase::Stage2);
            self.stage2(request, query, stage1.per_collection, deadline)
                .await
        } else {
            debug!("reranking disabled");
            Stage2 {
                per_collection: stage1.per_collection,
                reranked_count: 0,
                timed_out: false,
            }
        };
        let stage2_time = if request.enable_reranking {
            stage2_started.elapsed()
        } else {
            Duration::ZERO
        };

        enter(phase, Phase::Merging);
        let ranker = request
            .normalization
            .map_or(self.ranker, ResultRanker::new);
        let results =
            ranker.merge(&query_text, stage2.per_collection, request.n_results);

        Ok(SearchResponse {
            total_results: results.len(),
            results,
            query: query_text,
            search_mode: request.search_mode,
            stage1_time,
            stage2_time,
            total_time: started.elapsed(),
            candidates_retrieved: stage1.candidates_retrieved,
            reranked_count: stage2.reranked_count,
            partial: stage1.partial,
            timed_out: stage1.timed_out || stage2.timed_out,
        })
    }

    async fn embed(
        &self,
        query_text: &str,
        search_mode: SearchMode,
    ) -> Result<MultiVectorEmbedding> {
        let processor = self.processor.clone();
        let text = query_text.to_string();
        tokio::task::spawn_blocking(move || processor.process(&text, search_mode))
            .await
            .map_err(|e| {
                Error::EmbeddingFailure(format!("embedding task failed: {e}"))
            })?
    }

    async fn stage1(
        &self,
        request: &SearchRequest,
        query: &MultiVectorEmbedding,
        deadline: Instant,
    ) -> Result<Stage1> {
        let collections = request.search_mode.collections();
        let budget = self
            .config
            .stage1_budget
            .min(deadline.saturating_duration_since(Instant::now()));

        let outcomes = self
            .retriever
            .retrieve(
                Arc::from(query.representative()),
                collections,
                self.config.candidate_k,
                &request.filters,
                budget,
            )
            .await;

        let mut per_collection = BTreeMap::new();
        let mut failures = Vec::new();
        let mut timed_out = false;
        for (collection, outcome) in outcomes {
            match outcome {
                CollectionOutcome::Candidates(candidates) => {
                    per_collection.insert(collection, candidates);
                }
                CollectionOutcome::Failed(e) => failures.push(e.to_string()),
                CollectionOutcome::TimedOut => timed_out = true,
            }
        }

        if failures.len() == collections.len() {
            return Err(Error::Retrieval(failures.join("; ")));
        }

        let candidates_retrieved = per_collection.values().map(Vec::len).sum();
        debug!(
            candidates_retrieved,
            failed = failures.len(),
            timed_out,
            "stage 1 joined"
        );

        Ok(Stage1 {
            per_collection,
            candidates_retrieved,
            partial: !failures.is_empty(),
            timed_out,
        })
    }

    /// Rerank the top `rerank_candidates` of each collection; the rest keep
    /// their Stage-1 scores.
    async fn stage2(
        &self,
        request: &SearchRequest,
        query: MultiVectorEmbedding,
        per_collection: BTreeMap<ItemKind, Vec<Candidate>>,
        deadline: Instant,
    ) -> Stage2 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("request deadline exhausted before stage 2, skipping rerank");
            return Stage2 {
                per_collection,
                reranked_count: 0,
                timed_out: true,
            };
        }

        let bound = request
            .rerank_candidates
            .or(self.config.rerank_candidates)
            .unwrap_or(self.config.candidate_k)
            .min(self.config.candidate_k);

        let mut pending = Vec::new();
        let mut kept: BTreeMap<ItemKind, Vec<Candidate>> = BTreeMap::new();
        for (collection, mut candidates) in per_collection {
            // Stage-1 lists arrive sorted best-first.
            let rest = candidates.split_off(bound.min(candidates.len()));
            pending.extend(candidates);
            kept.insert(collection, rest);
        }

        if pending.is_empty() {
            return Stage2 {
                per_collection: kept,
                reranked_count: 0,
                timed_out: false,
            };
        }

        let stage2_deadline =
            Instant::now() + self.config.stage2_budget.min(remaining);
        let fallback = pending.clone();
        let reranker = Arc::clone(&self.reranker);
        let task = tokio::task::spawn_blocking(move || {
            reranker.rerank(&query, pending, Some(stage2_deadline))
        });

        let (scored, timed_out) = match tokio::time::timeout(remaining, task)
            .await
        {
            Ok(Ok(outcome)) => (outcome.candidates, outcome.timed_out),
            Ok(Err(e)) => {
                warn!("stage 2 task failed, keeping stage 1 scores: {e}");
                (fallback, false)
            }
            Err(_) => {
                warn!(?remaining, "stage 2 overran the request deadline");
                (fallback, true)
            }
        };

        let reranked_count = scored.iter().filter(|c| c.reranked).count();
        for candidate in scored {
            kept.entry(candidate.kind).or_default().push(candidate);
        }

        Stage2 {
            per_collection: kept,
            reranked_count,
            timed_out,
        }
    }
}

impl fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{CodecKind, EmbeddingCodec},
        embedder::HashingEmbedder,
        item::{ItemMetadata, StoredItem},
        store::MemoryStore,
    };

    const DIM: usize = 16;

    fn config() -> SearchConfig {
        SearchConfig {
            dimension: DIM,
            request_deadline: Duration::from_secs(10),
            stage1_budget: Duration::from_secs(5),
            stage2_budget: Duration::from_secs(5),
            ..SearchConfig::default()
        }
    }

    fn engine(store: MemoryStore) -> SearchEngine {
        SearchEngine::new(
            config(),
            Arc::new(HashingEmbedder::new(DIM, 7)),
            Arc::new(store),
        )
    }

    fn put_text(store: &MemoryStore, id: &str, text: &str) {
        let embedder = HashingEmbedder::new(DIM, 7);
        let embedding = embedder.embed_text(text).unwrap();
        store
            .put(StoredItem {
                id: id.to_string(),
                doc_id: "doc1".to_string(),
                kind: ItemKind::Text,
                representative: embedding.representative().to_vec(),
                compressed: CodecKind::F32.build().compress(&embedding),
                metadata: ItemMetadata {
                    filename: "report.pdf".to_string(),
                    page: 1,
                    text_preview: Some(text.to_string()),
                    ..ItemMetadata::default()
                },
            })
            .unwrap();
    }

    #[test]
    fn search_mode_selects_collections() {
        assert_eq!(SearchMode::Hybrid.collections().len(), 2);
        assert_eq!(SearchMode::TextOnly.collections(), &[ItemKind::Text]);
        assert_eq!(
            "visual-only".parse::<SearchMode>().unwrap(),
            SearchMode::VisualOnly
        );
        assert!("both".parse::<SearchMode>().is_err());
    }

    #[tokio::test]
    async fn exact_match_ranks_first_after_rerank() {
        let store = MemoryStore::new();
        put_text(&store, "t1", "revenue grew strongly");
        put_text(&store, "t2", "weather forecast sunny");
        let engine = engine(store);

        let response = engine
            .search(SearchRequest::new("revenue grew strongly"))
            .await
            .unwrap();

        assert_eq!(response.results[0].id, "t1");
        assert!((response.results[0].score - 1.0).abs() < 1e-5);
        assert!(response.results[0].reranked);
        assert_eq!(response.reranked_count, 2);
        assert!(!response.partial && !response.timed_out);
    }

    #[tokio::test]
    async fn rerank_bound_leaves_tail_unscored() {
        let store = MemoryStore::new();
        for (id, text) in [
            ("a", "alpha beta"),
            ("b", "beta gamma"),
            ("c", "gamma delta"),
        ] {
            put_text(&store, id, text);
        }
        let engine = engine(store);

        let mut request = SearchRequest::new("alpha beta");
        request.rerank_candidates = Some(1);
        let response = engine.search(request).await.unwrap();

        assert_eq!(response.candidates_retrieved, 3);
        assert_eq!(response.reranked_count, 1);
        let unscored: Vec<_> =
            response.results.iter().filter(|r| !r.reranked).collect();
        assert_eq!(unscored.len(), 2);
        assert!(unscored.iter().all(|r| r.score == r.stage1_score));
    }

    #[tokio::test]
    async fn zero_results_requested_is_invalid() {
        let engine = engine(MemoryStore::new());
        let mut request = SearchRequest::new("revenue");
        request.n_results = 0;
        let err = engine.search(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn stats_count_completed_requests_only() {
        let store = MemoryStore::new();
        put_text(&store, "t1", "revenue");
        let engine = engine(store);

        engine.search(SearchRequest::new("revenue")).await.unwrap();
        engine.search(SearchRequest::new("   ")).await.unwrap_err();

        assert_eq!(engine.stats().count, 1);
    }

    #[test]
    fn response_serializes_durations_as_seconds() {
        let response = SearchResponse {
            results: Vec::new(),
            total_results: 0,
            query: "q".to_string(),
            search_mode: SearchMode::TextOnly,
            stage1_time: Duration::from_millis(250),
            stage2_time: Duration::ZERO,
            total_time: Duration::from_millis(500),
            candidates_retrieved: 0,
            reranked_count: 0,
            partial: false,
            timed_out: false,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["stage1_time"], 0.25);
        assert_eq!(json["stage2_time"], 0.0);
        assert_eq!(json["search_mode"], "text_only");
    }
}

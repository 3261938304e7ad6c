use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use pagebert::{
    Error, Filters, Result, SearchConfig, SearchEngine, SearchMode,
    SearchRequest,
    codec::CodecKind,
    embedder::HashingEmbedder,
    item::{ItemKind, ItemMetadata, StoredItem},
    ranker::{Normalization, result_order},
    store::{MemoryStore, StoreHit, VectorStore},
};
use tokio::task::JoinSet;

const DIM: usize = 32;
const SEED: u64 = 11;
const SLOW: Duration = Duration::from_millis(400);

/// One text per page; only page 3 contains every query token.
const PAGES: [&str; 10] = [
    "annual revenue summary",
    "growth outlook for next year",
    "quarterly revenue growth",
    "board members and governance",
    "quarterly dividend policy",
    "regional revenue breakdown",
    "employee headcount growth",
    "risk factors and litigation",
    "cash flow statement",
    "auditor report and opinion",
];

#[derive(Default)]
struct TestStore {
    inner: MemoryStore,
    failing: Vec<ItemKind>,
    slow_search: Vec<ItemKind>,
    fetch_delay: Option<Duration>,
    searches: AtomicUsize,
    fetches: AtomicUsize,
}

impl VectorStore for TestStore {
    fn search(
        &self,
        collection: ItemKind,
        query_repr: &[f32],
        k: usize,
        filters: &Filters,
    ) -> Result<Vec<StoreHit>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&collection) {
            return Err(Error::Retrieval(format!("{collection} unavailable")));
        }
        if self.slow_search.contains(&collection) {
            std::thread::sleep(SLOW);
        }
        self.inner.search(collection, query_repr, k, filters)
    }

    fn get_full_embeddings(
        &self,
        collection: ItemKind,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            std::thread::sleep(delay);
        }
        self.inner.get_full_embeddings(collection, ids)
    }
}

fn stored(
    id: &str,
    kind: ItemKind,
    text: &str,
    page: u32,
    codec: CodecKind,
) -> StoredItem {
    let embedding = HashingEmbedder::new(DIM, SEED).embed_text(text).unwrap();
    let text_preview = (kind == ItemKind::Text).then(|| text.to_string());
    StoredItem {
        id: id.to_string(),
        doc_id: "doc1".to_string(),
        kind,
        representative: embedding.representative().to_vec(),
        compressed: codec.build().compress(&embedding),
        metadata: ItemMetadata {
            filename: "report.pdf".to_string(),
            page,
            chunk_id: (kind == ItemKind::Text).then_some(page),
            text_preview,
            ..ItemMetadata::default()
        },
    }
}

/// Ten visual pages and ten text chunks, one of each per page.
fn corpus(store: &TestStore, codec: CodecKind) {
    for (i, text) in PAGES.iter().enumerate() {
        let page = i as u32 + 1;
        store
            .inner
            .put(stored(
                &format!("doc1-page{page:03}"),
                ItemKind::Visual,
                text,
                page,
                codec,
            ))
            .unwrap();
        store
            .inner
            .put(stored(
                &format!("doc1-chunk{page:03}"),
                ItemKind::Text,
                text,
                page,
                codec,
            ))
            .unwrap();
    }
}

fn relaxed_config() -> SearchConfig {
    SearchConfig {
        dimension: DIM,
        request_deadline: Duration::from_secs(30),
        stage1_budget: Duration::from_secs(10),
        stage2_budget: Duration::from_secs(10),
        ..SearchConfig::default()
    }
}

fn engine_with(store: TestStore, config: SearchConfig) -> (Arc<TestStore>, SearchEngine) {
    let store = Arc::new(store);
    let engine = SearchEngine::new(
        config,
        Arc::new(HashingEmbedder::new(DIM, SEED)),
        Arc::clone(&store) as Arc<dyn VectorStore>,
    );
    (store, engine)
}

fn engine(store: TestStore) -> (Arc<TestStore>, SearchEngine) {
    engine_with(store, relaxed_config())
}

fn full_store() -> TestStore {
    let store = TestStore::default();
    corpus(&store, CodecKind::F32);
    store
}

#[tokio::test]
async fn hybrid_results_are_bounded_sorted_and_typed() {
    let (store, engine) = engine(full_store());

    let response = engine
        .search(SearchRequest::new("quarterly revenue growth"))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert!(response.results.len() <= 10);
    assert_eq!(response.total_results, response.results.len());
    assert_eq!(response.candidates_retrieved, 20);
    assert_eq!(response.search_mode, SearchMode::Hybrid);
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
        assert_ne!(
            result_order(&pair[0], &pair[1]),
            std::cmp::Ordering::Greater
        );
    }
    for r in &response.results {
        assert!(matches!(r.kind, ItemKind::Visual | ItemKind::Text));
        assert!((0.0..=1.0).contains(&r.normalized_score));
    }
    // One batch fetch per collection, not one per candidate.
    assert_eq!(store.searches.load(Ordering::SeqCst), 2);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn single_collection_reranks_with_one_fetch() {
    let (store, engine) = engine(full_store());

    let mut request = SearchRequest::new("quarterly revenue growth");
    request.search_mode = SearchMode::VisualOnly;
    let response = engine.search(request).await.unwrap();

    assert_eq!(response.candidates_retrieved, 10);
    assert_eq!(response.reranked_count, 10);
    assert_eq!(store.searches.load(Ordering::SeqCst), 1);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exact_page_match_normalizes_to_one() {
    let store = full_store();
    // The same id in the text collection, with a weaker match.
    store
        .inner
        .put(stored(
            "doc1-page003",
            ItemKind::Text,
            "revenue tables",
            3,
            CodecKind::F32,
        ))
        .unwrap();
    let (_store, engine) = engine(store);

    let response = engine
        .search(SearchRequest::new("quarterly revenue growth"))
        .await
        .unwrap();

    let top = &response.results[0];
    assert!(top.id == "doc1-page003" || top.id == "doc1-chunk003");
    let page = response
        .results
        .iter()
        .find(|r| r.id == "doc1-page003")
        .unwrap();
    assert_eq!(page.kind, ItemKind::Visual);
    assert!(page.reranked);
    assert!((page.score - 1.0).abs() < 1e-5);
    assert!((page.normalized_score - 1.0).abs() < 1e-5);
    assert_eq!(
        response
            .results
            .iter()
            .filter(|r| r.id == "doc1-page003")
            .count(),
        1
    );
}

#[tokio::test]
async fn empty_query_fails_before_any_store_call() {
    let (store, engine) = engine(full_store());

    for query in ["", "    "] {
        let err = engine.search(SearchRequest::new(query)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    assert_eq!(store.searches.load(Ordering::SeqCst), 0);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_filters_fail_before_any_store_call() {
    let (store, engine) = engine(full_store());

    let mut request = SearchRequest::new("revenue");
    request.filters = Filters {
        page_range: Some(pagebert::filters::PageRange { min: 9, max: 2 }),
        ..Filters::default()
    };
    let err = engine.search(request).await.unwrap_err();

    assert!(matches!(err, Error::InvalidFilter(_)));
    assert_eq!(store.searches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn page_range_filter_limits_results() {
    let (_store, engine) = engine(full_store());

    let mut request = SearchRequest::new("quarterly revenue growth");
    request.n_results = 50;
    request.filters =
        Filters::parse(r#"{"page_range": {"min": 1, "max": 5}}"#).unwrap();
    let response = engine.search(request).await.unwrap();

    assert_eq!(response.results.len(), 10);
    assert!(
        response
            .results
            .iter()
            .all(|r| (1..=5).contains(&r.metadata.page))
    );
}

#[tokio::test]
async fn disabled_reranking_keeps_stage1_scores() {
    let (store, engine) = engine(full_store());

    let mut request = SearchRequest::new("quarterly revenue growth");
    request.enable_reranking = false;
    let response = engine.search(request).await.unwrap();

    assert_eq!(response.stage2_time, Duration::ZERO);
    assert_eq!(response.reranked_count, 0);
    for r in &response.results {
        assert_eq!(r.score, r.stage1_score);
        assert!(!r.reranked);
    }
    assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_failed_collection_gives_partial_response() {
    let store = TestStore {
        failing: vec![ItemKind::Visual],
        ..TestStore::default()
    };
    corpus(&store, CodecKind::F32);
    let (_store, engine) = engine(store);

    let response = engine
        .search(SearchRequest::new("quarterly revenue growth"))
        .await
        .unwrap();

    assert!(response.partial);
    assert!(!response.timed_out);
    assert_eq!(response.candidates_retrieved, 10);
    assert!(response.results.iter().all(|r| r.kind == ItemKind::Text));
}

#[tokio::test]
async fn every_collection_failing_is_fatal() {
    let store = TestStore {
        failing: ItemKind::ALL.to_vec(),
        ..TestStore::default()
    };
    corpus(&store, CodecKind::F32);
    let (_store, engine) = engine(store);

    let err = engine
        .search(SearchRequest::new("revenue"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Retrieval(msg) if msg.contains("unavailable")));
    assert_eq!(engine.stats().count, 0);
}

#[tokio::test]
async fn single_mode_failure_is_fatal() {
    let store = TestStore {
        failing: vec![ItemKind::Text],
        ..TestStore::default()
    };
    corpus(&store, CodecKind::F32);
    let (_store, engine) = engine(store);

    let mut request = SearchRequest::new("revenue");
    request.search_mode = SearchMode::TextOnly;
    assert!(matches!(
        engine.search(request).await.unwrap_err(),
        Error::Retrieval(_)
    ));

    let mut request = SearchRequest::new("revenue");
    request.search_mode = SearchMode::VisualOnly;
    let response = engine.search(request).await.unwrap();
    assert!(!response.partial);
    assert!(response.results.iter().all(|r| r.kind == ItemKind::Visual));
}

#[tokio::test]
async fn slow_collection_times_out_without_failing() {
    let store = TestStore {
        slow_search: vec![ItemKind::Visual],
        ..TestStore::default()
    };
    corpus(&store, CodecKind::F32);
    let config = SearchConfig {
        stage1_budget: Duration::from_millis(100),
        ..relaxed_config()
    };
    let (_store, engine) = engine_with(store, config);

    let response = engine
        .search(SearchRequest::new("quarterly revenue growth"))
        .await
        .unwrap();

    assert!(response.timed_out);
    assert!(!response.partial);
    assert_eq!(response.candidates_retrieved, 10);
    assert!(response.results.iter().all(|r| r.kind == ItemKind::Text));
}

#[tokio::test]
async fn slow_rerank_falls_back_to_stage1_scores() {
    let store = TestStore {
        fetch_delay: Some(SLOW),
        ..TestStore::default()
    };
    corpus(&store, CodecKind::F32);
    let config = SearchConfig {
        request_deadline: Duration::from_millis(250),
        stage1_budget: Duration::from_millis(100),
        stage2_budget: Duration::from_millis(50),
        ..relaxed_config()
    };
    let (_store, engine) = engine_with(store, config);

    let response = engine
        .search(SearchRequest::new("quarterly revenue growth"))
        .await
        .unwrap();

    assert!(response.timed_out);
    assert_eq!(response.reranked_count, 0);
    assert!(!response.results.is_empty());
    for r in &response.results {
        assert_eq!(r.score, r.stage1_score);
    }
}

#[tokio::test]
async fn int8_blobs_rerank_close_to_exact() {
    let store = TestStore::default();
    corpus(&store, CodecKind::Int8);
    let config = SearchConfig {
        codec: CodecKind::Int8,
        ..relaxed_config()
    };
    let (_store, engine) = engine_with(store, config);

    let mut request = SearchRequest::new("quarterly revenue growth");
    request.search_mode = SearchMode::VisualOnly;
    let response = engine.search(request).await.unwrap();

    assert_eq!(response.results[0].id, "doc1-page003");
    assert!((response.results[0].score - 1.0).abs() < 0.02);
    assert_eq!(response.reranked_count, 10);
}

#[tokio::test]
async fn mismatched_codec_downgrades_every_candidate() {
    let store = TestStore::default();
    corpus(&store, CodecKind::Int8);
    let (_store, engine) = engine(store);

    let response = engine
        .search(SearchRequest::new("quarterly revenue growth"))
        .await
        .unwrap();

    assert_eq!(response.reranked_count, 0);
    assert_eq!(response.candidates_retrieved, 20);
    assert!(response.results.iter().all(|r| r.score == r.stage1_score));
}

#[tokio::test]
async fn normalization_override_applies_per_request() {
    let (_store, engine) = engine(full_store());

    let mut request = SearchRequest::new("quarterly revenue growth");
    request.normalization = Some(Normalization::None);
    let response = engine.search(request).await.unwrap();

    for r in &response.results {
        assert_eq!(r.normalized_score, r.score);
    }
}

#[tokio::test]
async fn concurrent_requests_agree() {
    let (_store, engine) = engine(full_store());
    let engine = Arc::new(engine);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            engine
                .search(SearchRequest::new("quarterly revenue growth"))
                .await
                .unwrap()
                .results
        });
    }

    let mut all = Vec::new();
    while let Some(results) = tasks.join_next().await {
        all.push(results.unwrap());
    }

    assert!(all.windows(2).all(|pair| pair[0] == pair[1]));
    let stats = engine.stats();
    assert_eq!(stats.count, 8);
    assert!(stats.p95_total >= stats.mean_stage1);
}

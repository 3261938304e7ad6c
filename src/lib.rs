//! pagebert - two-stage multi-vector search over document pages and text
//! chunks.
//!
//! A query is embedded into token-level vectors, Stage-1 searches each
//! collection (visual pages, text chunks) by a single representative vector,
//! and Stage-2 re-scores the survivors with
//! [ColBERT](https://github.com/stanford-futuredata/ColBERT)-style late
//! interaction (MaxSim) over their full embeddings. Results from both
//! collections are normalized over one pool and merged into a single ranking.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pagebert::{
//!     ConfigDb, DataDir, EmbeddingDb, SearchConfig, SearchEngine,
//!     SearchRequest,
//!     model_manager::{ColbertEmbedder, ModelManager, resolve_model_id},
//! };
//!
//! # async fn run() -> pagebert::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let config_db = ConfigDb::open(&data_dir.config_db())?;
//! let config = SearchConfig::load(&config_db)?;
//! let model = ModelManager::with_model_id(resolve_model_id(None, &config_db)?);
//!
//! let engine = SearchEngine::new(
//!     config,
//!     Arc::new(ColbertEmbedder::new(model)),
//!     Arc::new(EmbeddingDb::open(&data_dir.store_db())?),
//! );
//!
//! let response = engine.search(SearchRequest::new("quarterly revenue")).await?;
//! for r in &response.results {
//!     println!("{} [{}] {:.3}", r.id, r.kind, r.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod embedder;
pub mod embedding;
pub mod embedding_db;
pub mod error;
pub mod filters;
pub mod ingestion;
pub mod item;
pub mod model_manager;
pub mod query;
pub mod ranker;
pub mod reranker;
pub mod retriever;
pub mod search;
pub mod stats;
pub mod store;
pub mod text_util;

pub use config::SearchConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use embedding::MultiVectorEmbedding;
pub use embedding_db::EmbeddingDb;
pub use error::{Error, Result};
pub use filters::Filters;
pub use search::{SearchEngine, SearchMode, SearchRequest, SearchResponse};

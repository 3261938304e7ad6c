use std::sync::Arc;

use tracing::debug;

use crate::{
    embedder::QueryEmbedder,
    embedding::MultiVectorEmbedding,
    error::{Error, Result},
    search::SearchMode,
};

/// Validates raw query text and turns it into a checked multi-vector
/// embedding.
#[derive(Clone)]
pub struct QueryProcessor {
    embedder: Arc<dyn QueryEmbedder>,
    dimension: usize,
    max_query_length: usize,
}

impl QueryProcessor {
    pub fn new(
        embedder: Arc<dyn QueryEmbedder>,
        dimension: usize,
        max_query_length: usize,
    ) -> Self {
        Self {
            embedder,
            dimension,
            max_query_length,
        }
    }

    /// Trim the query and check its length, without touching the embedder.
    ///
    /// Length is counted in characters after trimming.
    pub fn validate<'q>(&self, raw_query: &'q str) -> Result<&'q str> {
        let query = raw_query.trim();
        if query.is_empty() {
            return Err(Error::InvalidQuery("query is empty".to_string()));
        }

        let length = query.chars().count();
        if length > self.max_query_length {
            return Err(Error::InvalidQuery(format!(
                "query is {length} characters, limit is {}",
                self.max_query_length
            )));
        }

        Ok(query)
    }

    /// Validate, embed once, and check the embedding dimension.
    ///
    /// Embedder errors surface as [`Error::EmbeddingFailure`] and are not
    /// retried here.
    pub fn process(
        &self,
        raw_query: &str,
        search_mode: SearchMode,
    ) -> Result<MultiVectorEmbedding> {
        let query = self.validate(raw_query)?;
        debug!(%search_mode, chars = query.chars().count(), "embedding query");

        let embedding = self.embedder.embed_query(query).map_err(|e| match e {
            Error::EmbeddingFailure(_) => e,
            other => Error::EmbeddingFailure(other.to_string()),
        })?;

        if embedding.dimension() != self.dimension {
            return Err(Error::EmbeddingShape {
                expected: self.dimension,
                found: embedding.dimension(),
            });
        }

        debug!(vectors = embedding.num_vectors(), "query embedded");
        Ok(embedding)
    }
}

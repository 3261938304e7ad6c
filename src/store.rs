use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

use tracing::warn;

use crate::{
    embedding::cosine,
    error::{Error, Result},
    filters::Filters,
    item::{ItemKind, ItemMetadata, StoredItem},
};

/// One approximate-search hit returned by a [`VectorStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub doc_id: String,
    pub score: f32,
    pub metadata: ItemMetadata,
}

/// Read contract the search core needs from the vector store.
///
/// Each [`ItemKind`] is a separate collection. Implementations must be safe
/// to call from several threads at once; the core never writes.
pub trait VectorStore: Send + Sync {
    /// Top-`k` hits for `query_repr` among items matching `filters`,
    /// best first. A missing or empty collection yields an empty list.
    fn search(
        &self,
        collection: ItemKind,
        query_repr: &[f32],
        k: usize,
        filters: &Filters,
    ) -> Result<Vec<StoreHit>>;

    /// Compressed full embeddings for `ids`, in one round trip. Ids without
    /// a stored blob are simply absent from the map.
    fn get_full_embeddings(
        &self,
        collection: ItemKind,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>>;
}

/// Order hits best first, breaking score ties by id, and keep `k`.
/// Hits with a NaN or infinite score are dropped.
pub(crate) fn rank_hits(mut hits: Vec<StoreHit>, k: usize) -> Vec<StoreHit> {
    hits.retain(|hit| hit.score.is_finite());
    hits.sort_by(|a, b| {
        b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}

/// In-process store scanning every representative vector. Useful for small
/// corpora and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<ItemKind, BTreeMap<String, StoredItem>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an item in the collection named by its kind.
    pub fn put(&self, item: StoredItem) -> Result<()> {
        let mut collections = self.collections.write().map_err(|_| {
            Error::Retrieval("memory store lock poisoned".to_string())
        })?;
        collections
            .entry(item.kind)
            .or_default()
            .insert(item.id.clone(), item);
        Ok(())
    }

    pub fn batch_put(&self, items: Vec<StoredItem>) -> Result<()> {
        for item in items {
            self.put(item)?;
        }
        Ok(())
    }

    pub fn count(&self, collection: ItemKind) -> Result<usize> {
        let collections = self.collections.read().map_err(|_| {
            Error::Retrieval("memory store lock poisoned".to_string())
        })?;
        Ok(collections.get(&collection).map_or(0, BTreeMap::len))
    }
}

impl VectorStore for MemoryStore {
    fn search(
        &self,
        collection: ItemKind,
        query_repr: &[f32],
        k: usize,
        filters: &Filters,
    ) -> Result<Vec<StoreHit>> {
        let collections = self.collections.read().map_err(|_| {
            Error::Retrieval("memory store lock poisoned".to_string())
        })?;
        let Some(items) = collections.get(&collection) else {
            return Ok(Vec::new());
        };

        let hits = items
            .values()
            .filter(|item| filters.matches(&item.doc_id, &item.metadata))
            .filter(|item| {
                let matches = item.representative.len() == query_repr.len();
                if !matches {
                    warn!(
                        %collection,
                        id = item.id.as_str(),
                        stored = item.representative.len(),
                        query = query_repr.len(),
                        "representative dimension mismatch, skipping"
                    );
                }
                matches
            })
            .map(|item| StoreHit {
                id: item.id.clone(),
                doc_id: item.doc_id.clone(),
                score: cosine(query_repr, &item.representative),
                metadata: item.metadata.clone(),
            })
            .collect();

        Ok(rank_hits(hits, k))
    }

    fn get_full_embeddings(
        &self,
        collection: ItemKind,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>> {
        let collections = self.collections.read().map_err(|_| {
            Error::Retrieval("memory store lock poisoned".to_string())
        })?;
        let Some(items) = collections.get(&collection) else {
            return Ok(HashMap::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| {
                items.get(id).map(|item| (id.clone(), item.compressed.clone()))
            })
            .collect())
    }
}

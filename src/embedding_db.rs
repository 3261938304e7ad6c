use std::{collections::HashMap, path::Path};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    embedding::cosine,
    error::Result,
    filters::Filters,
    item::{ItemKind, ItemMetadata, StoredItem},
    store::{StoreHit, VectorStore, rank_hits},
};

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

const VISUAL_REPR: Table = TableDefinition::new("visual_repr");
const VISUAL_META: Table = TableDefinition::new("visual_meta");
const VISUAL_FULL: Table = TableDefinition::new("visual_full");
const TEXT_REPR: Table = TableDefinition::new("text_repr");
const TEXT_META: Table = TableDefinition::new("text_meta");
const TEXT_FULL: Table = TableDefinition::new("text_full");

/// The three tables backing one collection.
struct CollectionTables {
    /// id -> representative vector, f32 LE.
    repr: Table,
    /// id -> JSON [`MetaRecord`].
    meta: Table,
    /// id -> compressed full embedding, opaque to the store.
    full: Table,
}

fn tables(kind: ItemKind) -> CollectionTables {
    match kind {
        ItemKind::Visual => CollectionTables {
            repr: VISUAL_REPR,
            meta: VISUAL_META,
            full: VISUAL_FULL,
        },
        ItemKind::Text => CollectionTables {
            repr: TEXT_REPR,
            meta: TEXT_META,
            full: TEXT_FULL,
        },
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaRecord {
    doc_id: String,
    metadata: ItemMetadata,
}

/// Persistent vector store on a single redb file.
///
/// Search is an exhaustive cosine scan over representative vectors with the
/// filter predicate evaluated inside the scan, so `k` is never spent on
/// items the filter would drop.
pub struct EmbeddingDb {
    db: Database,
}

impl EmbeddingDb {
    /// Open or create a store at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use pagebert::{EmbeddingDb, item::ItemKind};
    ///
    /// let db = EmbeddingDb::open(&tmp.path().join("store.redb")).unwrap();
    /// assert_eq!(db.count(ItemKind::Visual).unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        for kind in ItemKind::ALL {
            let t = tables(kind);
            txn.open_table(t.repr)?;
            txn.open_table(t.meta)?;
            txn.open_table(t.full)?;
        }
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store one item, replacing any previous item with the same id.
    pub fn put(&self, item: &StoredItem) -> Result<()> {
        self.batch_put(std::slice::from_ref(item))
    }

    /// Store multiple items in a single transaction.
    pub fn batch_put(&self, items: &[StoredItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin_write()?;
        for kind in ItemKind::ALL {
            let t = tables(kind);
            let mut repr = txn.open_table(t.repr)?;
            let mut meta = txn.open_table(t.meta)?;
            let mut full = txn.open_table(t.full)?;

            for item in items.iter().filter(|i| i.kind == kind) {
                let record = serde_json::to_vec(&MetaRecord {
                    doc_id: item.doc_id.clone(),
                    metadata: item.metadata.clone(),
                })?;
                let repr_bytes = encode_vector(&item.representative);

                repr.insert(item.id.as_str(), repr_bytes.as_slice())?;
                meta.insert(item.id.as_str(), record.as_slice())?;
                full.insert(item.id.as_str(), item.compressed.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove an item from a collection.
    pub fn remove(&self, collection: ItemKind, id: &str) -> Result<bool> {
        let t = tables(collection);
        let txn = self.db.begin_write()?;
        let removed = {
            let mut repr = txn.open_table(t.repr)?;
            let mut meta = txn.open_table(t.meta)?;
            let mut full = txn.open_table(t.full)?;
            let removed = repr.remove(id)?.is_some();
            meta.remove(id)?;
            full.remove(id)?;
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Number of items in a collection.
    pub fn count(&self, collection: ItemKind) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(tables(collection).repr)?;
        Ok(table.len()?)
    }
}

impl VectorStore for EmbeddingDb {
    fn search(
        &self,
        collection: ItemKind,
        query_repr: &[f32],
        k: usize,
        filters: &Filters,
    ) -> Result<Vec<StoreHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let t = tables(collection);
        let txn = self.db.begin_read()?;
        let repr = txn.open_table(t.repr)?;
        let meta = txn.open_table(t.meta)?;

        let mut hits = Vec::new();
        for entry in repr.iter()? {
            let (key, value) = entry?;
            let id = key.value();

            let Some(record) = meta.get(id)? else {
                warn!(%collection, id, "item has no metadata record, skipping");
                continue;
            };
            let record: MetaRecord = match serde_json::from_slice(record.value())
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(%collection, id, "unreadable metadata record: {e}");
                    continue;
                }
            };
            if !filters.matches(&record.doc_id, &record.metadata) {
                continue;
            }

            let vector = decode_vector(value.value());
            if vector.len() != query_repr.len() {
                warn!(
                    %collection,
                    id,
                    stored = vector.len(),
                    query = query_repr.len(),
                    "representative dimension mismatch, skipping"
                );
                continue;
            }

            hits.push(StoreHit {
                id: id.to_string(),
                doc_id: record.doc_id,
                score: cosine(query_repr, &vector),
                metadata: record.metadata,
            });
        }

        Ok(rank_hits(hits, k))
    }

    fn get_full_embeddings(
        &self,
        collection: ItemKind,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let txn = self.db.begin_read()?;
        let table = txn.open_table(tables(collection).full)?;

        let mut blobs = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(guard) = table.get(id.as_str())? {
                blobs.insert(id.clone(), guard.value().to_vec());
            }
        }
        Ok(blobs)
    }
}

impl std::fmt::Debug for EmbeddingDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingDb").finish_non_exhaustive()
    }
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::PageRange;

    fn test_db() -> (tempfile::TempDir, EmbeddingDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = EmbeddingDb::open(&tmp.path().join("store.redb")).unwrap();
        (tmp, db)
    }

    fn item(id: &str, kind: ItemKind, repr: Vec<f32>, page: u32) -> StoredItem {
        StoredItem {
            id: id.to_string(),
            doc_id: format!("doc-{}", page % 2),
            kind,
            representative: repr,
            compressed: vec![page as u8; 4],
            metadata: ItemMetadata {
                filename: "slides.pdf".to_string(),
                page,
                ..Default::default()
            },
        }
    }

    #[test]
    fn put_and_search() {
        let (_tmp, db) = test_db();
        db.batch_put(&[
            item("p1", ItemKind::Visual, vec![1.0, 0.0, 0.0], 1),
            item("p2", ItemKind::Visual, vec![0.0, 1.0, 0.0], 2),
            item("c1", ItemKind::Text, vec![1.0, 0.0, 0.0], 1),
        ])
        .unwrap();

        assert_eq!(db.count(ItemKind::Visual).unwrap(), 2);
        assert_eq!(db.count(ItemKind::Text).unwrap(), 1);

        let hits = db
            .search(ItemKind::Visual, &[1.0, 0.1, 0.0], 10, &Filters::default())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "p1");
        assert_eq!(hits[0].metadata.page, 1);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn search_pushes_filters_down() {
        let (_tmp, db) = test_db();
        let items: Vec<_> = (1..=10)
            .map(|p| item(&format!("p{p}"), ItemKind::Visual, vec![1.0, 0.0], p))
            .collect();
        db.batch_put(&items).unwrap();

        let filters = Filters {
            page_range: Some(PageRange { min: 8, max: 10 }),
            ..Default::default()
        };
        let hits = db.search(ItemKind::Visual, &[1.0, 0.0], 2, &filters).unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.metadata.page >= 8));
    }

    #[test]
    fn empty_collection_returns_no_hits() {
        let (_tmp, db) = test_db();
        let hits = db
            .search(ItemKind::Text, &[1.0], 5, &Filters::default())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn batch_get_skips_missing_ids() {
        let (_tmp, db) = test_db();
        db.put(&item("p3", ItemKind::Visual, vec![1.0], 3)).unwrap();

        let blobs = db
            .get_full_embeddings(
                ItemKind::Visual,
                &["p3".to_string(), "ghost".to_string()],
            )
            .unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs["p3"], vec![3u8; 4]);

        // Same id in the other collection is not visible.
        assert!(
            db.get_full_embeddings(ItemKind::Text, &["p3".to_string()])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn remove_entry() {
        let (_tmp, db) = test_db();
        db.put(&item("p1", ItemKind::Visual, vec![1.0], 1)).unwrap();

        assert!(db.remove(ItemKind::Visual, "p1").unwrap());
        assert!(!db.remove(ItemKind::Visual, "p1").unwrap());
        assert_eq!(db.count(ItemKind::Visual).unwrap(), 0);
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.redb");

        {
            let db = EmbeddingDb::open(&path).unwrap();
            db.put(&item("p1", ItemKind::Text, vec![0.5, 0.5], 1)).unwrap();
        }

        {
            let db = EmbeddingDb::open(&path).unwrap();
            let hits = db
                .search(ItemKind::Text, &[0.5, 0.5], 1, &Filters::default())
                .unwrap();
            assert_eq!(hits[0].id, "p1");
        }
    }
}

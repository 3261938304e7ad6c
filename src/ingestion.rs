use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use kdam::{BarExt, tqdm};
use serde::Deserialize;
use tracing::info;

use crate::{
    codec::EmbeddingCodec,
    embedding::MultiVectorEmbedding,
    embedding_db::EmbeddingDb,
    error::{Error, Result},
    item::{ItemKind, ItemMetadata, StoredItem},
};

/// Items written per redb transaction.
const BATCH_SIZE: usize = 256;

/// One line of a JSONL load file.
///
/// ```json
/// {"id": "doc1-page003", "doc_id": "doc1", "type": "visual",
///  "embedding": [[0.1, 0.2], [0.3, 0.4]],
///  "metadata": {"filename": "report.pdf", "page": 3}}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestRecord {
    pub id: String,
    pub doc_id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub embedding: Vec<Vec<f32>>,
    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl IngestRecord {
    /// Check the embedding against `dimension` and compress it with `codec`.
    pub fn into_stored(
        self,
        codec: &dyn EmbeddingCodec,
        dimension: usize,
    ) -> Result<StoredItem> {
        if self.id.is_empty() {
            return Err(Error::MalformedEmbedding("empty item id".to_string()));
        }

        let embedding = MultiVectorEmbedding::from_rows(self.embedding)?;
        if embedding.dimension() != dimension {
            return Err(Error::EmbeddingShape {
                expected: dimension,
                found: embedding.dimension(),
            });
        }

        Ok(StoredItem {
            id: self.id,
            doc_id: self.doc_id,
            kind: self.kind,
            representative: embedding.representative().to_vec(),
            compressed: codec.compress(&embedding),
            metadata: self.metadata,
        })
    }
}

/// Parse JSONL records, skipping blank lines. Errors carry the 1-based line
/// number.
pub fn parse_jsonl(
    reader: impl BufRead,
    codec: &dyn EmbeddingCodec,
    dimension: usize,
) -> impl Iterator<Item = Result<StoredItem>> {
    reader
        .lines()
        .enumerate()
        .filter_map(move |(idx, line)| {
            let line_no = idx + 1;
            let at_line = |e: Error| Error::Ingest {
                line: line_no,
                source: Box::new(e),
            };

            let line = match line {
                Ok(l) => l,
                Err(e) => return Some(Err(at_line(e.into()))),
            };
            if line.trim().is_empty() {
                return None;
            }

            Some(
                serde_json::from_str::<IngestRecord>(&line)
                    .map_err(Error::from)
                    .and_then(|record| record.into_stored(codec, dimension))
                    .map_err(at_line),
            )
        })
}

/// Per-collection counts of a finished load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub visual: usize,
    pub text: usize,
}

impl LoadSummary {
    pub fn total(&self) -> usize {
        self.visual + self.text
    }

    fn add(&mut self, kind: ItemKind) {
        match kind {
            ItemKind::Visual => self.visual += 1,
            ItemKind::Text => self.text += 1,
        }
    }
}

/// Load a JSONL file into `db` in batches, showing progress on stderr.
///
/// Stops at the first bad record; batches committed before it stay.
pub fn load_file(
    path: &Path,
    db: &EmbeddingDb,
    codec: &dyn EmbeddingCodec,
    dimension: usize,
) -> Result<LoadSummary> {
    let total_lines = BufReader::new(File::open(path)?).lines().count();
    let reader = BufReader::new(File::open(path)?);

    let mut pb = tqdm!(total = total_lines, desc = "Loading", unit = " items");
    let mut summary = LoadSummary::default();
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    for item in parse_jsonl(reader, codec, dimension) {
        let item = item?;
        summary.add(item.kind);
        batch.push(item);

        if batch.len() == BATCH_SIZE {
            db.batch_put(&batch)?;
            pb.update(batch.len())?;
            batch.clear();
        }
    }

    db.batch_put(&batch)?;
    pb.update(batch.len())?;
    eprintln!();

    info!(
        path = %path.display(),
        visual = summary.visual,
        text = summary.text,
        "load complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{codec::F32Codec, store::VectorStore};

    const VISUAL: &str = r#"{"id": "doc1-page001", "doc_id": "doc1", "type": "visual", "embedding": [[1.0, 0.0], [0.0, 1.0]], "metadata": {"filename": "report.pdf", "page": 1}}"#;
    const TEXT: &str = r#"{"id": "doc1-chunk001", "doc_id": "doc1", "type": "text", "embedding": [[0.6, 0.8]], "metadata": {"filename": "report.pdf", "page": 1, "chunk_id": 1, "text_preview": "Revenue grew"}}"#;

    #[test]
    fn record_becomes_stored_item() {
        let items: Vec<_> = parse_jsonl(VISUAL.as_bytes(), &F32Codec, 2)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ItemKind::Visual);
        assert_eq!(items[0].representative, vec![1.0, 0.0]);
        let decoded = F32Codec.decompress(&items[0].compressed).unwrap();
        assert_eq!(decoded.num_vectors(), 2);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let input = format!("\n{VISUAL}\n   \n{TEXT}\n");
        let items: Vec<_> = parse_jsonl(input.as_bytes(), &F32Codec, 2)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn errors_report_line_numbers() {
        let input = format!("{VISUAL}\n{{\"id\": 1}}\n");
        let err = parse_jsonl(input.as_bytes(), &F32Codec, 2)
            .collect::<Result<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(err, Error::Ingest { line: 2, .. }));
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let err = parse_jsonl(VISUAL.as_bytes(), &F32Codec, 3)
            .collect::<Result<Vec<_>>>()
            .unwrap_err();
        match err {
            Error::Ingest { line, source } => {
                assert_eq!(line, 1);
                assert!(matches!(
                    *source,
                    Error::EmbeddingShape {
                        expected: 3,
                        found: 2
                    }
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn overflowing_values_are_rejected_with_line() {
        let overflow = r#"{"id": "doc1-page002", "doc_id": "doc1", "type": "visual", "embedding": [[1e39, 0.0]], "metadata": {"filename": "report.pdf", "page": 2}}"#;
        let input = format!("{VISUAL}\n{overflow}\n");
        let err = parse_jsonl(input.as_bytes(), &F32Codec, 2)
            .collect::<Result<Vec<_>>>()
            .unwrap_err();
        match err {
            Error::Ingest { line, source } => {
                assert_eq!(line, 2);
                assert!(matches!(*source, Error::MalformedEmbedding(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn load_file_writes_both_collections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("items.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "{VISUAL}").unwrap();
        writeln!(file, "{TEXT}").unwrap();

        let db = EmbeddingDb::open(&tmp.path().join("store.redb")).unwrap();
        let summary = load_file(&path, &db, &F32Codec, 2).unwrap();

        assert_eq!(summary, LoadSummary { visual: 1, text: 1 });
        assert_eq!(db.count(ItemKind::Text).unwrap(), 1);
        let blobs = db
            .get_full_embeddings(ItemKind::Text, &["doc1-chunk001".to_string()])
            .unwrap();
        assert!(blobs.contains_key("doc1-chunk001"));
    }
}

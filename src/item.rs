use std::fmt;

use serde::{Deserialize, Serialize};

/// The modality an item was indexed under. Each kind lives in its own
/// collection of the vector store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Visual,
    Text,
}

impl ItemKind {
    pub const ALL: [ItemKind; 2] = [ItemKind::Visual, ItemKind::Text];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Visual => "visual",
            ItemKind::Text => "text",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance attached to every stored item.
///
/// Visual pages only carry `filename` and `page`; the remaining fields are
/// populated for text chunks, and `start_time`/`end_time` only for chunks
/// transcribed from audio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub filename: String,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

/// An item as held by the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: String,
    pub doc_id: String,
    pub kind: ItemKind,
    pub representative: Vec<f32>,
    pub compressed: Vec<u8>,
    pub metadata: ItemMetadata,
}

/// A first-stage hit travelling through the pipeline.
///
/// `score` starts equal to `stage1_score` and is replaced only when
/// the full embedding was scored, in which case `reranked` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub doc_id: String,
    pub kind: ItemKind,
    pub stage1_score: f32,
    pub score: f32,
    pub reranked: bool,
    pub metadata: ItemMetadata,
}

impl Candidate {
    pub fn new(
        id: String,
        doc_id: String,
        kind: ItemKind,
        stage1_score: f32,
        metadata: ItemMetadata,
    ) -> Self {
        Self {
            id,
            doc_id,
            kind,
            stage1_score,
            score: stage1_score,
            reranked: false,
            metadata,
        }
    }
}

/// One entry of a search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub id: String,
    pub doc_id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub score: f32,
    pub normalized_score: f32,
    pub stage1_score: f32,
    pub reranked: bool,
    pub metadata: ItemMetadata,
    pub highlights: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ItemKind::Visual).unwrap(),
            "\"visual\""
        );
        let kind: ItemKind = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(kind, ItemKind::Text);
        assert!(serde_json::from_str::<ItemKind>("\"audio\"").is_err());
    }

    #[test]
    fn new_candidate_defaults_score_to_stage1() {
        let c = Candidate::new(
            "a".into(),
            "doc".into(),
            ItemKind::Text,
            0.4,
            ItemMetadata::default(),
        );
        assert_eq!(c.score, 0.4);
        assert!(!c.reranked);
    }

    #[test]
    fn visual_metadata_omits_text_fields() {
        let meta = ItemMetadata {
            filename: "report.pdf".into(),
            page: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["filename"], "report.pdf");
        assert!(json.get("text_preview").is_none());
        assert!(json.get("start_time").is_none());
    }
}

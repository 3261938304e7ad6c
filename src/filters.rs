use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    item::ItemMetadata,
};

/// Inclusive page interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub min: u32,
    pub max: u32,
}

impl PageRange {
    pub fn contains(&self, page: u32) -> bool {
        self.min <= page && page <= self.max
    }
}

/// Metadata predicate pushed down to the vector store with every
/// first-stage search. All present conditions must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_range: Option<PageRange>,
    #[serde(rename = "doc_id", skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<BTreeSet<String>>,
}

impl Filters {
    /// Parse a filter object such as
    /// `{"filename": "a.pdf", "page_range": {"min": 1, "max": 5}}`.
    ///
    /// Unknown keys are rejected rather than ignored. `doc_id` accepts a
    /// single string or an array of strings.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagebert::filters::Filters;
    ///
    /// let filters = Filters::parse(r#"{"doc_id": ["a", "b"]}"#).unwrap();
    /// assert_eq!(filters.doc_ids.unwrap().len(), 2);
    ///
    /// assert!(Filters::parse(r#"{"author": "x"}"#).is_err());
    /// ```
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| {
            Error::InvalidFilter(format!("filters are not valid JSON: {e}"))
        })?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let object = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            _ => {
                return Err(Error::InvalidFilter(
                    "filters must be a JSON object".to_string(),
                ));
            }
        };

        let mut filters = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "filename" => {
                    let name = value.as_str().ok_or_else(|| {
                        Error::InvalidFilter(
                            "filename must be a string".to_string(),
                        )
                    })?;
                    filters.filename = Some(name.to_string());
                }
                "page_range" => {
                    filters.page_range = Some(parse_page_range(value)?);
                }
                "doc_id" => {
                    filters.doc_ids = Some(parse_doc_ids(value)?);
                }
                other => {
                    return Err(Error::InvalidFilter(format!(
                        "unsupported filter key '{other}'"
                    )));
                }
            }
        }

        filters.validate()?;
        Ok(filters)
    }

    /// Check value constraints on filters built in code.
    pub fn validate(&self) -> Result<()> {
        if let Some(range) = self.page_range
            && range.min > range.max
        {
            return Err(Error::InvalidFilter(format!(
                "page_range min {} exceeds max {}",
                range.min, range.max
            )));
        }
        if let Some(ids) = &self.doc_ids
            && ids.is_empty()
        {
            return Err(Error::InvalidFilter(
                "doc_id set is empty".to_string(),
            ));
        }
        if let Some(name) = &self.filename
            && name.is_empty()
        {
            return Err(Error::InvalidFilter("filename is empty".to_string()));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_none()
            && self.page_range.is_none()
            && self.doc_ids.is_none()
    }

    /// Evaluate the predicate against one stored item.
    pub fn matches(&self, doc_id: &str, metadata: &ItemMetadata) -> bool {
        if let Some(name) = &self.filename
            && metadata.filename != *name
        {
            return false;
        }
        if let Some(range) = self.page_range
            && !range.contains(metadata.page)
        {
            return false;
        }
        if let Some(ids) = &self.doc_ids
            && !ids.contains(doc_id)
        {
            return false;
        }
        true
    }
}

fn parse_page_range(value: &Value) -> Result<PageRange> {
    let object = value.as_object().ok_or_else(|| {
        Error::InvalidFilter(
            "page_range must be an object with min and max".to_string(),
        )
    })?;

    if let Some(key) = object.keys().find(|k| *k != "min" && *k != "max") {
        return Err(Error::InvalidFilter(format!(
            "unsupported page_range key '{key}'"
        )));
    }

    Ok(PageRange {
        min: page_bound(object, "min")?,
        max: page_bound(object, "max")?,
    })
}

fn page_bound(object: &Map<String, Value>, key: &str) -> Result<u32> {
    let value = object.get(key).ok_or_else(|| {
        Error::InvalidFilter(format!("page_range is missing '{key}'"))
    })?;
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            Error::InvalidFilter(format!(
                "page_range {key} must be a non-negative integer, got {value}"
            ))
        })
}

fn parse_doc_ids(value: &Value) -> Result<BTreeSet<String>> {
    match value {
        Value::String(id) => Ok(BTreeSet::from([id.clone()])),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Error::InvalidFilter(format!(
                        "doc_id entries must be strings, got {item}"
                    ))
                })
            })
            .collect(),
        _ => Err(Error::InvalidFilter(
            "doc_id must be a string or an array of strings".to_string(),
        )),
    }
}

pub mod generative;
pub mod structural;

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One column of a table, as parsed from the detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub key: bool,
}

/// A scraped table: the unit the contract builder consumes. `table_name` is
/// the upsert key and must be non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRecord {
    pub table_name: String,
    pub description: String,
    pub category: String,
    pub delivery_class: String,
    pub fields: Vec<FieldRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

/// Extraction result: the record plus deterministic completeness accounting.
/// `unresolved` names every field row that failed to parse, so the
/// completeness metric is an exact count rather than a best-effort guess.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: TableRecord,
    pub expected_fields: usize,
    pub processed_fields: usize,
    pub unresolved: Vec<String>,
}

impl Extraction {
    pub fn completeness(&self) -> f64 {
        if self.expected_fields == 0 {
            0.0
        } else {
            self.processed_fields as f64 / self.expected_fields as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.expected_fields > 0 && self.processed_fields == self.expected_fields
    }
}

/// Extraction strategy, selected on the command line. Both take the raw
/// markup of a detail page and produce the same `Extraction`.
pub enum Extractor {
    Structural,
    Generative(generative::GenerativeExtractor),
}

impl Extractor {
    pub async fn extract(&self, html: &str, source_url: &str) -> Result<Extraction> {
        match self {
            Extractor::Structural => structural::extract(html, source_url),
            Extractor::Generative(g) => g.extract(html, source_url).await,
        }
    }
}

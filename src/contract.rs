use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::extract::{Extraction, FieldRecord};
use crate::sink;

/// The persisted data-contract document. Two top-level sections; both must be
/// non-empty for the contract to validate. Built fresh per run and replaced
/// wholesale on refresh, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub metadata: Metadata,
    pub source_information: SourceInformation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub contract_name: String,
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub source_system: String,
    pub validation: Validation,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub total_fields: usize,
    pub processed_fields: usize,
    pub completeness: f64,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub is_complete: bool,
    pub has_source: bool,
    pub has_category: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInformation {
    pub table_name: String,
    pub description: String,
    pub category: String,
    pub delivery_class: String,
    pub source_url: String,
    pub scrape_timestamp: DateTime<Utc>,
    pub fields: Vec<FieldRecord>,
}

/// Pure mapping from an extraction onto the contract template. The only
/// failure is a missing table name — that is the upsert key, so nothing is
/// silently defaulted for it.
pub fn build(extraction: &Extraction, source_url: &str, cfg: &Config) -> Result<Contract> {
    let record = &extraction.record;
    if record.table_name.trim().is_empty() {
        bail!("record has no table name, refusing to build a contract");
    }

    let safe = sink::safe_name(&record.table_name);
    Ok(Contract {
        metadata: Metadata {
            contract_name: format!("SAP_{}", safe),
            version: cfg.contract_version.clone(),
            last_updated: record.last_updated,
            source_system: "SAP".to_string(),
            validation: Validation {
                total_fields: extraction.expected_fields,
                processed_fields: extraction.processed_fields,
                completeness: extraction.completeness(),
                is_complete: extraction.is_complete(),
                unresolved: extraction.unresolved.clone(),
            },
            status: Status {
                is_complete: extraction.is_complete(),
                has_source: !source_url.is_empty(),
                has_category: !record.category.is_empty(),
            },
        },
        source_information: SourceInformation {
            table_name: record.table_name.clone(),
            description: record.description.clone(),
            category: record.category.clone(),
            delivery_class: record.delivery_class.clone(),
            source_url: source_url.to_string(),
            scrape_timestamp: record.last_updated,
            fields: record.fields.clone(),
        },
    })
}

impl Contract {
    /// Serialized document with empty top-level sections dropped.
    pub fn to_document(&self) -> serde_json::Value {
        prune_empty_sections(serde_json::to_value(self).expect("contract serializes"))
    }

    /// Pretty-printed document; byte-stable for identical input.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }
}

/// Drop top-level sections that serialized to nothing.
pub(crate) fn prune_empty_sections(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| match v {
                    serde_json::Value::Null => false,
                    serde_json::Value::Object(o) => !o.is_empty(),
                    serde_json::Value::Array(a) => !a.is_empty(),
                    serde_json::Value::String(s) => !s.is_empty(),
                    _ => true,
                })
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::TableRecord;
    use std::collections::BTreeMap;

    fn sample_extraction() -> Extraction {
        let ts = "2024-03-01T12:00:00Z".parse().unwrap();
        Extraction {
            record: TableRecord {
                table_name: "MARC".into(),
                description: "Plant Data for Material".into(),
                category: "TRANSP".into(),
                delivery_class: "A".into(),
                fields: vec![FieldRecord {
                    name: "MATNR".into(),
                    data_type: "CHAR".into(),
                    length: Some(18),
                    description: Some("Material Number".into()),
                    key: true,
                }],
                metadata: BTreeMap::new(),
                last_updated: ts,
            },
            expected_fields: 1,
            processed_fields: 1,
            unresolved: Vec::new(),
        }
    }

    fn cfg() -> Config {
        Config::from_env().unwrap()
    }

    #[test]
    fn builds_both_sections() {
        let c = build(&sample_extraction(), "https://example.org/marc", &cfg()).unwrap();
        assert_eq!(c.metadata.contract_name, "SAP_MARC");
        assert!(c.metadata.validation.is_complete);
        assert!(c.metadata.status.has_source);
        assert_eq!(c.source_information.fields.len(), 1);

        let doc = c.to_document();
        let obj = doc.as_object().unwrap();
        assert!(obj.get("metadata").is_some_and(|m| !m.as_object().unwrap().is_empty()));
        assert!(obj
            .get("source_information")
            .is_some_and(|s| !s.as_object().unwrap().is_empty()));
    }

    #[test]
    fn empty_name_is_a_validation_failure() {
        let mut e = sample_extraction();
        e.record.table_name = "  ".into();
        assert!(build(&e, "u", &cfg()).is_err());
    }

    #[test]
    fn incomplete_extraction_is_flagged() {
        let mut e = sample_extraction();
        e.expected_fields = 2;
        e.unresolved.push("WERKS".into());
        let c = build(&e, "u", &cfg()).unwrap();
        assert!(!c.metadata.validation.is_complete);
        assert_eq!(c.metadata.validation.total_fields, 2);
        assert_eq!(c.metadata.validation.completeness, 0.5);
        assert_eq!(c.metadata.validation.unresolved, vec!["WERKS".to_string()]);
    }

    #[test]
    fn pretty_output_is_stable() {
        let c = build(&sample_extraction(), "u", &cfg()).unwrap();
        assert_eq!(c.to_pretty_json().unwrap(), c.to_pretty_json().unwrap());
    }

    #[test]
    fn empty_sections_are_dropped() {
        let doc = prune_empty_sections(serde_json::json!({
            "metadata": {"contract_name": "SAP_T000"},
            "technical_specifications": {},
            "notes": null,
            "tags": []
        }));
        let obj = doc.as_object().unwrap();
        assert!(obj.contains_key("metadata"));
        assert!(!obj.contains_key("technical_specifications"));
        assert!(!obj.contains_key("notes"));
        assert!(!obj.contains_key("tags"));
    }

    #[test]
    fn slashed_name_is_made_safe() {
        let mut e = sample_extraction();
        e.record.table_name = "/BIC/AZOB".into();
        let c = build(&e, "u", &cfg()).unwrap();
        assert_eq!(c.metadata.contract_name, "SAP__BIC_AZOB");
        assert_eq!(c.source_information.table_name, "/BIC/AZOB");
    }
}

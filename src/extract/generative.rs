use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use super::{structural, Extraction, FieldRecord, TableRecord};
use crate::config::Config;

static FENCE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```(?:json)?\s*").unwrap());
static FENCE_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*```\s*$").unwrap());

/// Capability boundary to the language model: a prompt goes in, free text
/// comes out. Everything downstream is strict typed deserialization.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini-style `generateContent` endpoint over plain HTTP.
pub struct HttpGenerativeModel {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
}

impl HttpGenerativeModel {
    pub fn new(cfg: &Config) -> Result<Self> {
        let api_key = cfg.require_gemini_key()?.to_string();
        Ok(HttpGenerativeModel {
            client: reqwest::Client::new(),
            api_base: cfg.gemini_api_base.clone(),
            model: cfg.gemini_model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl GenerativeModel for HttpGenerativeModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("model endpoint returned HTTP {}", status);
        }

        let value: serde_json::Value = response.json().await?;
        value
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| anyhow!("no text candidate in model response"))
    }
}

/// What the model is asked to return. Aliases cover the field spellings the
/// model tends to pick when given the example shape.
#[derive(Debug, Deserialize)]
struct RecordDto {
    table_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    delivery_class: String,
    #[serde(default)]
    fields: Vec<FieldDto>,
}

#[derive(Debug, Deserialize)]
struct FieldDto {
    #[serde(default)]
    name: String,
    #[serde(default)]
    data_type: String,
    #[serde(default)]
    length: Option<u32>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "is_key")]
    key: bool,
}

/// LLM-backed extraction: same contract as the structural strategy, with the
/// page interpretation delegated to the model.
pub struct GenerativeExtractor {
    model: Box<dyn GenerativeModel>,
}

impl GenerativeExtractor {
    pub fn new(model: Box<dyn GenerativeModel>) -> Self {
        GenerativeExtractor { model }
    }

    pub async fn extract(&self, page: &str, source_url: &str) -> Result<Extraction> {
        let expected_fields = structural::expected_field_count(page);
        let prompt = build_prompt(page);
        let raw = self
            .model
            .generate(&prompt)
            .await
            .with_context(|| format!("model call failed for {}", source_url))?;

        let cleaned = strip_code_fences(&raw);
        let dto: RecordDto = match serde_json::from_str(&cleaned) {
            Ok(dto) => dto,
            Err(e) => {
                warn!("unparseable model response for {}: {} — raw: {}", source_url, e, raw);
                bail!("model response is not a valid record: {}", e);
            }
        };
        if dto.table_name.is_empty() {
            bail!("model response has no table name");
        }

        let mut fields = Vec::with_capacity(dto.fields.len());
        let mut unresolved = Vec::new();
        for (i, f) in dto.fields.into_iter().enumerate() {
            if f.name.is_empty() || f.data_type.is_empty() {
                unresolved.push(if f.name.is_empty() { format!("field {}", i + 1) } else { f.name });
                continue;
            }
            fields.push(FieldRecord {
                name: f.name,
                data_type: f.data_type,
                length: f.length,
                description: f.description,
                key: f.key,
            });
        }

        let processed_fields = fields.len();
        Ok(Extraction {
            record: TableRecord {
                table_name: dto.table_name,
                description: dto.description,
                category: dto.category,
                delivery_class: dto.delivery_class,
                fields,
                metadata: BTreeMap::new(),
                last_updated: Utc::now(),
            },
            expected_fields,
            processed_fields,
            unresolved,
        })
    }
}

fn build_prompt(page: &str) -> String {
    format!(
        "Extract the table structure from the following HTML page of an SAP \
         table datasheet. Respond with a single JSON object and nothing else, \
         matching exactly this shape:\n\
         {{\n\
           \"table_name\": \"MARC\",\n\
           \"description\": \"Plant Data for Material\",\n\
           \"category\": \"TRANSP\",\n\
           \"delivery_class\": \"A\",\n\
           \"fields\": [\n\
             {{\"name\": \"MATNR\", \"data_type\": \"CHAR\", \"length\": 18, \
              \"description\": \"Material Number\", \"key\": true}}\n\
           ]\n\
         }}\n\n\
         HTML:\n{}",
        page
    )
}

/// Remove surrounding markdown code fences, if the model added any.
pub fn strip_code_fences(text: &str) -> String {
    let text = FENCE_OPEN_RE.replace(text.trim(), "");
    FENCE_CLOSE_RE.replace(&text, "").trim().to_string()
}

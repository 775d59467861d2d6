use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::Utc;

use super::{Extraction, FieldRecord, TableRecord};
use crate::html;

/// Field-table rows carry at least this many cells; anything narrower is an
/// attribute row or page chrome.
const FIELD_ROW_CELLS: usize = 5;
/// The field table leads with two header rows (group header + column names).
const HEADER_ROWS: usize = 2;

/// Fixed-structure extraction: header line for name/description, two-cell
/// attribute rows for category and delivery class, wide rows for fields.
/// A field row that does not parse lands in `unresolved` instead of failing
/// the record; only a missing table name is fatal, since it is the upsert key.
pub fn extract(page: &str, _source_url: &str) -> Result<Extraction> {
    let (table_name, header_description) = parse_header(page)?;

    let rows = html::table_rows(page);

    let mut category = String::new();
    let mut delivery_class = String::new();
    let mut description = header_description;
    let mut metadata = BTreeMap::new();

    for row in rows.iter().filter(|r| r.len() == 2) {
        let label = row[0].trim_end_matches(':').to_string();
        let value = row[1].clone();
        match label.as_str() {
            "Category" => category = value,
            "Delivery Class" => delivery_class = value,
            "Description" | "Short Description" => {
                if description.is_empty() {
                    description = value;
                }
            }
            _ if !value.is_empty() => {
                metadata.insert(label, value);
            }
            _ => {}
        }
    }

    let field_rows: Vec<&Vec<String>> =
        rows.iter().filter(|r| r.len() >= FIELD_ROW_CELLS).collect();
    let expected_fields = field_rows.len().saturating_sub(HEADER_ROWS);

    let mut fields = Vec::with_capacity(expected_fields);
    let mut unresolved = Vec::new();
    for (i, row) in field_rows.iter().skip(HEADER_ROWS).enumerate() {
        match parse_field_row(row) {
            Some(field) => fields.push(field),
            None => unresolved.push(row_label(row, i)),
        }
    }

    let processed_fields = fields.len();
    Ok(Extraction {
        record: TableRecord {
            table_name,
            description,
            category,
            delivery_class,
            fields,
            metadata,
            last_updated: Utc::now(),
        },
        expected_fields,
        processed_fields,
        unresolved,
    })
}

/// Field rows present in the markup, minus the header rows. Shared with the
/// generative strategy so both compute completeness from the same count.
pub fn expected_field_count(page: &str) -> usize {
    html::table_rows(page)
        .iter()
        .filter(|r| r.len() >= FIELD_ROW_CELLS)
        .count()
        .saturating_sub(HEADER_ROWS)
}

/// Header line is "NAME - Description". The name is mandatory.
fn parse_header(page: &str) -> Result<(String, String)> {
    let header = html::first_tagged_text(page, "card-header")
        .or_else(|| html::first_tagged_text(page, "<h1"));
    let Some(header) = header else {
        bail!("detail page has no recognizable header");
    };
    let (name, description) = match header.split_once(" - ") {
        Some((n, d)) => (n.trim().to_string(), d.trim().to_string()),
        None => (header.trim().to_string(), String::new()),
    };
    if name.is_empty() {
        bail!("table name missing from header");
    }
    Ok((name, description))
}

/// Cells: key flag, field name, data type, length, description.
/// Returns None when the row cannot yield a named field.
fn parse_field_row(cells: &[String]) -> Option<FieldRecord> {
    let name = cells.get(1)?.trim();
    if name.is_empty() {
        return None;
    }
    let data_type = cells.get(2)?.trim();
    if data_type.is_empty() {
        return None;
    }
    let length = cells.get(3).and_then(|c| c.replace(',', "").parse::<u32>().ok());
    let description = cells
        .get(4)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let key = cells
        .first()
        .is_some_and(|c| c.as_str() == "X" || c.contains("Key"));
    Some(FieldRecord {
        name: name.to_string(),
        data_type: data_type.to_string(),
        length,
        description,
        key,
    })
}

fn row_label(cells: &[String], index: usize) -> String {
    match cells.iter().find(|c| !c.is_empty()) {
        Some(c) => c.clone(),
        None => format!("row {}", index + 1),
    }
}

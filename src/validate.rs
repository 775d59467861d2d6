use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde_json::Value;

/// Classification of one persisted contract file.
#[derive(Debug, PartialEq)]
pub enum FileCheck {
    Valid,
    /// Structurally readable but failing a contract requirement.
    Invalid(String),
    /// Unreadable or not JSON at all.
    Errored(String),
}

pub struct ValidationReport {
    pub valid: Vec<String>,
    pub invalid: Vec<(String, String)>,
    pub errors: Vec<(String, String)>,
}

impl ValidationReport {
    pub fn print(&self) {
        println!("Valid contracts:   {}", self.valid.len());
        println!("Invalid contracts: {}", self.invalid.len());
        println!("Errors:            {}", self.errors.len());

        if !self.invalid.is_empty() {
            println!("\n--- Invalid ---");
            for (file, reason) in &self.invalid {
                println!("  {}: {}", file, reason);
            }
        }
        if !self.errors.is_empty() {
            println!("\n--- Errors ---");
            for (file, reason) in &self.errors {
                println!("  {}: {}", file, reason);
            }
        }
    }
}

/// Walk the contracts directory and classify every `.json` file in parallel.
pub fn validate_dir(dir: &Path) -> Result<ValidationReport> {
    let mut files = Vec::new();
    collect_json_files(dir, &mut files)?;
    files.sort();

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len}")
            .expect("static template")
            .progress_chars("=> "),
    );

    let results: Vec<(String, FileCheck)> = files
        .par_iter()
        .map(|path| {
            let check = check_file(path);
            pb.inc(1);
            (path.display().to_string(), check)
        })
        .collect();
    pb.finish_and_clear();

    let mut report = ValidationReport { valid: Vec::new(), invalid: Vec::new(), errors: Vec::new() };
    for (file, check) in results {
        match check {
            FileCheck::Valid => report.valid.push(file),
            FileCheck::Invalid(reason) => report.invalid.push((file, reason)),
            FileCheck::Errored(reason) => report.errors.push((file, reason)),
        }
    }
    Ok(report)
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "json") {
            out.push(path);
        }
    }
    Ok(())
}

fn check_file(path: &Path) -> FileCheck {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => return FileCheck::Errored(e.to_string()),
    };
    let doc: Value = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => return FileCheck::Errored(e.to_string()),
    };
    check_contract(&doc)
}

/// A contract is valid when both top-level blocks are present and its own
/// validation sub-block reports all fields processed.
pub fn check_contract(doc: &Value) -> FileCheck {
    for block in ["metadata", "source_information"] {
        if !doc.get(block).is_some_and(|b| b.as_object().is_some_and(|o| !o.is_empty())) {
            return FileCheck::Invalid(format!("missing {} block", block));
        }
    }

    let validation = &doc["metadata"]["validation"];
    if validation["is_complete"].as_bool() != Some(true) {
        let processed = validation["processed_fields"].as_u64().unwrap_or(0);
        let total = validation["total_fields"].as_u64().unwrap_or(0);
        return FileCheck::Invalid(format!("incomplete fields ({} of {})", processed, total));
    }

    FileCheck::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract_doc(complete: bool) -> Value {
        json!({
            "metadata": {
                "contract_name": "SAP_MARC",
                "validation": {
                    "total_fields": 4,
                    "processed_fields": if complete { 4 } else { 3 },
                    "is_complete": complete
                }
            },
            "source_information": {
                "table_name": "MARC",
                "fields": []
            }
        })
    }

    #[test]
    fn complete_contract_is_valid() {
        assert_eq!(check_contract(&contract_doc(true)), FileCheck::Valid);
    }

    #[test]
    fn incomplete_contract_is_invalid_with_counts() {
        match check_contract(&contract_doc(false)) {
            FileCheck::Invalid(reason) => assert_eq!(reason, "incomplete fields (3 of 4)"),
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn missing_blocks_are_invalid() {
        let doc = json!({"metadata": {"contract_name": "SAP_X"}});
        match check_contract(&doc) {
            FileCheck::Invalid(reason) => assert!(reason.contains("source_information")),
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn directory_walk_classifies_all_three_kinds() {
        let mut dir = std::env::temp_dir();
        dir.push("sapds_validate_walk");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("MARC")).unwrap();

        fs::write(
            dir.join("MARC/MARC.json"),
            serde_json::to_string_pretty(&contract_doc(true)).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.join("MARC/MARD.json"),
            serde_json::to_string_pretty(&contract_doc(false)).unwrap(),
        )
        .unwrap();
        fs::write(dir.join("MARC/BROKEN.json"), "{ not json").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let report = validate_dir(&dir).unwrap();
        assert_eq!(report.valid.len(), 1);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.errors.len(), 1);
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::contract::Contract;

/// Namespace directory for an identifier: the prefix before the first `/`
/// (SAP namespace tables like `/BIC/AZOB`), otherwise before the first `_`,
/// otherwise the identifier itself.
pub fn namespace(table_name: &str) -> String {
    let segment = if table_name.contains('/') {
        table_name.split('/').find(|s| !s.is_empty())
    } else {
        table_name.split('_').find(|s| !s.is_empty())
    };
    segment.unwrap_or("misc").to_string()
}

/// Filesystem-safe file stem for an identifier.
pub fn safe_name(table_name: &str) -> String {
    table_name.replace('/', "_")
}

/// Write the contract as pretty-printed JSON under
/// `<contracts_dir>/<namespace>/<safe-name>.json`, overwriting any prior
/// file. The namespace directory is created on demand, world-readable.
pub fn write_contract(contracts_dir: &Path, table_name: &str, contract: &Contract) -> Result<PathBuf> {
    let dir = contracts_dir.join(namespace(table_name));
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755))?;
    }

    let path = dir.join(format!("{}.json", safe_name(table_name)));
    fs::write(&path, contract.to_pretty_json()?)
        .with_context(|| format!("writing {}", path.display()))?;
    info!("Contract written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::contract;
    use crate::extract::{Extraction, FieldRecord, TableRecord};
    use std::collections::BTreeMap;

    fn tmp_dir(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("sapds_sink_{}", name));
        let _ = fs::remove_dir_all(&p);
        fs::create_dir_all(&p).unwrap();
        p
    }

    fn sample(table_name: &str) -> Contract {
        let extraction = Extraction {
            record: TableRecord {
                table_name: table_name.into(),
                description: "Plant Data for Material".into(),
                category: "TRANSP".into(),
                delivery_class: "A".into(),
                fields: vec![FieldRecord {
                    name: "MATNR".into(),
                    data_type: "CHAR".into(),
                    length: Some(18),
                    description: None,
                    key: true,
                }],
                metadata: BTreeMap::new(),
                last_updated: "2024-03-01T12:00:00Z".parse().unwrap(),
            },
            expected_fields: 1,
            processed_fields: 1,
            unresolved: Vec::new(),
        };
        contract::build(&extraction, "https://example.org/marc", &Config::from_env().unwrap())
            .unwrap()
    }

    #[test]
    fn namespaces() {
        assert_eq!(namespace("MARA"), "MARA");
        assert_eq!(namespace("T001"), "T001");
        assert_eq!(namespace("T001_EXT"), "T001");
        assert_eq!(namespace("/BIC/AZOB"), "BIC");
    }

    #[test]
    fn safe_names() {
        assert_eq!(safe_name("MARC"), "MARC");
        assert_eq!(safe_name("/BIC/AZOB"), "_BIC_AZOB");
    }

    #[test]
    fn round_trip_is_structurally_identical() {
        let dir = tmp_dir("round_trip");
        let c = sample("MARC");
        let path = write_contract(&dir, "MARC", &c).unwrap();
        assert!(path.ends_with("MARC/MARC.json"));

        let read_back: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read_back, c.to_document());
    }

    #[test]
    fn repeated_writes_are_byte_identical() {
        let dir = tmp_dir("stable");
        let c = sample("MARC");
        let p1 = write_contract(&dir, "MARC", &c).unwrap();
        let first = fs::read(&p1).unwrap();
        let p2 = write_contract(&dir, "MARC", &c).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(first, fs::read(&p2).unwrap());
    }

    #[test]
    fn slashed_identifier_writes_into_namespace_dir() {
        let dir = tmp_dir("slashed");
        let c = sample("/BIC/AZOB");
        let path = write_contract(&dir, "/BIC/AZOB", &c).unwrap();
        assert!(path.ends_with("BIC/_BIC_AZOB.json"));
        assert!(path.exists());
    }
}

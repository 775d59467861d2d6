use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

use crate::contract::Contract;
use crate::index::DiscoveredTable;

pub fn connect(db_path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tables (
            id             INTEGER PRIMARY KEY,
            name           TEXT UNIQUE NOT NULL,
            url            TEXT NOT NULL,
            description    TEXT,
            category       TEXT,
            delivery_class TEXT,
            visited        BOOLEAN NOT NULL DEFAULT 0,
            visited_at     TEXT,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_tables_visited ON tables(visited);

        -- Contract documents, one per table, replaced wholesale on refresh.
        CREATE TABLE IF NOT EXISTS contracts (
            table_name     TEXT PRIMARY KEY,
            category       TEXT,
            delivery_class TEXT,
            document       TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_contracts_category ON contracts(category);
        CREATE INDEX IF NOT EXISTS idx_contracts_delivery_class ON contracts(delivery_class);
        ",
    )?;
    Ok(())
}

// ── Queue ──

pub fn insert_tables(conn: &Connection, tables: &[DiscoveredTable]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO tables (name, url, description, category, delivery_class)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for t in tables {
            count += stmt.execute(rusqlite::params![
                t.name,
                t.url,
                t.description,
                t.category,
                t.delivery_class,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

#[derive(Debug, Clone)]
pub struct QueuedTable {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub description: String,
    pub category: String,
    pub delivery_class: String,
}

pub fn fetch_unvisited(conn: &Connection, limit: Option<usize>) -> Result<Vec<QueuedTable>> {
    let sql = format!(
        "SELECT id, name, url, COALESCE(description,''), COALESCE(category,''),
                COALESCE(delivery_class,'')
         FROM tables WHERE visited = 0 ORDER BY id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(QueuedTable {
                id: row.get(0)?,
                name: row.get(1)?,
                url: row.get(2)?,
                description: row.get(3)?,
                category: row.get(4)?,
                delivery_class: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_visited(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE tables SET visited = 1, visited_at = datetime('now') WHERE id = ?1",
        rusqlite::params![id],
    )?;
    Ok(())
}

// ── Contracts ──

/// Keyed upsert: the stored document is replaced entirely, last write wins.
pub fn upsert_contract(conn: &Connection, contract: &Contract) -> Result<()> {
    let document = serde_json::to_string(&contract.to_document())?;
    conn.execute(
        "INSERT OR REPLACE INTO contracts (table_name, category, delivery_class, document, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            contract.source_information.table_name,
            contract.source_information.category,
            contract.source_information.delivery_class,
            document,
            contract.metadata.last_updated.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[allow(dead_code)]
pub fn get_contract(conn: &Connection, table_name: &str) -> Result<Option<serde_json::Value>> {
    let mut stmt = conn.prepare("SELECT document FROM contracts WHERE table_name = ?1")?;
    let mut rows = stmt.query(rusqlite::params![table_name])?;
    match rows.next()? {
        Some(row) => {
            let raw: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&raw)?))
        }
        None => Ok(None),
    }
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub visited: usize,
    pub unvisited: usize,
    pub contracts: usize,
    pub complete: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM tables", [], |r| r.get(0))?;
    let visited: usize =
        conn.query_row("SELECT COUNT(*) FROM tables WHERE visited = 1", [], |r| r.get(0))?;
    let contracts: usize = conn.query_row("SELECT COUNT(*) FROM contracts", [], |r| r.get(0))?;
    let complete: usize = conn.query_row(
        "SELECT COUNT(*) FROM contracts
         WHERE json_extract(document, '$.metadata.validation.is_complete') = 1",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        total,
        visited,
        unvisited: total - visited,
        contracts,
        complete,
    })
}

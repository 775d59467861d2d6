use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;
use crate::contract::{self, Contract};
use crate::extract::Extractor;
use crate::fetch::Fetcher;
use crate::sink;
use crate::store::{self, QueuedTable};

pub struct RunOptions {
    pub limit: Option<usize>,
    pub tables_file: Option<PathBuf>,
    pub async_mode: bool,
}

/// Per-item outcome. Failures carry the reason; the batch itself never
/// aborts on one.
pub struct ItemOutcome {
    pub name: String,
    pub error: Option<String>,
}

impl ItemOutcome {
    fn ok(name: &str) -> Self {
        ItemOutcome { name: name.to_string(), error: None }
    }

    fn failed(name: &str, reason: String) -> Self {
        warn!("Failed {}: {}", name, reason);
        ItemOutcome { name: name.to_string(), error: Some(reason) }
    }
}

pub struct RunReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl RunReport {
    pub fn ok(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.ok()
    }

    pub fn print(&self) {
        println!(
            "Processed {} tables ({} ok, {} failed).",
            self.outcomes.len(),
            self.ok(),
            self.failed()
        );
        for o in self.outcomes.iter().filter(|o| o.error.is_some()) {
            println!("  {}: {}", o.name, o.error.as_deref().unwrap_or(""));
        }
    }
}

/// Discover -> Process -> Report. Items come from the queue (respecting
/// `--limit`), pass the optional allow-list, then run through
/// fetch -> extract -> contract -> persist one by one or fanned out.
pub async fn run(
    conn: &Connection,
    cfg: &Config,
    extractor: Extractor,
    opts: &RunOptions,
) -> Result<RunReport> {
    let queued = store::fetch_unvisited(conn, opts.limit)?;

    let allow = match &opts.tables_file {
        Some(path) => Some(load_allow_list(path)?),
        None => None,
    };
    let items = filter_allowed(queued, allow.as_ref());
    if items.is_empty() {
        info!("Nothing to process");
        return Ok(RunReport { outcomes: Vec::new() });
    }

    info!(
        "Processing {} tables ({} mode)",
        items.len(),
        if opts.async_mode { "concurrent" } else { "sequential" }
    );

    let fetcher = Fetcher::new(cfg);
    if opts.async_mode {
        process_concurrent(conn, cfg, fetcher, extractor, items).await
    } else {
        process_sequential(conn, cfg, &fetcher, &extractor, items).await
    }
}

async fn process_sequential(
    conn: &Connection,
    cfg: &Config,
    fetcher: &Fetcher,
    extractor: &Extractor,
    items: Vec<QueuedTable>,
) -> Result<RunReport> {
    let pb = progress_bar(items.len());
    let contracts_dir = Path::new(&cfg.contracts_dir);

    let mut outcomes = Vec::with_capacity(items.len());
    for item in items {
        let page = fetcher.fetch_paced(&item.url).await;
        let outcome = match page {
            Ok(page) => match produce_contract(extractor, cfg, &item, &page).await {
                Ok(c) => match persist(conn, contracts_dir, &item.name, &c) {
                    None => ItemOutcome::ok(&item.name),
                    Some(reason) => ItemOutcome::failed(&item.name, reason),
                },
                Err(e) => ItemOutcome::failed(&item.name, e.to_string()),
            },
            Err(e) => ItemOutcome::failed(&item.name, e.to_string()),
        };
        store::mark_visited(conn, item.id)?;
        outcomes.push(outcome);
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(RunReport { outcomes })
}

/// One task per item behind a semaphore; the fixed delay runs before each
/// dispatch, which bounds the request rate only approximately. Results
/// stream back over a channel so this thread stays the single DB writer.
async fn process_concurrent(
    conn: &Connection,
    cfg: &Config,
    fetcher: Fetcher,
    extractor: Extractor,
    items: Vec<QueuedTable>,
) -> Result<RunReport> {
    let pb = progress_bar(items.len());
    let contracts_dir = Path::new(&cfg.contracts_dir).to_path_buf();

    let fetcher = Arc::new(fetcher);
    let extractor = Arc::new(extractor);
    let shared_cfg = Arc::new(cfg.clone());
    let semaphore = Arc::new(Semaphore::new(cfg.concurrency.max(1)));
    let delay = fetcher.delay();

    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(i64, String, Result<Contract, String>)>(cfg.concurrency.max(1) * 2);

    for item in items {
        tokio::time::sleep(delay).await;

        let fetcher = Arc::clone(&fetcher);
        let extractor = Arc::clone(&extractor);
        let shared_cfg = Arc::clone(&shared_cfg);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore never closes");
            let result = match fetcher.fetch(&item.url).await {
                Ok(page) => produce_contract(&extractor, &shared_cfg, &item, &page)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            let _ = tx.send((item.id, item.name, result)).await;
        });
    }
    // rx closes once every task has reported
    drop(tx);

    let mut outcomes = Vec::new();
    while let Some((id, name, result)) = rx.recv().await {
        let outcome = match result {
            Ok(c) => match persist(conn, &contracts_dir, &name, &c) {
                None => ItemOutcome::ok(&name),
                Some(reason) => ItemOutcome::failed(&name, reason),
            },
            Err(e) => ItemOutcome::failed(&name, e),
        };
        store::mark_visited(conn, id)?;
        outcomes.push(outcome);
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(RunReport { outcomes })
}

/// Fetch result -> extraction -> contract. Index-page columns back-fill
/// whatever the detail page did not provide; the detail page wins otherwise.
async fn produce_contract(
    extractor: &Extractor,
    cfg: &Config,
    item: &QueuedTable,
    page: &str,
) -> Result<Contract> {
    let mut extraction = extractor.extract(page, &item.url).await?;
    let record = &mut extraction.record;
    if record.description.is_empty() {
        record.description = item.description.clone();
    }
    if record.category.is_empty() {
        record.category = item.category.clone();
    }
    if record.delivery_class.is_empty() {
        record.delivery_class = item.delivery_class.clone();
    }
    contract::build(&extraction, &item.url, cfg)
}

/// Both sinks are always attempted; a failure in one is logged and does not
/// undo the other. Any failure folds into the item's outcome reason.
fn persist(conn: &Connection, contracts_dir: &Path, name: &str, c: &Contract) -> Option<String> {
    let mut errors = Vec::new();
    if let Err(e) = store::upsert_contract(conn, c) {
        warn!("Store write failed for {}: {}", name, e);
        errors.push(format!("store: {}", e));
    }
    if let Err(e) = sink::write_contract(contracts_dir, name, c) {
        warn!("File write failed for {}: {}", name, e);
        errors.push(format!("file: {}", e));
    }
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

/// Newline-delimited identifiers; blank lines and `#` comments are ignored.
pub fn load_allow_list(path: &Path) -> Result<HashSet<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading allow-list {}", path.display()))?;
    Ok(parse_allow_list(&raw))
}

pub fn parse_allow_list(raw: &str) -> HashSet<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// An empty allow-list means "no filter", matching the behavior of running
/// without one.
pub fn filter_allowed(items: Vec<QueuedTable>, allow: Option<&HashSet<String>>) -> Vec<QueuedTable> {
    match allow {
        Some(set) if !set.is_empty() => {
            items.into_iter().filter(|t| set.contains(&t.name)).collect()
        }
        _ => items,
    }
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            .expect("static template")
            .progress_chars("=> "),
    );
    pb
}

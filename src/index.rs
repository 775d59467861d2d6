use anyhow::{bail, Result};
use tracing::info;

use crate::fetch::Fetcher;
use crate::html;

/// One row of the table index page: everything the queue needs to schedule a
/// detail fetch later.
#[derive(Debug, Clone)]
pub struct DiscoveredTable {
    pub name: String,
    pub url: String,
    pub description: String,
    pub category: String,
    pub delivery_class: String,
}

/// Fetch the index page and return the tables it lists.
pub async fn discover(fetcher: &Fetcher, base_url: &str) -> Result<Vec<DiscoveredTable>> {
    info!("Fetching table index: {}", base_url);
    let page = fetcher.fetch(base_url).await?;
    let tables = parse_index(&page, base_url);
    if tables.is_empty() {
        bail!("index page at {} listed no tables", base_url);
    }
    info!("Discovered {} tables", tables.len());
    Ok(tables)
}

/// Index rows carry [number, linked name, description, category, delivery
/// class]. Header rows have no anchor and drop out; missing trailing cells
/// become empty strings rather than failing the row.
pub fn parse_index(page: &str, base_url: &str) -> Vec<DiscoveredTable> {
    let mut tables = Vec::new();
    for row in html::table_row_html(page) {
        let cells = html::row_cells(&row);
        if cells.len() < 3 {
            continue;
        }
        let Some((href, name)) = html::anchors(&row).into_iter().next() else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        tables.push(DiscoveredTable {
            name,
            url: resolve_url(&href, base_url),
            description: cells.get(2).cloned().unwrap_or_default(),
            category: cells.get(3).cloned().unwrap_or_default(),
            delivery_class: cells.get(4).cloned().unwrap_or_default(),
        });
    }
    tables
}

/// Absolute hrefs pass through; rooted hrefs attach to the site origin;
/// everything else is relative to the index URL.
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rooted) = href.strip_prefix('/') {
        if let Some(origin) = site_origin(base_url) {
            return format!("{}/{}", origin, rooted);
        }
    }
    format!("{}/{}", base_url.trim_end_matches('/'), href.trim_start_matches('/'))
}

fn site_origin(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")? + 3;
    match url[scheme_end..].find('/') {
        Some(path_start) => Some(&url[..scheme_end + path_start]),
        None => Some(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.sapdatasheet.org/abap/tabl/";

    const INDEX: &str = r#"
    <table class="table">
      <tr><th>#</th><th>Table</th><th>Description</th><th>Category</th><th>Class</th></tr>
      <tr><td>1</td><td><a href="marc.html">MARC</a></td><td>Plant Data for Material</td><td>TRANSP</td><td>A</td></tr>
      <tr><td>2</td><td><a href="/abap/tabl/mara.html">MARA</a></td><td>General Material Data</td><td>TRANSP</td><td>A</td></tr>
      <tr><td>3</td><td><a href="https://www.sapdatasheet.org/abap/tabl/t000.html">T000</a></td><td>Clients</td></tr>
    </table>
    "#;

    #[test]
    fn parses_rows_and_skips_header() {
        let tables = parse_index(INDEX, BASE);
        assert_eq!(tables.len(), 3);
        assert_eq!(tables[0].name, "MARC");
        assert_eq!(tables[0].description, "Plant Data for Material");
        assert_eq!(tables[0].category, "TRANSP");
        assert_eq!(tables[0].delivery_class, "A");
    }

    #[test]
    fn resolves_relative_rooted_and_absolute_urls() {
        let tables = parse_index(INDEX, BASE);
        assert_eq!(tables[0].url, "https://www.sapdatasheet.org/abap/tabl/marc.html");
        assert_eq!(tables[1].url, "https://www.sapdatasheet.org/abap/tabl/mara.html");
        assert_eq!(tables[2].url, "https://www.sapdatasheet.org/abap/tabl/t000.html");
    }

    #[test]
    fn short_row_defaults_missing_columns() {
        let tables = parse_index(INDEX, BASE);
        assert_eq!(tables[2].name, "T000");
        assert_eq!(tables[2].category, "");
        assert_eq!(tables[2].delivery_class, "");
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(parse_index("<html><body></body></html>", BASE).is_empty());
    }
}

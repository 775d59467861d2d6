use std::sync::LazyLock;

use regex::Regex;

static ROW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>").unwrap());

/// Drop everything between `<` and `>`, then collapse whitespace.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    normalize_ws(&decode_entities(&out))
}

pub fn normalize_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

pub fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// ASCII-only lowering keeps byte offsets aligned with the original text.
fn to_lower(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { c })
        .collect()
}

/// Inner text of the first element whose opening tag contains `marker`
/// (a tag name or class fragment). Case-insensitive, non-nesting.
pub fn first_tagged_text(html: &str, marker: &str) -> Option<String> {
    let lower = to_lower(html);
    let marker = to_lower(marker);
    let mut from = 0;
    while let Some(rel) = lower[from..].find('<') {
        let open_start = from + rel;
        let open_end = lower[open_start..].find('>')? + open_start + 1;
        if lower[open_start..open_end].contains(&marker) {
            // tag name of this element, so we can find its close
            let name: String = lower[open_start + 1..open_end]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            let close = format!("</{}", name);
            let close_rel = lower[open_end..].find(&close)?;
            let text = strip_tags(&html[open_end..open_end + close_rel]);
            if !text.is_empty() {
                return Some(text);
            }
        }
        from = open_end;
    }
    None
}

/// Inner HTML of every `<tr>` in document order.
pub fn table_row_html(html: &str) -> Vec<String> {
    ROW_RE
        .captures_iter(html)
        .map(|row| row.get(1).map_or("", |m| m.as_str()).to_string())
        .collect()
}

/// Stripped `<td>`/`<th>` cell texts of one row's inner HTML.
pub fn row_cells(row_html: &str) -> Vec<String> {
    CELL_RE
        .captures_iter(row_html)
        .map(|c| strip_tags(c.get(1).map_or("", |m| m.as_str())))
        .collect()
}

/// All `<tr>` rows in document order, each as its stripped cell texts.
/// Rows without `<td>`/`<th>` cells are skipped.
pub fn table_rows(html: &str) -> Vec<Vec<String>> {
    table_row_html(html)
        .iter()
        .map(|row| row_cells(row))
        .filter(|cells| !cells.is_empty())
        .collect()
}

/// All `href` targets of anchors inside `html`, paired with their link text.
pub fn anchors(html: &str) -> Vec<(String, String)> {
    static A_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?is)<a[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap()
    });
    A_RE.captures_iter(html)
        .map(|c| (decode_entities(&c[1]), strip_tags(&c[2])))
        .collect()
}

//! Small extraction helpers shared by the engine parsers.

use scraper::{ElementRef, Selector};
use serde_json::Value;

use crate::{Result, SearchError};

/// Parses a CSS selector, reporting failures as a parsing error for `engine`.
pub fn selector(css: &str, engine: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| {
        SearchError::parsing(engine, format!("Failed to parse selector: {:?}", e)).with_details(css)
    })
}

/// Returns the whitespace-normalized text content of `element`.
pub fn text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the attribute `name` of `element`, or an empty string.
pub fn attr(element: ElementRef<'_>, name: &str) -> String {
    element.value().attr(name).unwrap_or_default().to_string()
}

/// Returns the text of the first descendant matching `sel`, or an empty string.
pub fn child_text(element: ElementRef<'_>, sel: &Selector) -> String {
    element.select(sel).next().map(text).unwrap_or_default()
}

/// Returns attribute `name` of the first descendant matching `sel`, or an empty string.
pub fn child_attr(element: ElementRef<'_>, sel: &Selector, name: &str) -> String {
    element
        .select(sel)
        .next()
        .map(|el| attr(el, name))
        .unwrap_or_default()
}

/// Resolves `href` against `base`. Already absolute links are returned unchanged.
pub fn absolute_url(base: &str, href: &str) -> String {
    if href.is_empty() || href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{rest}");
    }
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}/{}", base.trim_end_matches('/'), href.trim_start_matches('/')),
    }
}

/// Converts a 0–1 fraction to a percentage rounded to two decimals.
pub fn percent(fraction: f64) -> f64 {
    (fraction * 10000.0).round() / 100.0
}

/// Walks a dotted path such as `data.list[0].thumbUrl`.
pub fn deep_get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, indices) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indices.split('[').filter(|s| !s.is_empty()) {
            let index: usize = index.trim_end_matches(']').parse().ok()?;
            current = current.get(index)?;
        }
    }
    Some(current)
}

/// Returns the string at `path`, or an empty string.
pub fn str_at(value: &Value, path: &str) -> String {
    deep_get(value, path).map(value_to_string).unwrap_or_default()
}

/// Returns the first candidate key of `obj` holding a non-empty value.
///
/// Arrays are joined with `", "`; numbers are rendered as text.
pub fn first_non_empty(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .map(value_to_string)
        .find(|s| !s.is_empty())
}

/// Renders scalar JSON values as text. Null and objects become empty.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => String::new(),
    }
}

/// Scans `text` line by line for one starting with `prefix` and decodes the
/// JSON that begins at `skip` bytes into that line.
pub fn find_prefixed_json(text: &str, prefix: &str, skip: usize) -> Option<Value> {
    text.lines()
        .find(|line| line.starts_with(prefix))
        .and_then(|line| line.get(skip..))
        .and_then(|json| serde_json::from_str(json).ok())
}

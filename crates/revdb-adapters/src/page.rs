//! HTML and embedded-JSON helpers shared by the page extractors.

use chrono::{DateTime, NaiveDate, Utc};
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;

use crate::ExtractError;

const PRELOAD_MARKER: &str = "window.__PRELOADED_STATE__";

fn selector(css: &'static str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Malformed {
        what: "selector",
        reason: e.to_string(),
    })
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let collapsed = collapse_whitespace(value);
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub(crate) fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn select_first_text(document: &Html, css: &'static str) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(&n.text().collect::<String>())))
}

pub(crate) fn select_all_texts(document: &Html, css: &'static str) -> Result<Vec<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|n| text_or_none(&n.text().collect::<String>()))
        .collect())
}

pub(crate) fn select_first_attr(
    document: &Html,
    css: &'static str,
    attr: &str,
) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(text_or_none))
}

/// The page's `window.__PRELOADED_STATE__` object, narrowed to its `transformed` branch.
pub(crate) fn preloaded_state(document: &Html) -> Result<JsonValue, ExtractError> {
    let sel = selector("script")?;
    let script = document
        .select(&sel)
        .map(|n| n.text().collect::<String>())
        .find(|text| text.contains(PRELOAD_MARKER))
        .ok_or(ExtractError::MissingData {
            what: "preloaded state",
        })?;

    let raw = script
        .rsplit_once(PRELOAD_MARKER)
        .map(|(_, rest)| rest)
        .unwrap_or_default()
        .trim_start()
        .trim_start_matches('=')
        .trim()
        .trim_end_matches(';')
        .trim();

    let mut state: JsonValue = serde_json::from_str(raw).map_err(|e| ExtractError::Malformed {
        what: "preloaded state",
        reason: e.to_string(),
    })?;
    match state.get_mut("transformed").map(JsonValue::take) {
        Some(transformed) if transformed.is_object() => Ok(transformed),
        _ => Err(ExtractError::MissingData {
            what: "preloaded state `transformed` branch",
        }),
    }
}

/// First `application/ld+json` block, or `Null` when the page has none.
pub(crate) fn linked_data(document: &Html) -> Result<JsonValue, ExtractError> {
    let sel = selector(r#"script[type="application/ld+json"]"#)?;
    let Some(node) = document.select(&sel).next() else {
        return Ok(JsonValue::Null);
    };
    let text = node.text().collect::<String>();
    let value: JsonValue = serde_json::from_str(text.trim()).map_err(|e| ExtractError::Malformed {
        what: "json-ld",
        reason: e.to_string(),
    })?;
    match value {
        JsonValue::Array(items) => Ok(items.into_iter().next().unwrap_or(JsonValue::Null)),
        other => Ok(other),
    }
}

pub(crate) fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

pub(crate) fn json_string(value: &JsonValue, path: &[&str]) -> Option<String> {
    json_str(value, path).and_then(text_or_none)
}

pub(crate) fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    let v = json_at(value, path)?;
    v.as_f64().or_else(|| v.as_str()?.trim().parse().ok())
}

/// Integers arrive as numbers or numeric strings depending on page vintage.
pub(crate) fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    let v = json_at(value, path)?;
    v.as_i64().or_else(|| v.as_str()?.trim().parse().ok())
}

pub(crate) fn json_bool(value: &JsonValue, path: &[&str]) -> bool {
    json_at(value, path).and_then(JsonValue::as_bool).unwrap_or(false)
}

pub(crate) fn json_array<'a>(value: &'a JsonValue, path: &[&str]) -> &'a [JsonValue] {
    json_at(value, path)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// RFC 3339 timestamps, or bare `YYYY-MM-DD` dates taken as midnight UTC.
pub(crate) fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Visible text of an HTML fragment (titles arrive with inline `<em>` markup).
pub(crate) fn fragment_text(html: &str) -> Option<String> {
    let fragment = Html::parse_fragment(html);
    text_or_none(&fragment.root_element().text().collect::<String>())
}

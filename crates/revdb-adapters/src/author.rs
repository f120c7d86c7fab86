use scraper::Html;
use serde_json::Value as JsonValue;

use revdb_core::{AuthorBioRecord, RolePair};

use crate::page::{
    collapse_whitespace, json_i64, json_str, json_string, parse_datetime, preloaded_state,
    select_first_text,
};
use crate::ExtractError;

const EMPTY_BIO_PLACEHOLDER: &str = "bio and get latest news stories and articles.";
const MAX_ROLE_LEN: usize = 35;

/// Titles that show up in the role slots but are not roles.
const ANOMALOUS_TITLES: &[&str] = &[
    "Ars Technica",
    "Dice For Any Occasion",
    "“Made For Love” By Alissa Nutting",
    "Review: Motorola Droid Razr Maxx",
    "Megan Buerger | Staff |",
];

pub(crate) fn extract(body: &str) -> Result<AuthorBioRecord, ExtractError> {
    let document = Html::parse_document(body);
    let state = preloaded_state(&document)?;

    let name = json_string(&state, &["coreDataLayer", "content", "authorNames"])
        .or(select_first_text(&document, "h1")?);
    let roles = RolePair {
        primary: role_title(&state, &["contributor", "header", "title"], name.as_deref()),
        secondary: role_title(&state, &["content4d", "title"], name.as_deref()),
    };

    Ok(AuthorBioRecord {
        bio: bio(&state),
        date_pub: json_str(&state, &["payment", "negotiation", "content", "publishDate"])
            .and_then(parse_datetime),
        revisions: json_i64(&state, &["coreDataLayer", "content", "noOfRevisions"]),
        name,
        roles,
    })
}

fn bio(state: &JsonValue) -> Option<String> {
    let raw = json_str(state, &["head.description"]).or_else(|| json_str(state, &["head.social.description"]))?;
    let raw = raw.trim();
    if raw.is_empty() || raw.to_lowercase().contains(EMPTY_BIO_PLACEHOLDER) {
        None
    } else {
        Some(raw.to_string())
    }
}

/// A letter starts a word unless it follows another letter.
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_cased = false;
    for c in value.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    out
}

/// Collapse whitespace, title-case, and strip the site's own name.
pub fn normalize_role_title(raw: &str) -> String {
    let titled = title_case(&collapse_whitespace(raw));
    titled
        .replace(", Pitchfork", "")
        .replace("Pitchfork", "")
        .trim()
        .to_string()
}

fn role_title(state: &JsonValue, path: &[&str], author_name: Option<&str>) -> Option<String> {
    let title = normalize_role_title(json_str(state, path)?);
    if title.is_empty() || title.chars().count() > MAX_ROLE_LEN || ANOMALOUS_TITLES.contains(&title.as_str()) {
        return None;
    }

    let lowered = title.to_lowercase();
    let name = author_name
        .map(normalize_role_title)
        .map(|n| n.to_lowercase())
        .filter(|n| !n.is_empty());
    if let Some(name) = name {
        if lowered.contains(&name) || name.contains(&lowered) {
            return None;
        }
    }
    Some(title)
}

use scraper::Html;
use serde_json::Value as JsonValue;

use revdb_core::ArtistRecord;

use crate::page::{json_array, json_string, preloaded_state, select_first_attr, select_first_text};
use crate::ExtractError;

pub(crate) fn extract(body: &str) -> Result<ArtistRecord, ExtractError> {
    let document = Html::parse_document(body);
    let name = match select_first_text(&document, "h1")? {
        Some(name) => Some(name),
        None => select_first_attr(&document, r#"meta[property="og:title"]"#, "content")?,
    };

    // Older profile pages ship without preloaded state; the name alone is still useful.
    let genres = match preloaded_state(&document) {
        Ok(state) => genres(&state),
        Err(ExtractError::MissingData { .. }) => Vec::new(),
        Err(e) => return Err(e),
    };

    if name.is_none() && genres.is_empty() {
        return Err(ExtractError::MissingData {
            what: "artist name or genres",
        });
    }
    Ok(ArtistRecord { name, genres })
}

fn genre_names(items: &[JsonValue]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for item in items {
        let Some(name) = json_string(item, &["node", "name"]).or_else(|| json_string(item, &["name"])) else {
            continue;
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Genres of the profiled artist, falling back to the first `genres` list anywhere in the state.
fn genres(state: &JsonValue) -> Vec<String> {
    let own = genre_names(json_array(state, &["artist", "genres"]));
    if !own.is_empty() {
        return own;
    }
    first_genre_list(state).map(genre_names).unwrap_or_default()
}

fn first_genre_list(value: &JsonValue) -> Option<&[JsonValue]> {
    match value {
        JsonValue::Object(map) => {
            if let Some(JsonValue::Array(items)) = map.get("genres") {
                return Some(items.as_slice());
            }
            map.values().find_map(first_genre_list)
        }
        JsonValue::Array(items) => items.iter().find_map(first_genre_list),
        _ => None,
    }
}

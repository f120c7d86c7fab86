use scraper::Html;
use serde_json::Value as JsonValue;

use revdb_core::{AlbumRecord, ArtistRef, AuthorRef, ReviewRecord, ScoredTerm};

use crate::page::{
    collapse_whitespace, fragment_text, json_array, json_at, json_bool, json_f64, json_i64,
    json_str, json_string, linked_data, parse_datetime, preloaded_state, text_or_none,
};
use crate::{ExtractError, SiteExtractor};

pub(crate) fn extract(site: &SiteExtractor, body: &str) -> Result<ReviewRecord, ExtractError> {
    let document = Html::parse_document(body);
    let state = preloaded_state(&document)?;
    let ld = linked_data(&document)?;
    let review = json_at(&state, &["review"]).ok_or(ExtractError::MissingData {
        what: "review section in preloaded state",
    })?;

    let date_pub = json_str(&ld, &["datePublished"])
        .or_else(|| json_str(&state, &["head.firstPublishDate"]))
        .and_then(parse_datetime);
    let date_mod = json_str(&ld, &["dateModified"])
        .or_else(|| json_str(&state, &["head.modifiedDate"]))
        .and_then(parse_datetime);

    Ok(ReviewRecord {
        content_id: json_string(&state, &["coreDataLayer", "content", "contentId"]),
        canonical_url: json_string(&ld, &["url"]).or_else(|| json_string(&state, &["head.canonicalUrl"])),
        revisions: json_i64(&state, &["coreDataLayer", "content", "noOfRevisions"]),
        body: json_str(&ld, &["reviewBody"])
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(ToString::to_string),
        description: json_string(&state, &["head.description"]),
        date_pub,
        date_mod,
        albums: albums(review),
        authors: authors(site, &state, review),
        artists: artists(site, review),
        labels: labels(review),
        keywords: scored_terms(json_array(&state, &["content4d", "keywords", "list"]), "keyword"),
        entities: scored_terms(json_array(&state, &["content4d", "entities"]), "name"),
    })
}

fn labels(review: &JsonValue) -> Vec<String> {
    json_str(review, &["multiReviewHeaderProps", "infoSliceFields", "label"])
        .map(|raw| raw.split(" / ").filter_map(text_or_none).collect())
        .unwrap_or_default()
}

/// Site score is 0.0..=10.0 with one decimal; stored as an integer 0..=100.
fn scaled_score(score: f64) -> Option<u8> {
    if !score.is_finite() {
        return None;
    }
    Some((score * 10.0).round().clamp(0.0, 100.0) as u8)
}

fn albums(review: &JsonValue) -> Vec<AlbumRecord> {
    json_array(review, &["multiReviewHeaderProps", "itemsReviewed"])
        .iter()
        .map(|item| AlbumRecord {
            slug: json_string(item, &["albumId"]),
            title: json_str(item, &["dangerousHed"]).and_then(fragment_text),
            publisher: json_string(item, &["publisher"]),
            release_year: json_i64(item, &["releaseYear"]).and_then(|y| i32::try_from(y).ok()),
            score: json_f64(item, &["musicRating", "score"]).and_then(scaled_score),
            best_new_music: json_bool(item, &["musicRating", "isBestNewMusic"]),
            best_new_reissue: json_bool(item, &["musicRating", "isBestNewReissue"]),
        })
        .filter(|a| a.natural_key().is_some())
        .collect()
}

/// `authorIds` is a comma list parallel to the contributor items.
fn authors(site: &SiteExtractor, state: &JsonValue, review: &JsonValue) -> Vec<AuthorRef> {
    let ids: Vec<String> = json_str(state, &["coreDataLayer", "content", "authorIds"])
        .map(|raw| raw.split(',').filter_map(text_or_none).collect())
        .unwrap_or_default();
    let items = json_array(review, &["contributors", "author", "items"]);

    let count = ids.len().max(items.len());
    (0..count)
        .map(|i| {
            let item = items.get(i);
            AuthorRef {
                site_id: ids.get(i).cloned(),
                name: item
                    .and_then(|it| json_str(it, &["name"]))
                    .map(collapse_whitespace)
                    .filter(|n| !n.is_empty()),
                profile_url: item
                    .and_then(|it| json_str(it, &["url"]))
                    .and_then(|u| site.absolutize(u)),
            }
        })
        .filter(|a| a.natural_key().is_some())
        .collect()
}

fn artists(site: &SiteExtractor, review: &JsonValue) -> Vec<ArtistRef> {
    json_array(review, &["headerProps", "artists"])
        .iter()
        .filter_map(|a| {
            let name = json_string(a, &["name"])?;
            let genres = json_array(a, &["genres"])
                .iter()
                .filter_map(|g| json_string(g, &["node", "name"]))
                .collect();
            Some(ArtistRef {
                name,
                profile_url: json_str(a, &["uri"]).and_then(|u| site.absolutize(u)),
                genres,
            })
        })
        .collect()
}

fn scored_terms(items: &[JsonValue], key: &str) -> Vec<ScoredTerm> {
    items
        .iter()
        .filter_map(|item| {
            Some(ScoredTerm {
                term: json_string(item, &[key])?,
                score: json_f64(item, &["score"]),
            })
        })
        .collect()
}

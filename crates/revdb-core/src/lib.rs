//! Core domain model for the review archive: page classes, extracted records and entity kinds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "revdb-core";

/// What a URL points at, derived from its path. Drives which extractor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageClass {
    Review,
    AuthorProfile,
    ArtistProfile,
    Sitemap,
    Other,
}

impl PageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageClass::Review => "review",
            PageClass::AuthorProfile => "author-profile",
            PageClass::ArtistProfile => "artist-profile",
            PageClass::Sitemap => "sitemap",
            PageClass::Other => "other",
        }
    }

    /// `Other` pages are recorded in the url table but never fetched.
    pub fn is_fetchable(&self) -> bool {
        !matches!(self, PageClass::Other)
    }
}

impl fmt::Display for PageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "review" => Ok(PageClass::Review),
            "author-profile" | "author" => Ok(PageClass::AuthorProfile),
            "artist-profile" | "artist" => Ok(PageClass::ArtistProfile),
            "sitemap" => Ok(PageClass::Sitemap),
            "other" => Ok(PageClass::Other),
            other => Err(format!("unknown page classification `{other}`")),
        }
    }
}

/// Sitemap bucket a URL was listed under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapPeriod {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub week: Option<u32>,
}

/// Classification flags persisted on the url row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlFlags {
    pub is_review: bool,
    pub is_album: bool,
    pub is_author: bool,
    pub is_artist: bool,
    pub is_sitemap: bool,
}

impl UrlFlags {
    /// Recover the page class from stored flags (used when re-seeding from the url table).
    pub fn class(&self) -> PageClass {
        if self.is_review {
            PageClass::Review
        } else if self.is_author {
            PageClass::AuthorProfile
        } else if self.is_artist {
            PageClass::ArtistProfile
        } else if self.is_sitemap {
            PageClass::Sitemap
        } else {
            PageClass::Other
        }
    }
}

/// A unit of work: one URL with its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTarget {
    pub url: String,
    pub class: PageClass,
    #[serde(default)]
    pub flags: UrlFlags,
    #[serde(default)]
    pub period: SitemapPeriod,
}

impl PageTarget {
    pub fn new(url: impl Into<String>, class: PageClass) -> Self {
        let flags = UrlFlags {
            is_review: class == PageClass::Review,
            is_album: class == PageClass::Review,
            is_author: class == PageClass::AuthorProfile,
            is_artist: class == PageClass::ArtistProfile,
            is_sitemap: class == PageClass::Sitemap,
        };
        Self {
            url: url.into(),
            class,
            flags,
            period: SitemapPeriod::default(),
        }
    }
}

/// Typed output of the extractor. Consumers match on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageRecord {
    Discovery(UrlDiscovery),
    Review(ReviewRecord),
    Artist(ArtistRecord),
    AuthorBio(AuthorBioRecord),
}

impl PageRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            PageRecord::Discovery(_) => "discovery",
            PageRecord::Review(_) => "review",
            PageRecord::Artist(_) => "artist",
            PageRecord::AuthorBio(_) => "author_bio",
        }
    }

    /// Links found inside the record that should be queued after it is persisted.
    pub fn follow_up_targets(&self) -> Vec<PageTarget> {
        match self {
            PageRecord::Discovery(discovery) => discovery.links.clone(),
            PageRecord::Review(review) => {
                let authors = review
                    .authors
                    .iter()
                    .filter_map(|a| a.profile_url.as_deref())
                    .map(|url| PageTarget::new(url, PageClass::AuthorProfile));
                let artists = review
                    .artists
                    .iter()
                    .filter_map(|a| a.profile_url.as_deref())
                    .map(|url| PageTarget::new(url, PageClass::ArtistProfile));
                authors.chain(artists).collect()
            }
            PageRecord::Artist(_) | PageRecord::AuthorBio(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UrlDiscovery {
    pub links: Vec<PageTarget>,
}

/// Everything a single album review page yields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub content_id: Option<String>,
    pub canonical_url: Option<String>,
    pub revisions: Option<i64>,
    pub body: Option<String>,
    pub description: Option<String>,
    pub date_pub: Option<DateTime<Utc>>,
    pub date_mod: Option<DateTime<Utc>>,
    pub albums: Vec<AlbumRecord>,
    pub authors: Vec<AuthorRef>,
    pub artists: Vec<ArtistRef>,
    pub labels: Vec<String>,
    pub keywords: Vec<ScoredTerm>,
    pub entities: Vec<ScoredTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumRecord {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub publisher: Option<String>,
    pub release_year: Option<i32>,
    /// Site score scaled to 0..=100.
    pub score: Option<u8>,
    pub best_new_music: bool,
    pub best_new_reissue: bool,
}

impl AlbumRecord {
    /// Site slug when the page carries one, otherwise the descriptive tuple.
    /// `None` when there is nothing to identify the album by.
    pub fn natural_key(&self) -> Option<String> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        };
        if let Some(slug) = present(&self.slug) {
            return Some(slug);
        }
        let title = present(&self.title);
        let publisher = present(&self.publisher);
        if title.is_none() && publisher.is_none() && self.release_year.is_none() {
            return None;
        }
        Some(format!(
            "{}|{}|{}",
            title.unwrap_or_default(),
            publisher.unwrap_or_default(),
            self.release_year.map(|y| y.to_string()).unwrap_or_default()
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub site_id: Option<String>,
    pub name: Option<String>,
    pub profile_url: Option<String>,
}

impl AuthorRef {
    pub fn natural_key(&self) -> Option<String> {
        self.profile_url
            .clone()
            .or_else(|| self.site_id.clone())
            .or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub name: String,
    pub profile_url: Option<String>,
    pub genres: Vec<String>,
}

impl ArtistRef {
    pub fn natural_key(&self) -> String {
        self.profile_url.clone().unwrap_or_else(|| self.name.clone())
    }
}

/// Keyword or named entity with the site's relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTerm {
    pub term: String,
    pub score: Option<f64>,
}

/// Artist profile page. The profile URL is the page URL itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub name: Option<String>,
    pub genres: Vec<String>,
}

/// Author profile page. The profile URL is the page URL itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorBioRecord {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub date_pub: Option<DateTime<Utc>>,
    pub revisions: Option<i64>,
    pub roles: RolePair,
}

/// The two role titles an author page shows, e.g. (Editor, Contributor).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RolePair {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

impl RolePair {
    pub fn new(primary: Option<&str>, secondary: Option<&str>) -> Self {
        Self {
            primary: primary.map(ToString::to_string),
            secondary: secondary.map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Url,
    Artist,
    Author,
    Album,
    Label,
    Genre,
    Keyword,
    Entity,
    AuthorType,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Url => "url",
            EntityKind::Artist => "artist",
            EntityKind::Author => "author",
            EntityKind::Album => "album",
            EntityKind::Label => "label",
            EntityKind::Genre => "genre",
            EntityKind::Keyword => "keyword",
            EntityKind::Entity => "entity",
            EntityKind::AuthorType => "author_type",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline step recorded in the scraping event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStep {
    Fetch,
    Extract,
    Persist,
}

impl ScrapeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStep::Fetch => "fetch",
            ScrapeStep::Extract => "extract",
            ScrapeStep::Persist => "persist",
        }
    }
}

impl fmt::Display for ScrapeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-width UTC timestamp text; lexical order matches chronological order.
pub fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

//! Page extractors for the review site: sitemaps, album reviews, author and artist profiles.

mod artist;
mod author;
mod classify;
mod page;
mod review;
mod sitemap;

pub use author::normalize_role_title;
pub use classify::{classify_url, sitemap_period, target_for_url};

use revdb_core::{PageClass, PageRecord, PageTarget};
use thiserror::Error;
use url::Url;

pub const CRATE_NAME: &str = "revdb-adapters";
pub const DEFAULT_SITE_ROOT: &str = "https://pitchfork.com";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("missing {what}")]
    MissingData { what: &'static str },
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },
    #[error("no extractor for {0} pages")]
    Unsupported(PageClass),
}

/// Turns a fetched body into one typed record. Pure: no I/O, no shared state.
pub trait Extractor: Send + Sync {
    fn extract(&self, target: &PageTarget, body: &str) -> Result<PageRecord, ExtractError>;
}

/// Extractor for the live site's page formats.
#[derive(Debug, Clone)]
pub struct SiteExtractor {
    site_root: Url,
}

impl SiteExtractor {
    pub fn new(site_root: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            site_root: Url::parse(site_root)?,
        })
    }

    pub fn site_root(&self) -> &Url {
        &self.site_root
    }

    /// Absolute URL for a site-relative link. Already-absolute links pass through.
    pub(crate) fn absolutize(&self, link: &str) -> Option<String> {
        let link = link.trim();
        if link.is_empty() {
            return None;
        }
        self.site_root.join(link).ok().map(String::from)
    }
}

impl Default for SiteExtractor {
    fn default() -> Self {
        Self {
            site_root: Url::parse(DEFAULT_SITE_ROOT).expect("default site root is a valid url"),
        }
    }
}

impl Extractor for SiteExtractor {
    fn extract(&self, target: &PageTarget, body: &str) -> Result<PageRecord, ExtractError> {
        match target.class {
            PageClass::Sitemap => sitemap::extract(target, body).map(PageRecord::Discovery),
            PageClass::Review => review::extract(self, body).map(PageRecord::Review),
            PageClass::AuthorProfile => author::extract(body).map(PageRecord::AuthorBio),
            PageClass::ArtistProfile => artist::extract(body).map(PageRecord::Artist),
            PageClass::Other => Err(ExtractError::Unsupported(PageClass::Other)),
        }
    }
}

use revdb_core::{PageClass, PageTarget, SitemapPeriod, UrlFlags};
use url::Url;

/// Classify a URL by its path. Track reviews and news carry flags but are `Other`.
pub fn classify_url(url: &str) -> PageClass {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return PageClass::Other;
    };
    let path = parsed.path();
    if path.ends_with("sitemap.xml") {
        PageClass::Sitemap
    } else if path.contains("/reviews/albums/") {
        PageClass::Review
    } else if path.contains("/staff/") {
        PageClass::AuthorProfile
    } else if path.contains("/artists/") {
        PageClass::ArtistProfile
    } else {
        PageClass::Other
    }
}

fn url_flags(url: &str, class: PageClass) -> UrlFlags {
    let path = Url::parse(url.trim())
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    UrlFlags {
        is_review: path.contains("/reviews/"),
        is_album: path.contains("/albums/"),
        is_author: path.contains("/staff/"),
        is_artist: path.contains("/artists/"),
        is_sitemap: class == PageClass::Sitemap,
    }
}

/// Year / month / week from a sitemap URL's query string.
pub fn sitemap_period(url: &str) -> SitemapPeriod {
    let mut period = SitemapPeriod::default();
    let Ok(parsed) = Url::parse(url.trim()) else {
        return period;
    };
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "year" => period.year = value.parse().ok(),
            "month" => period.month = value.parse().ok(),
            "week" => period.week = value.parse().ok(),
            _ => {}
        }
    }
    period
}

/// Work item for a bare URL: class and flags from the path, period from the query when it is a sitemap.
pub fn target_for_url(url: &str) -> PageTarget {
    let url = url.trim();
    let class = classify_url(url);
    PageTarget {
        url: url.to_string(),
        class,
        flags: url_flags(url, class),
        period: if class == PageClass::Sitemap {
            sitemap_period(url)
        } else {
            SitemapPeriod::default()
        },
    }
}

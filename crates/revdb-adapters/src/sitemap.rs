use scraper::Html;
use tracing::debug;

use revdb_core::{PageClass, PageTarget, UrlDiscovery};

use crate::classify::target_for_url;
use crate::page::select_all_texts;
use crate::ExtractError;

/// Every `<loc>` in a sitemap. Links listed by a weekly sitemap inherit its period;
/// nested sitemaps carry their own.
pub(crate) fn extract(target: &PageTarget, body: &str) -> Result<UrlDiscovery, ExtractError> {
    let document = Html::parse_document(body);
    let locs = select_all_texts(&document, "loc")?;
    if locs.is_empty() && !body.contains("urlset") && !body.contains("sitemapindex") {
        return Err(ExtractError::MissingData {
            what: "sitemap <loc> entries",
        });
    }

    let links: Vec<PageTarget> = locs
        .iter()
        .map(|loc| {
            let mut link = target_for_url(loc);
            if link.class != PageClass::Sitemap {
                link.period = target.period;
            }
            link
        })
        .collect();
    debug!(url = %target.url, links = links.len(), "sitemap parsed");
    Ok(UrlDiscovery { links })
}

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::fs;

use revdb_adapters::{sitemap_period, target_for_url};
use revdb_core::{PageClass, PageTarget};

#[derive(Debug, Clone, Deserialize)]
struct SeedFile {
    seeds: Vec<SeedEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct SeedEntry {
    url: String,
    #[serde(default)]
    classification: Option<PageClass>,
}

/// Work item for a URL given on the command line; the class comes from its path.
pub fn seed_from_url(url: &str) -> PageTarget {
    target_for_url(url)
}

/// Yearly sitemap indexes for `from..=to`.
pub fn yearly_sitemaps(site_root: &str, from: i32, to: i32) -> Vec<PageTarget> {
    let root = site_root.trim_end_matches('/');
    (from.min(to)..=from.max(to))
        .map(|year| target_for_url(&format!("{root}/sitemap.xml?year={year}")))
        .collect()
}

fn entry_target(entry: SeedEntry) -> PageTarget {
    let derived = target_for_url(&entry.url);
    match entry.classification {
        Some(class) if class != derived.class => {
            let mut target = PageTarget::new(derived.url, class);
            if class == PageClass::Sitemap {
                target.period = sitemap_period(&target.url);
            }
            target
        }
        _ => derived,
    }
}

pub fn parse_seed_file(text: &str) -> Result<Vec<PageTarget>> {
    let file: SeedFile = serde_yaml::from_str(text).context("parsing seed file")?;
    if file.seeds.iter().any(|s| s.url.trim().is_empty()) {
        bail!("seed file lists an entry with an empty url");
    }
    Ok(file.seeds.into_iter().map(entry_target).collect())
}

pub async fn load_seed_file(path: &Path) -> Result<Vec<PageTarget>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_seed_file(&text).with_context(|| format!("loading seeds from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_range_expands_to_sitemap_indexes() {
        let seeds = yearly_sitemaps("https://pitchfork.com/", 2021, 2019);
        let urls: Vec<&str> = seeds.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://pitchfork.com/sitemap.xml?year=2019",
                "https://pitchfork.com/sitemap.xml?year=2020",
                "https://pitchfork.com/sitemap.xml?year=2021",
            ]
        );
        assert!(seeds.iter().all(|s| s.class == PageClass::Sitemap));
        assert_eq!(seeds[1].period.year, Some(2020));
    }

    #[test]
    fn seed_file_classification_overrides_path() {
        let yaml = r#"
seeds:
  - url: https://pitchfork.com/reviews/albums/beach-bunny-honeymoon/
  - url: https://pitchfork.com/people/jane-doe/
    classification: author-profile
"#;
        let seeds = parse_seed_file(yaml).expect("seeds");
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].class, PageClass::Review);
        assert_eq!(seeds[1].class, PageClass::AuthorProfile);
        assert!(seeds[1].flags.is_author);
    }

    #[test]
    fn bad_seed_files_are_rejected() {
        assert!(parse_seed_file("seeds:\n  - url: ''\n").is_err());
        assert!(parse_seed_file("seeds:\n  - url: x\n    classification: podcast\n").is_err());
    }

    #[tokio::test]
    async fn seed_file_is_read_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seeds.yaml");
        tokio::fs::write(&path, "seeds:\n  - url: https://pitchfork.com/staff/jane-doe/\n")
            .await
            .expect("write");
        let seeds = load_seed_file(&path).await.expect("load");
        assert_eq!(seeds[0].class, PageClass::AuthorProfile);

        let err = load_seed_file(&dir.path().join("missing.yaml")).await.unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }
}

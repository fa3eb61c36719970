use std::collections::HashSet;

use chrono::Utc;
use herald_core::error::AppError;
use herald_core::models::Candidate;
use herald_core::source::Source;
use herald_core::traits::{CandidateProvider, Fetcher};
use scraper::{Html, Selector};
use url::Url;

use crate::extract::text::clean_inline;

/// Tried in order when the source has no `link_selector`.
const DEFAULT_SELECTORS: &[&str] = &[
    "article a[href]",
    "h2 a[href], h3 a[href]",
    "a[href]",
];

/// Discovers candidates by reading links off the source's listing page.
///
/// Only same-host http(s) links are kept, in document order, de-duplicated
/// after fragment removal.
#[derive(Clone)]
pub struct LinkListingProvider<F> {
    fetcher: F,
}

impl<F: Fetcher> LinkListingProvider<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: Fetcher> CandidateProvider for LinkListingProvider<F> {
    async fn discover(&self, source: &Source, limit: usize) -> Result<Vec<Candidate>, AppError> {
        let html = self.fetcher.fetch(&source.feed_url).await?;
        let candidates = parse_listing(&html, source, limit)?;
        tracing::debug!(
            source_id = %source.id,
            feed_url = %source.feed_url,
            count = candidates.len(),
            "Parsed listing page"
        );
        Ok(candidates)
    }
}

/// Extract up to `limit` article links from a listing page.
pub fn parse_listing(html: &str, source: &Source, limit: usize) -> Result<Vec<Candidate>, AppError> {
    let base = Url::parse(&source.feed_url).map_err(|e| {
        AppError::ConfigError(format!(
            "Source {} has an invalid feed URL {}: {e}",
            source.id, source.feed_url
        ))
    })?;

    let selectors: Vec<Selector> = match &source.config.link_selector {
        Some(custom) => vec![Selector::parse(custom).map_err(|e| {
            AppError::ConfigError(format!(
                "Source {} has an invalid link selector '{custom}': {e}",
                source.id
            ))
        })?],
        None => DEFAULT_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect(),
    };

    let document = Html::parse_document(html);
    for selector in &selectors {
        let candidates = collect_links(&document, selector, &base, source, limit);
        if !candidates.is_empty() {
            return Ok(candidates);
        }
    }
    Ok(Vec::new())
}

fn collect_links(
    document: &Html,
    selector: &Selector,
    base: &Url,
    source: &Source,
    limit: usize,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let discovered_at = Utc::now();

    document
        .select(selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let mut url = base.join(href.trim()).ok()?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str() != base.host_str() {
                return None;
            }
            url.set_fragment(None);
            if url.path() == base.path() && url.query() == base.query() {
                return None;
            }
            let url = url.to_string();
            if !seen.insert(url.clone()) {
                return None;
            }
            let hint = clean_inline(&el.text().collect::<String>());
            Some((url, hint))
        })
        .take(limit)
        .enumerate()
        .map(|(position, (url, hint))| {
            let mut candidate = Candidate::new(url, source.id.clone()).with_position(position);
            candidate.discovered_at = discovered_at;
            if !hint.is_empty() {
                candidate = candidate.with_title_hint(hint);
            }
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use herald_core::source::SourceConfig;
    use herald_core::testutil::{MockFetcher, MockResponse};

    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <nav><a href="/about">About</a></nav>
          <article><h2><a href="/2024/05/dam-vote">Council votes on dam</a></h2></article>
          <article><h2><a href="https://news.example/2024/05/school-budget#top">School
              budget   passes</a></h2></article>
          <article><a href="/2024/05/dam-vote#comments">12 comments</a></article>
          <article><a href="https://elsewhere.example/story">Partner story</a></article>
          <article><a href="mailto:desk@news.example">Tips</a></article>
        </body></html>
    "#;

    fn source() -> Source {
        Source::new("news", "https://news.example/latest")
    }

    #[test]
    fn test_parse_listing_same_host_in_order() {
        let candidates = parse_listing(LISTING, &source(), 10).unwrap();
        let urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://news.example/2024/05/dam-vote",
                "https://news.example/2024/05/school-budget",
            ]
        );
        assert_eq!(candidates[1].title_hint.as_deref(), Some("School budget passes"));
        assert_eq!(candidates[1].position, 1);
        assert!(candidates.iter().all(|c| c.source_id == "news"));
    }

    #[test]
    fn test_parse_listing_respects_limit() {
        let candidates = parse_listing(LISTING, &source(), 1).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_falls_back_to_any_link() {
        let html = r#"<ul><li><a href="/a/1">One</a></li><li><a href="/a/2">Two</a></li></ul>"#;
        let candidates = parse_listing(html, &source(), 10).unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_custom_selector() {
        let source = source().with_config(SourceConfig {
            link_selector: Some("nav a".into()),
            ..Default::default()
        });
        let candidates = parse_listing(LISTING, &source, 10).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://news.example/about");
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let source = source().with_config(SourceConfig {
            link_selector: Some("a[[".into()),
            ..Default::default()
        });
        let err = parse_listing(LISTING, &source, 10).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_discover_fetches_feed_url() {
        let fetcher = MockFetcher::default().respond(
            "https://news.example/latest",
            vec![MockResponse::Html(LISTING.to_string())],
        );
        let provider = LinkListingProvider::new(fetcher.clone());
        let candidates = provider.discover(&source(), 5).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(fetcher.calls(), ["https://news.example/latest"]);
    }

    #[tokio::test]
    async fn test_discover_propagates_fetch_errors() {
        let fetcher = MockFetcher::default().respond(
            "https://news.example/latest",
            vec![MockResponse::Status(503)],
        );
        let provider = LinkListingProvider::new(fetcher);
        let err = provider.discover(&source(), 5).await.unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 503, .. }));
    }
}

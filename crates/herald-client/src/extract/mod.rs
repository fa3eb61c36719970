//! Multi-strategy article extractor.
//!
//! Three strategies run over the parsed document in priority order
//! (JSON-LD, selector heuristics, meta tags). Each offers values per field;
//! for every field the first offer passing that field's validity check wins.
//! Tracing only records the offers, so traced and untraced output match.

mod boilerplate;
mod json_ld;
mod meta;
mod selectors;
pub mod text;

use std::collections::HashMap;

use herald_core::dedup::content_hash;
use herald_core::models::{ExtractionResult, ExtractionTrace, Field, FieldTrace, Rejection, StrategyKind};
use herald_core::traits::ContentExtractor;
use scraper::Html;

/// One value a strategy proposes for a field.
#[derive(Debug, Clone)]
pub(crate) struct Offer {
    pub(crate) field: Field,
    pub(crate) selector: String,
    pub(crate) value: String,
}

/// Everything a single strategy found, in its own preference order.
#[derive(Debug, Default)]
pub(crate) struct PartialFields {
    pub(crate) offers: Vec<Offer>,
}

impl PartialFields {
    pub(crate) fn offer(&mut self, field: Field, selector: &str, value: String) {
        if !value.is_empty() {
            self.offers.push(Offer {
                field,
                selector: selector.to_string(),
                value,
            });
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub min_body_chars: usize,
    pub max_title_chars: usize,
    pub max_author_chars: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_body_chars: 250,
            max_title_chars: 300,
            max_author_chars: 120,
        }
    }
}

/// HTML article extractor backed by `scraper`.
#[derive(Debug, Clone, Default)]
pub struct ArticleExtractor {
    config: ExtractorConfig,
}

impl ArticleExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    fn accepts(&self, offer: &Offer) -> bool {
        let chars = offer.value.chars().count();
        match offer.field {
            Field::Title => chars <= self.config.max_title_chars,
            Field::Body => chars >= self.config.min_body_chars,
            Field::Author => chars <= self.config.max_author_chars,
            Field::PublishedAt => text::parse_date(&offer.value).is_some(),
        }
    }
}

fn quality_score(body: &str, paragraphs: usize, has_author: bool, has_date: bool) -> u8 {
    let length = body.chars().count().min(3000) * 50 / 3000;
    let structure = paragraphs.min(6) * 5;
    let author = if has_author { 10 } else { 0 };
    let date = if has_date { 10 } else { 0 };
    (length + structure + author + date).min(100) as u8
}

impl ContentExtractor for ArticleExtractor {
    fn extract(&self, html: &str, url: &str, trace: bool) -> ExtractionResult {
        let doc = Html::parse_document(html);
        let strategies = [
            (StrategyKind::JsonLd, json_ld::extract(&doc)),
            (StrategyKind::Selectors, selectors::extract(&doc)),
            (StrategyKind::Meta, meta::extract(&doc)),
        ];

        let mut trace = trace.then(ExtractionTrace::default);
        let mut winners: HashMap<Field, (StrategyKind, &Offer)> = HashMap::new();
        let mut longest_body = 0;

        for (kind, partial) in &strategies {
            for offer in &partial.offers {
                if let Some(t) = trace.as_mut() {
                    t.considered.push(FieldTrace {
                        field: offer.field,
                        strategy: *kind,
                        selector: offer.selector.clone(),
                        value: offer.value.clone(),
                    });
                }
                if offer.field == Field::Body {
                    longest_body = longest_body.max(offer.value.chars().count());
                }
                if !winners.contains_key(&offer.field) && self.accepts(offer) {
                    winners.insert(offer.field, (*kind, offer));
                }
            }
        }

        if let Some(t) = trace.as_mut() {
            t.selected = Field::ALL
                .iter()
                .filter_map(|field| winners.get(field))
                .map(|(kind, offer)| FieldTrace {
                    field: offer.field,
                    strategy: *kind,
                    selector: offer.selector.clone(),
                    value: offer.value.clone(),
                })
                .collect();
        }

        let value = |field: Field| winners.get(&field).map(|(_, o)| o.value.clone());

        let rejection = match (value(Field::Body), value(Field::Title)) {
            (None, _) => Some(Rejection::BodyTooShort {
                length: longest_body,
                minimum: self.config.min_body_chars,
            }),
            (Some(_), None) => Some(Rejection::MissingTitle),
            _ => None,
        };
        if let Some(rejection) = rejection {
            tracing::debug!(%url, %rejection, "Extraction rejected by quality gate");
            return ExtractionResult::rejected(rejection, trace);
        }

        let title = value(Field::Title).unwrap_or_default();
        let body = value(Field::Body).unwrap_or_default();
        let author = value(Field::Author);
        let published_at = value(Field::PublishedAt).and_then(|d| text::parse_date(&d));
        let paragraph_count = body.split("\n\n").count();

        ExtractionResult {
            quality_score: quality_score(
                &body,
                paragraph_count,
                author.is_some(),
                published_at.is_some(),
            ),
            content_hash: content_hash(&body),
            title,
            body,
            author,
            published_at,
            paragraph_count,
            rejection: None,
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    const BODY_TEXT: &str = "The regional water board voted on Tuesday to delay the dam \
        expansion by a year, citing unresolved questions about downstream habitat. \
        Board members said the study commissioned last spring had not addressed \
        sediment flows. Residents who packed the hearing room applauded the \
        decision, while contractors warned that costs would rise sharply.";

    fn json_ld_only() -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@context": "https://schema.org", "@type": "NewsArticle",
              "headline": "Water board delays dam expansion",
              "articleBody": "{BODY_TEXT}",
              "author": {{"@type": "Person", "name": "Ana Ruiz"}},
              "datePublished": "2024-05-01T09:30:00Z"}}
            </script></head><body><div id="app"></div></body></html>"#
        )
    }

    fn selectors_only() -> String {
        let paragraph = "<p>Crews worked through the night to clear debris from the \
            river crossing after the storm. Officials expect the bridge to reopen \
            by Friday once inspectors sign off on the repairs.</p>";
        format!(
            r#"<html><body>
              <nav><a href="/">Home</a> <a href="/local">Local</a></nav>
              <h1>Storm closes river bridge</h1>
              <time datetime="2024-06-12T07:00:00Z">June 12</time>
              <article>{paragraph}{paragraph}
                <p><a href="/related">More storm coverage</a></p>
              </article>
              <footer><p>Copyright Daily Planet</p></footer>
            </body></html>"#
        )
    }

    #[test]
    fn test_json_ld_fills_all_fields() {
        let extractor = ArticleExtractor::default();
        let result = extractor.extract(&json_ld_only(), "https://planet.example/dam", true);

        assert!(result.rejection.is_none());
        assert_eq!(result.title, "Water board delays dam expansion");
        assert_eq!(result.author.as_deref(), Some("Ana Ruiz"));
        assert_eq!(
            result.published_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap())
        );
        assert!(result.body.starts_with("The regional water board"));
        assert_eq!(result.content_hash.len(), 64);

        let trace = result.trace.as_ref().unwrap();
        for field in Field::ALL {
            assert_eq!(
                trace.for_field(field).map(|t| t.strategy),
                Some(StrategyKind::JsonLd),
                "{field:?}"
            );
        }
    }

    #[test]
    fn test_selector_heuristics_without_json_ld() {
        let extractor = ArticleExtractor::default();
        let result = extractor.extract(&selectors_only(), "https://planet.example/bridge", true);

        assert!(result.rejection.is_none());
        assert_eq!(result.title, "Storm closes river bridge");
        assert_eq!(result.paragraph_count, 2);
        assert!(!result.body.contains("More storm coverage"));
        assert!(!result.body.contains("Copyright"));
        assert_eq!(
            result.published_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 12, 7, 0, 0).unwrap())
        );
        assert!(result.author.is_none());

        let trace = result.trace.unwrap();
        assert_eq!(trace.for_field(Field::Title).unwrap().selector, "h1");
        assert_eq!(trace.for_field(Field::Body).unwrap().selector, "article");
        for field in [Field::Title, Field::Body, Field::PublishedAt] {
            assert_eq!(
                trace.for_field(field).unwrap().strategy,
                StrategyKind::Selectors
            );
        }
    }

    #[test]
    fn test_meta_only_short_description_is_rejected() {
        let html = r#"<html><head>
            <meta property="og:title" content="Quick update">
            <meta property="og:description" content="More details to follow.">
        </head><body></body></html>"#;
        let result = ArticleExtractor::default().extract(html, "https://planet.example/q", false);

        assert_eq!(
            result.rejection,
            Some(Rejection::BodyTooShort {
                length: 23,
                minimum: 250
            })
        );
        assert!(result.is_empty());
        assert!(result.title.is_empty());
        assert!(result.content_hash.is_empty());
        assert_eq!(result.quality_score, 0);
    }

    #[test]
    fn test_missing_title_is_rejected() {
        let html = format!("<article><p>{BODY_TEXT}</p></article>");
        let result = ArticleExtractor::default().extract(&html, "https://planet.example/x", false);
        assert_eq!(result.rejection, Some(Rejection::MissingTitle));
    }

    #[test]
    fn test_field_merge_falls_through_invalid_values() {
        let html = format!(
            r#"<html><head>
              <script type="application/ld+json">
                {{"@type": "Article", "headline": "Council budget passes",
                  "articleBody": "Too short.", "datePublished": "sometime"}}
              </script>
              <meta property="article:published_time" content="2024-02-03">
            </head><body><article><p>{BODY_TEXT}</p></article></body></html>"#
        );
        let result = ArticleExtractor::default().extract(&html, "https://planet.example/b", true);
        let trace = result.trace.as_ref().unwrap();

        assert_eq!(trace.for_field(Field::Title).unwrap().strategy, StrategyKind::JsonLd);
        assert_eq!(trace.for_field(Field::Body).unwrap().strategy, StrategyKind::Selectors);
        assert_eq!(trace.for_field(Field::PublishedAt).unwrap().strategy, StrategyKind::Meta);
        assert!(
            trace
                .considered
                .iter()
                .any(|t| t.field == Field::Body && t.value == "Too short.")
        );
    }

    #[test]
    fn test_trace_does_not_change_output() {
        let extractor = ArticleExtractor::default();
        for html in [json_ld_only(), selectors_only()] {
            let plain = extractor.extract(&html, "https://planet.example/a", false);
            let traced = extractor.extract(&html, "https://planet.example/a", true);
            assert!(plain.trace.is_none());
            assert!(traced.trace.is_some());
            assert_eq!(ExtractionResult { trace: None, ..traced }, plain);
        }
    }

    #[test]
    fn test_malformed_html_degrades() {
        let result = ArticleExtractor::default().extract(
            "<html><body><article><p>unclosed <b>tags",
            "https://planet.example/m",
            false,
        );
        assert!(result.rejection.is_some());
        assert!(result.is_empty());
    }

    #[test]
    fn test_quality_score_components() {
        assert_eq!(quality_score("", 0, false, false), 0);
        let long = "x".repeat(3000);
        assert_eq!(quality_score(&long, 6, true, true), 100);
        assert_eq!(quality_score(&"x".repeat(300), 1, false, true), 5 + 5 + 10);
    }
}

use herald_core::models::Field;
use scraper::{ElementRef, Html, Selector};

use super::PartialFields;
use super::boilerplate::paragraphs;
use super::text::{clean_author, clean_inline};

const TITLE: &[&str] = &["[itemprop=headline]", "article h1", "h1"];

const BODY: &[&str] = &[
    "[itemprop=articleBody]",
    "article",
    "main",
    "[role=main]",
    ".article-body",
    ".article-content",
    ".story-body",
    ".entry-content",
    ".post-content",
    "#content",
];

const AUTHOR: &[&str] = &["[itemprop=author]", "[rel=author]", ".byline", ".author"];

fn first<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).next()
}

fn text_of(el: ElementRef<'_>) -> String {
    clean_inline(&el.text().collect::<String>())
}

pub(crate) fn extract(doc: &Html) -> PartialFields {
    let mut fields = PartialFields::default();

    for css in TITLE {
        if let Some(el) = first(doc, css) {
            fields.offer(Field::Title, css, text_of(el));
        }
    }

    for css in BODY {
        if let Some(container) = first(doc, css) {
            fields.offer(Field::Body, css, paragraphs(container).join("\n\n"));
        }
    }

    let name_selector = Selector::parse("[itemprop=name]").ok();
    for css in AUTHOR {
        if let Some(el) = first(doc, css) {
            // itemprop=author is often a Person wrapper around a name.
            let name = name_selector
                .as_ref()
                .and_then(|s| el.select(s).next())
                .unwrap_or(el);
            fields.offer(Field::Author, css, clean_author(&text_of(name)));
        }
    }

    if let Some(el) = first(doc, "time[datetime]") {
        if let Some(dt) = el.value().attr("datetime") {
            fields.offer(Field::PublishedAt, "time[datetime]", dt.trim().to_string());
        }
    }
    if let Some(el) = first(doc, "[itemprop=datePublished]") {
        let value = el
            .value()
            .attr("content")
            .or_else(|| el.value().attr("datetime"))
            .map(str::to_string)
            .unwrap_or_else(|| text_of(el));
        fields.offer(Field::PublishedAt, "[itemprop=datePublished]", value.trim().to_string());
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_wrapper_and_date_attrs() {
        let html = r#"<div itemprop="author" itemscope><span itemprop="name">Mia Ortiz</span>
            <span>Staff writer</span></div>
            <meta itemprop="datePublished" content="2024-03-02">"#;
        let fields = extract(&Html::parse_document(html));
        let author: Vec<_> = fields.offers.iter().filter(|o| o.field == Field::Author).collect();
        assert_eq!(author[0].value, "Mia Ortiz");
        assert_eq!(author[0].selector, "[itemprop=author]");
        let date: Vec<_> = fields
            .offers
            .iter()
            .filter(|o| o.field == Field::PublishedAt)
            .collect();
        assert_eq!(date[0].value, "2024-03-02");
    }

    #[test]
    fn test_body_offers_in_container_order() {
        let html = "<main><article><p>Inner.</p></article><p>Outer.</p></main>";
        let fields = extract(&Html::parse_document(html));
        let bodies: Vec<_> = fields
            .offers
            .iter()
            .filter(|o| o.field == Field::Body)
            .map(|o| (o.selector.as_str(), o.value.as_str()))
            .collect();
        assert_eq!(bodies, [("article", "Inner."), ("main", "Inner.\n\nOuter.")]);
    }
}

use herald_core::models::Field;
use scraper::{Html, Selector};

use super::PartialFields;
use super::text::{clean_author, clean_inline};

const TITLE: &[&str] = &[
    r#"meta[property="og:title"]"#,
    r#"meta[name="twitter:title"]"#,
];
const BODY: &[&str] = &[
    r#"meta[property="og:description"]"#,
    r#"meta[name="description"]"#,
];
const AUTHOR: &[&str] = &[r#"meta[name="author"]"#, r#"meta[property="article:author"]"#];
const DATE: &[&str] = &[
    r#"meta[property="article:published_time"]"#,
    r#"meta[name="date"]"#,
    r#"meta[name="pubdate"]"#,
];

fn content(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let value = doc
        .select(&selector)
        .find_map(|el| el.value().attr("content"))
        .map(str::to_string);
    value
}

pub(crate) fn extract(doc: &Html) -> PartialFields {
    let mut fields = PartialFields::default();

    for css in TITLE {
        if let Some(title) = content(doc, css) {
            fields.offer(Field::Title, css, clean_inline(&title));
        }
    }
    if let Ok(selector) = Selector::parse("title")
        && let Some(el) = doc.select(&selector).next()
    {
        fields.offer(Field::Title, "title", clean_inline(&el.text().collect::<String>()));
    }

    for css in BODY {
        if let Some(description) = content(doc, css) {
            fields.offer(Field::Body, css, clean_inline(&description));
        }
    }
    for css in AUTHOR {
        if let Some(author) = content(doc, css) {
            fields.offer(Field::Author, css, clean_author(&author));
        }
    }
    for css in DATE {
        if let Some(date) = content(doc, css) {
            fields.offer(Field::PublishedAt, css, date.trim().to_string());
        }
    }

    fields
}

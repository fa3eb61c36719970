use herald_core::models::Field;
use scraper::{Html, Selector};
use serde_json::Value;

use super::PartialFields;
use super::text::{clean_author, clean_inline, paragraphs_from_text};

const ARTICLE_TYPES: &[&str] = &[
    "Article",
    "NewsArticle",
    "BlogPosting",
    "ReportageNewsArticle",
];

fn is_article(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => ARTICLE_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| ARTICLE_TYPES.contains(&t)),
        _ => false,
    }
}

/// Flatten top-level arrays and `@graph` containers into candidate nodes.
fn collect_nodes<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_nodes(item, out)),
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_nodes(graph, out);
            }
            if is_article(value) {
                out.push(value);
            }
        }
        _ => {}
    }
}

fn author_name(value: &Value) -> Vec<String> {
    match value {
        Value::String(name) => vec![clean_author(name)],
        Value::Object(map) => map
            .get("name")
            .and_then(Value::as_str)
            .map(clean_author)
            .into_iter()
            .collect(),
        Value::Array(items) => items.iter().flat_map(author_name).collect(),
        _ => Vec::new(),
    }
}

fn string_at(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn extract(doc: &Html) -> PartialFields {
    let mut fields = PartialFields::default();
    let Ok(scripts) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return fields;
    };

    for script in doc.select(&scripts) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
            tracing::trace!("Skipping unparseable JSON-LD block");
            continue;
        };

        let mut nodes = Vec::new();
        collect_nodes(&value, &mut nodes);
        for node in nodes {
            for key in ["headline", "name"] {
                if let Some(title) = string_at(node, key) {
                    fields.offer(Field::Title, &format!("$.{key}"), clean_inline(&title));
                }
            }
            if let Some(body) = string_at(node, "articleBody") {
                fields.offer(Field::Body, "$.articleBody", paragraphs_from_text(&body));
            }
            if let Some(author) = node.get("author") {
                let names: Vec<String> = author_name(author)
                    .into_iter()
                    .filter(|n| !n.is_empty())
                    .collect();
                fields.offer(Field::Author, "$.author", names.join(", "));
            }
            if let Some(date) = string_at(node, "datePublished") {
                fields.offer(Field::PublishedAt, "$.datePublished", date.trim().to_string());
            }
        }
    }
    fields
}

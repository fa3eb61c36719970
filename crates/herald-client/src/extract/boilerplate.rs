//! Paragraph collection with structural boilerplate removal.
//!
//! Only markup structure is consulted, never wording: a block is dropped
//! when it sits inside a chrome element, when all of its text is link text,
//! or when it is an all-caps run of links (section labels, "RELATED" rails).

use scraper::{ElementRef, Selector};

use super::text::clean_inline;

const BLOCKS: &[&str] = &["p", "blockquote", "li", "h2", "h3"];
const CHROME: &[&str] = &["nav", "aside", "footer", "form", "figcaption", "script", "style"];
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template"];

/// True when `el` or an ancestor below `stop` has one of `names`.
fn within(el: ElementRef<'_>, stop: ElementRef<'_>, names: &[&str]) -> bool {
    std::iter::once(*el)
        .chain(el.ancestors())
        .take_while(|n| n.id() != stop.id())
        .any(|n| {
            n.value()
                .as_element()
                .is_some_and(|e| names.contains(&e.name()))
        })
}

fn in_chrome(block: ElementRef<'_>) -> bool {
    block.ancestors().any(|n| {
        n.value()
            .as_element()
            .is_some_and(|e| CHROME.contains(&e.name()))
    })
}

struct BlockText {
    all: String,
    outside_links: String,
}

fn block_text(block: ElementRef<'_>) -> BlockText {
    let mut all = String::new();
    let mut outside_links = String::new();
    for node in block.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        if within(parent, block, INVISIBLE) {
            continue;
        }
        all.push_str(text);
        if !within(parent, block, &["a"]) {
            outside_links.push_str(text);
        }
    }
    BlockText { all, outside_links }
}

fn is_link_only(text: &BlockText) -> bool {
    !text.all.trim().is_empty() && text.outside_links.trim().is_empty()
}

fn is_uppercase_link_run(block: ElementRef<'_>, text: &BlockText) -> bool {
    let mut letters = text.all.chars().filter(|c| c.is_alphabetic()).peekable();
    if letters.peek().is_none() || !letters.all(char::is_uppercase) {
        return false;
    }
    let mut children = block.children().filter_map(ElementRef::wrap).peekable();
    children.peek().is_some() && children.all(|c| c.value().name() == "a")
}

/// Cleaned paragraph texts under `container`, in document order.
pub fn paragraphs(container: ElementRef<'_>) -> Vec<String> {
    let Ok(selector) = Selector::parse(&BLOCKS.join(", ")) else {
        return Vec::new();
    };

    container
        .select(&selector)
        .filter(|block| {
            let nested = block
                .parent()
                .and_then(ElementRef::wrap)
                .is_some_and(|parent| within(parent, container, BLOCKS));
            !nested && !in_chrome(*block)
        })
        .filter_map(|block| {
            let text = block_text(block);
            if is_link_only(&text) || is_uppercase_link_run(block, &text) {
                return None;
            }
            let cleaned = clean_inline(&text.all);
            (!cleaned.is_empty()).then_some(cleaned)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;

    fn body_paragraphs(html: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        let article = Selector::parse("article").unwrap();
        let container = doc.select(&article).next().unwrap();
        paragraphs(container)
    }

    #[test]
    fn test_keeps_prose_with_inline_links() {
        let paras = body_paragraphs(
            r#"<article><p>The council   met on <a href="/x">Tuesday</a> evening.</p></article>"#,
        );
        assert_eq!(paras, ["The council met on Tuesday evening."]);
    }

    #[test]
    fn test_drops_structural_boilerplate() {
        let paras = body_paragraphs(
            r#"<article>
                <p>Real paragraph one.</p>
                <p><a href="/more">Read more stories like this</a></p>
                <p>RELATED: <a href="/a">DAM VOTE</a> <a href="/b">BUDGET</a></p>
                <figure><img src="x.jpg"><figcaption><p>Photo by staff</p></figcaption></figure>
                <aside><p>Subscribe to our newsletter today.</p></aside>
                <form><p>Leave a comment</p></form>
                <p>Real paragraph <script>track()</script>two.</p>
            </article>"#,
        );
        assert_eq!(paras, ["Real paragraph one.", "Real paragraph two."]);
    }

    #[test]
    fn test_uppercase_prose_without_links_is_kept() {
        let paras = body_paragraphs("<article><p>NASA CONFIRMS LAUNCH DATE</p></article>");
        assert_eq!(paras, ["NASA CONFIRMS LAUNCH DATE"]);
    }

    #[test]
    fn test_nested_blocks_not_duplicated() {
        let paras = body_paragraphs(
            "<article><blockquote><p>Quoted words.</p></blockquote><ul><li>Point</li></ul></article>",
        );
        assert_eq!(paras, ["Quoted words.", "Point"]);
    }
}

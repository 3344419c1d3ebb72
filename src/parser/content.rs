use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use crate::model::{Heading, ListBlock, ListKind, OtherElement, SectionContent};

static HEADINGS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").unwrap());
static PARAGRAPHS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static LISTS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("ul, ol").unwrap());
static LIST_ITEMS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").unwrap());
static LEAF_CANDIDATES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div, span").unwrap());

/// Pull headings, paragraphs, lists, leaf div/span text and a whitespace
/// normalized full-text fallback out of `container`, in document order.
pub fn extract_section(container: ElementRef) -> SectionContent {
    let mut seen: HashSet<String> = HashSet::new();

    let headings: Vec<Heading> = container
        .select(&HEADINGS)
        .filter_map(|h| {
            let text = element_text(h);
            (!text.is_empty()).then(|| Heading {
                tag: h.value().name().to_string(),
                text,
            })
        })
        .collect();

    let paragraphs: Vec<String> = container
        .select(&PARAGRAPHS)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();

    let lists: Vec<ListBlock> = container
        .select(&LISTS)
        .filter_map(|list| {
            let kind = match list.value().name() {
                "ol" => ListKind::Ol,
                _ => ListKind::Ul,
            };
            let items: Vec<String> = list
                .select(&LIST_ITEMS)
                .map(element_text)
                .filter(|t| !t.is_empty())
                .collect();
            (!items.is_empty()).then_some(ListBlock { kind, items })
        })
        .collect();

    seen.extend(headings.iter().map(|h| h.text.clone()));
    seen.extend(paragraphs.iter().cloned());
    seen.extend(lists.iter().flat_map(|l| l.items.iter().cloned()));

    let mut other_elements = Vec::new();
    for el in container.select(&LEAF_CANDIDATES) {
        if el.children().any(|c| c.value().is_element()) {
            continue;
        }
        let text = element_text(el);
        if text.is_empty() || !seen.insert(text.clone()) {
            continue;
        }
        other_elements.push(OtherElement {
            tag: el.value().name().to_string(),
            text,
            classes: el.value().classes().map(str::to_string).collect(),
        });
    }

    SectionContent {
        headings,
        paragraphs,
        lists,
        other_elements,
        raw_text: joined_text(container),
    }
}

/// Concatenated text of an element with runs of whitespace collapsed.
pub fn element_text(el: ElementRef) -> String {
    collapse_ws(&el.text().collect::<String>())
}

/// Every text node trimmed and joined with a single space.
pub fn joined_text(el: ElementRef) -> String {
    el.text()
        .map(collapse_ws)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn extract(html: &str) -> SectionContent {
        let doc = Html::parse_fragment(html);
        let sel = Selector::parse("section").unwrap();
        let section = doc.select(&sel).next().unwrap();
        extract_section(section)
    }

    #[test]
    fn counts_follow_document_order() {
        let c = extract(
            "<section>
               <h3>First</h3><p>one</p>
               <h4>Second</h4><p>two</p><p>   </p><p>three</p>
               <h5></h5>
             </section>",
        );
        let headings: Vec<_> = c.headings.iter().map(|h| (h.tag.as_str(), h.text.as_str())).collect();
        assert_eq!(headings, vec![("h3", "First"), ("h4", "Second")]);
        assert_eq!(c.paragraphs, vec!["one", "two", "three"]);
    }

    #[test]
    fn lists_keep_kind_and_drop_empty_items() {
        let c = extract(
            "<section>
               <ul><li>Water</li><li> </li><li>Energy</li></ul>
               <ol><li>step 1</li></ol>
               <ul><li></li></ul>
             </section>",
        );
        assert_eq!(c.lists.len(), 2);
        assert_eq!(c.lists[0].kind, ListKind::Ul);
        assert_eq!(c.lists[0].items, vec!["Water", "Energy"]);
        assert_eq!(c.lists[1].kind, ListKind::Ol);
    }

    #[test]
    fn whitespace_is_normalized() {
        let c = extract("<section><p>  Use   this\n metric <b>to</b>... </p></section>");
        assert_eq!(c.paragraphs, vec!["Use this metric to..."]);
        assert_eq!(c.raw_text, "Use this metric to ...");
    }

    #[test]
    fn raw_text_always_populated() {
        let c = extract("<section><em>just inline text</em></section>");
        assert!(c.headings.is_empty());
        assert!(c.paragraphs.is_empty());
        assert_eq!(c.raw_text, "just inline text");
    }

    #[test]
    fn leaf_elements_not_duplicated() {
        let c = extract(
            "<section>
               <div class=\"tag small\">Climate</div>
               <span>Climate</span>
               <div><span>nested</span></div>
               <p>para</p><div>para</div>
             </section>",
        );
        let texts: Vec<_> = c.other_elements.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Climate", "nested"]);
        let mut classes = c.other_elements[0].classes.clone();
        classes.sort();
        assert_eq!(classes, vec!["small", "tag"]);
    }

    #[test]
    fn empty_container() {
        let c = extract("<section></section>");
        assert_eq!(c, SectionContent::default());
    }
}

//! Feed autodiscovery from an HTML document.
//!
//! When a feed URL starts serving HTML (site redesign, moved feed), the
//! true feed URL is usually still advertised in the document head. Plain
//! string scanning keeps this free of an HTML-parser dependency; feeds
//! advertise themselves in a handful of rigid forms.

use url::Url;

/// Search an HTML document for an advertised feed URL.
///
/// Only the `<head>` is considered. Preference order: Atom alternate link,
/// then RSS alternate, then a generic `rel="feed"` link. A relative href
/// resolves against the page's own URL.
pub fn discover_feed_url(html: &str, page_url: &str) -> Option<String> {
    let head = head_of(html);

    find_link(head, |tag| {
        has_attr(tag, "rel", "alternate") && tag.contains("application/atom+xml")
    })
    .or_else(|| {
        find_link(head, |tag| {
            has_attr(tag, "rel", "alternate") && tag.contains("application/rss+xml")
        })
    })
    .or_else(|| find_link(head, |tag| has_attr(tag, "rel", "feed")))
    .map(|href| resolve_href(href, page_url))
}

/// Slice of the document up to `</head>`; autodiscovery links in the body
/// are ignored, matching where real sites put them.
fn head_of(html: &str) -> &str {
    let lowered = html.to_ascii_lowercase();
    match lowered.find("</head") {
        Some(end) => &html[..end],
        None => html,
    }
}

/// Scan `<link>` tags in order, returning the href of the first one the
/// predicate accepts. The predicate sees the lowercased tag; the href is
/// extracted case-preserved from the original.
fn find_link(html: &str, accept: impl Fn(&str) -> bool) -> Option<&str> {
    let lowered = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(link_start) = lowered[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &lowered[abs_start..];

        let tag_end = remaining.find('>')?;
        let tag = &remaining[..=tag_end];

        if accept(tag) {
            let original_tag = &html[abs_start..abs_start + tag_end + 1];
            if let Some(href) = attr_value(original_tag, "href") {
                return Some(href);
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    None
}

/// Checks a lowercased tag for an attribute with the given value.
fn has_attr(tag: &str, name: &str, value: &str) -> bool {
    tag.contains(&format!("{name}=\"{value}\"")) || tag.contains(&format!("{name}='{value}'"))
}

/// Extracts an attribute value from a tag string, case-preserving.
fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let prefix = format!("{name}=");

    let attr_start = tag_lower.find(&prefix)?;
    let value_start = attr_start + prefix.len();
    if value_start >= tag.len() {
        return None;
    }

    let rest = &tag[value_start..];
    let quote = *rest.as_bytes().first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let inner = &rest[1..];
    let end = inner.find(quote as char)?;
    Some(&inner[..end])
}

/// Resolve a discovered href against the page's own scheme and host.
fn resolve_href(href: &str, page_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }
    if let Ok(base) = Url::parse(page_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }
    href.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovers_atom_link_with_relative_href() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/atom+xml" href="/feed.php">
        </head><body></body></html>"#;
        assert_eq!(
            discover_feed_url(html, "http://example.com").as_deref(),
            Some("http://example.com/feed.php")
        );
    }

    #[test]
    fn test_atom_preferred_over_rss() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/rss.xml">
            <link rel="alternate" type="application/atom+xml" href="/atom.xml">
        </head><body></body></html>"#;
        assert_eq!(
            discover_feed_url(html, "http://example.com").as_deref(),
            Some("http://example.com/atom.xml")
        );
    }

    #[test]
    fn test_rel_feed_fallback() {
        let html = r#"<html><head>
            <link rel="feed" href="/updates">
        </head><body></body></html>"#;
        assert_eq!(
            discover_feed_url(html, "http://example.com").as_deref(),
            Some("http://example.com/updates")
        );
    }

    #[test]
    fn test_body_links_ignored() {
        let html = r#"<html><head><title>x</title></head><body>
            <link rel="alternate" type="application/rss+xml" href="/rss.xml">
        </body></html>"#;
        assert_eq!(discover_feed_url(html, "http://example.com"), None);
    }

    #[test]
    fn test_absolute_href_kept() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="https://feeds.example.net/rss">
        </head></html>"#;
        assert_eq!(
            discover_feed_url(html, "http://example.com").as_deref(),
            Some("https://feeds.example.net/rss")
        );
    }

    #[test]
    fn test_reversed_attribute_order_and_single_quotes() {
        let html = r#"<html><head>
            <link href='/f.xml' type='application/rss+xml' rel='alternate'>
        </head></html>"#;
        assert_eq!(
            discover_feed_url(html, "http://example.com").as_deref(),
            Some("http://example.com/f.xml")
        );
    }

    #[test]
    fn test_stylesheet_links_not_matched() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/style.css">
        </head></html>"#;
        assert_eq!(discover_feed_url(html, "http://example.com"), None);
    }

    #[test]
    fn test_no_head_scans_whole_document() {
        // Fragment responses without <head> still get scanned
        let html = r#"<link rel="alternate" type="application/atom+xml" href="/a.xml">"#;
        assert_eq!(
            discover_feed_url(html, "http://example.com").as_deref(),
            Some("http://example.com/a.xml")
        );
    }
}

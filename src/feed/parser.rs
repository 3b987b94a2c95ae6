//! Syndication parsing: raw response bytes to feed metadata and entries.

use thiserror::Error;

use crate::util::{coerce_utf8, strip_control_chars};

/// Feed XML could not be parsed as RSS or Atom.
#[derive(Debug, Error)]
#[error("feed parse error: {0}")]
pub struct ParseError(pub String);

/// Feed-level metadata plus the raw entry list, in delivery order
/// (typically newest first).
#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub site_url: Option<String>,
    pub entries: Vec<RawEntry>,
}

/// Entry fields as the provider delivered them, before canonicalization.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published: Option<i64>,
    /// First enclosure URL, if any. Stands in for a missing entry link
    /// when it validates as one (podcast providers mis-map these).
    pub enclosure_url: Option<String>,
    /// First media thumbnail URL, the last-resort link candidate.
    pub image_url: Option<String>,
}

/// Parse a feed body.
///
/// The HTTP charset is authoritative: when it disagrees with the XML
/// declaration the bytes are transcoded first, so every extracted field is
/// consistent with what the server actually sent. Feed metadata comes back
/// only when non-blank — a provider that stops sending a title must not
/// blank out the stored one.
pub fn parse_feed(bytes: &[u8], charset: Option<&str>, fetch_url: &str) -> Result<ParsedFeed, ParseError> {
    let body = coerce_utf8(bytes, charset);
    let parsed = feed_rs::parser::parse(body.as_ref()).map_err(|e| ParseError(e.to_string()))?;

    let title = parsed
        .title
        .map(|t| clean(&t.content))
        .filter(|t| !t.is_empty());

    // The site URL is whichever feed link is not the feed document itself
    let site_url = parsed
        .links
        .iter()
        .find(|link| link.href != fetch_url)
        .or_else(|| parsed.links.first())
        .map(|link| clean(&link.href))
        .filter(|href| !href.is_empty() && href != fetch_url);

    let entries = parsed.entries.into_iter().map(raw_entry).collect();

    Ok(ParsedFeed {
        title,
        site_url,
        entries,
    })
}

fn raw_entry(entry: feed_rs::model::Entry) -> RawEntry {
    let id = Some(entry.id.trim().to_owned()).filter(|s| !s.is_empty());
    let url = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("enclosure"))
        .map(|l| l.href.clone());
    let title = entry.title.map(|t| clean(&t.content));
    let author = entry
        .authors
        .first()
        .map(|p| clean(&p.name))
        .filter(|s| !s.is_empty());
    let content = entry.content.and_then(|c| c.body);
    let summary = entry.summary.map(|s| s.content);
    let published = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.timestamp());

    // RSS enclosures surface through the media model; an explicit
    // rel=enclosure link covers Atom.
    let enclosure_url = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("enclosure"))
                .map(|l| l.href.clone())
        });
    let image_url = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next();

    RawEntry {
        id,
        title,
        url,
        author,
        content,
        summary,
        published,
        enclosure_url,
        image_url,
    }
}

fn clean(s: &str) -> String {
    strip_control_chars(s.trim()).into_owned()
}

//! Feed and entry URL canonicalization.
//!
//! Identical feeds and entries must compare equal regardless of the surface
//! form a provider hands us: `feed:` wrappers, missing schemes, Unicode
//! hosts, relative entry paths. Everything funnels through `url::Url`, whose
//! host parsing also yields the punycode (ASCII-compatible) form for IDN
//! hosts.

use url::Url;

/// Canonicalize a user- or provider-supplied feed URL.
///
/// Strips `feed://` then `feed:` wrappers (a URL can carry both, nested),
/// defaults the scheme to `http://` when none survives, and normalizes the
/// rest through the URL parser. Blank input and unparseable input yield
/// `None` rather than an error.
pub fn normalize_feed_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Order matters: `feed://http://…` nests both wrapper forms.
    let mut rest = trimmed;
    if let Some(stripped) = rest.strip_prefix("feed://") {
        rest = stripped;
    }
    if let Some(stripped) = rest.strip_prefix("feed:") {
        rest = stripped;
    }

    let candidate = if rest.starts_with("http://") || rest.starts_with("https://") {
        rest.to_owned()
    } else {
        // A leading `//` is dropped only now that no scheme was detected.
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        format!("http://{rest}")
    };

    let parsed = Url::parse(&candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str()?;
    Some(parsed.to_string())
}

/// Canonicalize an entry URL in the context of its owning feed.
///
/// Scheme-relative (`//…`) and `data:` URIs pass through unchanged;
/// `blob:` URIs are rejected. Relative paths resolve against the feed's
/// site URL, falling back to its fetch URL. Blank input yields `None`.
pub fn normalize_entry_url(raw: &str, site_url: Option<&str>, fetch_url: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("//") || trimmed.starts_with("data:") {
        return Some(trimmed.to_owned());
    }
    if trimmed.starts_with("blob:") {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Url::parse(trimmed).ok().map(|u| u.to_string());
    }

    let base = site_url.filter(|s| !s.trim().is_empty()).unwrap_or(fetch_url);
    let base = Url::parse(base).ok()?;
    base.join(trimmed).ok().map(|u| u.to_string())
}

/// True when a string is usable as an entry URL: http, https, or
/// scheme-relative. Enclosure URLs must pass this before standing in for a
/// missing entry link.
pub fn is_entry_url(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.starts_with("http://") || trimmed.starts_with("https://") || trimmed.starts_with("//")
}

/// Normalize a string only when it is itself URL-shaped.
///
/// Guids are frequently URLs; canonicalizing those makes the guid dedup key
/// insensitive to surface differences, while opaque ids pass through
/// untouched.
pub fn normalize_if_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        if let Ok(parsed) = Url::parse(trimmed) {
            return parsed.to_string();
        }
    }
    trimmed.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_scheme_variants_converge() {
        let canonical = normalize_feed_url("http://xkcd.com").unwrap();
        assert_eq!(normalize_feed_url("feed://xkcd.com").unwrap(), canonical);
        assert_eq!(normalize_feed_url("xkcd.com").unwrap(), canonical);
    }

    #[test]
    fn test_nested_feed_wrappers() {
        assert_eq!(
            normalize_feed_url("feed://feed:https://example.com/rss").as_deref(),
            Some("https://example.com/rss")
        );
        assert_eq!(
            normalize_feed_url("feed:http://example.com/rss").as_deref(),
            Some("http://example.com/rss")
        );
    }

    #[test]
    fn test_scheme_relative_feed_url() {
        assert_eq!(
            normalize_feed_url("//example.com/feed").as_deref(),
            Some("http://example.com/feed")
        );
    }

    #[test]
    fn test_blank_input_is_none() {
        assert_eq!(normalize_feed_url(""), None);
        assert_eq!(normalize_feed_url("   "), None);
    }

    #[test]
    fn test_unicode_host_punycoded() {
        let normalized = normalize_feed_url("http://bücher.example/feed").unwrap();
        assert!(normalized.contains("xn--bcher-kva.example"));
        // The Unicode and ASCII forms compare equal after normalization
        assert_eq!(
            normalize_feed_url("http://xn--bcher-kva.example/feed").unwrap(),
            normalized
        );
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        assert_eq!(normalize_feed_url("ftp://example.com/feed"), None);
        assert_eq!(normalize_feed_url("file:///etc/passwd"), None);
    }

    #[test]
    fn test_entry_url_passthrough_forms() {
        assert_eq!(
            normalize_entry_url("//cdn.example.com/a", None, "http://example.com/rss").as_deref(),
            Some("//cdn.example.com/a")
        );
        assert_eq!(
            normalize_entry_url("data:text/plain,hi", None, "http://example.com/rss").as_deref(),
            Some("data:text/plain,hi")
        );
    }

    #[test]
    fn test_entry_blob_url_rejected() {
        assert_eq!(
            normalize_entry_url("blob:https://example.com/x", None, "http://example.com/rss"),
            None
        );
    }

    #[test]
    fn test_entry_relative_resolves_against_site_url() {
        assert_eq!(
            normalize_entry_url(
                "/posts/1",
                Some("http://example.com"),
                "http://feeds.example.net/rss"
            )
            .as_deref(),
            Some("http://example.com/posts/1")
        );
    }

    #[test]
    fn test_entry_relative_falls_back_to_fetch_url() {
        assert_eq!(
            normalize_entry_url("/posts/1", None, "http://feeds.example.net/rss").as_deref(),
            Some("http://feeds.example.net/posts/1")
        );
    }

    #[test]
    fn test_entry_blank_is_none() {
        assert_eq!(normalize_entry_url("", None, "http://example.com/rss"), None);
    }

    #[test]
    fn test_is_entry_url() {
        assert!(is_entry_url("http://example.com/a.mp3"));
        assert!(is_entry_url("//example.com/a.mp3"));
        assert!(!is_entry_url("ftp://example.com/a.mp3"));
        assert!(!is_entry_url("a.mp3"));
    }

    #[test]
    fn test_normalize_if_url_leaves_opaque_ids() {
        assert_eq!(normalize_if_url("urn:uuid:1234"), "urn:uuid:1234");
        assert_eq!(normalize_if_url("tag:example.com,2024:1"), "tag:example.com,2024:1");
    }

    #[test]
    fn test_normalize_if_url_canonicalizes_urls() {
        assert_eq!(normalize_if_url("http://EXAMPLE.com"), "http://example.com/");
    }
}

//! Text cleanup for provider-supplied bytes and strings.

use std::borrow::Cow;

/// Strips control characters from feed-supplied text.
///
/// Feed XML is attacker-controlled; terminal escape sequences or stray
/// control bytes must not persist into stored titles and summaries.
/// Newlines and tabs are kept.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if s.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        Cow::Owned(
            s.chars()
                .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
                .collect(),
        )
    } else {
        Cow::Borrowed(s)
    }
}

/// Coerce a response body to UTF-8 using the HTTP-declared charset.
///
/// Feed parsers infer the encoding from the XML declaration, which on
/// misconfigured servers disagrees with the bytes actually sent; the HTTP
/// header is authoritative. When the declared charset is neither missing
/// nor UTF-8, the body is transcoded and any `encoding="…"` attribute in
/// the XML declaration is rewritten so the parser cannot re-misinterpret
/// the now-UTF-8 bytes.
pub fn coerce_utf8<'a>(bytes: &'a [u8], charset: Option<&str>) -> Cow<'a, [u8]> {
    let Some(label) = charset else {
        return Cow::Borrowed(bytes);
    };
    let Some(encoding) = encoding_rs::Encoding::for_label(label.trim().as_bytes()) else {
        tracing::debug!(charset = %label, "Unrecognized charset label, leaving body as-is");
        return Cow::Borrowed(bytes);
    };
    if encoding == encoding_rs::UTF_8 {
        return Cow::Borrowed(bytes);
    }

    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(charset = %label, "Lossy transcode of feed body");
    }
    Cow::Owned(rewrite_xml_decl_encoding(&decoded).into_bytes())
}

/// Rewrites the encoding attribute of an XML declaration to utf-8.
///
/// Only the first 256 characters are examined: a declaration is only valid
/// at the very start of the document.
fn rewrite_xml_decl_encoding(doc: &str) -> String {
    let mut head_len = doc.len().min(256);
    while !doc.is_char_boundary(head_len) {
        head_len -= 1;
    }
    let head = &doc[..head_len];

    let Some(decl_end) = head.find("?>") else {
        return doc.to_owned();
    };
    let decl = &head[..decl_end];
    let Some(attr_start) = decl.find("encoding=") else {
        return doc.to_owned();
    };

    let value_start = attr_start + "encoding=".len();
    let Some(quote) = decl[value_start..].chars().next().filter(|c| *c == '"' || *c == '\'')
    else {
        return doc.to_owned();
    };
    let Some(value_len) = decl[value_start + 1..].find(quote) else {
        return doc.to_owned();
    };

    let mut out = String::with_capacity(doc.len());
    out.push_str(&doc[..value_start + 1]);
    out.push_str("utf-8");
    out.push_str(&doc[value_start + 1 + value_len..]);
    out
}

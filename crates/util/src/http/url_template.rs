use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// RFC3986 unreserved bytes (`A-Z`, `a-z`, `0-9`, `-`, `.`, `_`, `~`) stay as-is.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Percent-encodes a value for use inside a path segment or query component.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Replaces `{key}` placeholders in a URL template.
///
/// Values are percent-encoded. Placeholders without a value are left intact so
/// callers can detect unresolved templates with [`has_placeholders`].
///
/// ```ignore
/// let url = substitute_placeholders("/request/{workflow}", [("workflow", "a b")]);
/// assert_eq!(url, "/request/a%20b");
/// ```
pub fn substitute_placeholders<'a, I>(template: &str, values: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{}}}", key), &encode_component(value));
    }
    out
}

/// Replaces the printf-style `%s` marker with an encoded value.
pub fn substitute_positional(template: &str, value: &str) -> String {
    template.replacen("%s", &encode_component(value), 1)
}

/// True when the template still contains `{key}` or `%s` markers.
pub fn has_placeholders(template: &str) -> bool {
    template.contains("%s") || (template.contains('{') && template.contains('}'))
}

/// Appends encoded query pairs, respecting an existing query string.
pub fn append_query(url: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return url.to_string();
    }
    let query = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

/// Appends one encoded path segment.
pub fn append_path_segment(url: &str, segment: &str) -> String {
    format!("{}/{}", url.trim_end_matches('/'), encode_component(segment))
}

/// Strips the query string, if any.
pub fn strip_query(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

//! Transport and helper utilities shared by the DAS client crates.

pub mod async_runtime;
pub mod http;
pub mod path_processing;

pub use async_runtime::block_on_future;
pub use http::*;
pub use path_processing::expand_tilde;

use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+]+)",
        r"(?i)(bearer )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for re in SECRET_PATTERNS.iter() {
        redacted = re
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::redact_sensitive;

    #[test]
    fn redacts_tokens_in_urls_and_headers() {
        assert_eq!(
            redact_sensitive("GET https://host/api?token=abc123&x=1"),
            "GET https://host/api?token=<redacted>&x=1"
        );
        assert_eq!(redact_sensitive("Authorization: Bearer xyz"), "Authorization: <redacted> xyz");
        assert_eq!(redact_sensitive("sent bearer abc.def"), "sent bearer <redacted>");
    }
}

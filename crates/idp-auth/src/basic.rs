//! HTTP Basic credential parsing for client (machine-to-machine) calls
//!
//! Clients authenticate with `Authorization: Basic base64(key:secret)`.
//! Parsing is lenient about scheme casing (RFC 7617 schemes are
//! case-insensitive) and strict about everything else. The secret is
//! wrapped in [`common::Secret`] the moment it is decoded so it never
//! reaches a log line.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;

/// Decoded Basic credentials: the client key and its presented secret.
#[derive(Debug)]
pub struct BasicCredentials {
    pub key: String,
    pub secret: Secret<String>,
}

/// Parse an `Authorization` header value of the form `Basic <base64>`.
///
/// Returns `None` for any other scheme, undecodable base64, non-UTF-8
/// payloads, or a payload without a `:` separator. The secret may itself
/// contain `:`; only the first one splits.
pub fn parse_basic_header(header: &str) -> Option<BasicCredentials> {
    let (scheme, payload) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Basic") {
        return None;
    }
    let decoded = STANDARD.decode(payload.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (key, secret) = decoded.split_once(':')?;
    if key.is_empty() {
        return None;
    }
    Some(BasicCredentials {
        key: key.to_owned(),
        secret: Secret::new(secret.to_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(payload: &str) -> String {
        format!("Basic {}", STANDARD.encode(payload))
    }

    #[test]
    fn parses_key_and_secret() {
        let creds = parse_basic_header(&encode("acme:s3cret")).unwrap();
        assert_eq!(creds.key, "acme");
        assert_eq!(creds.secret.expose(), "s3cret");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let header = format!("basic {}", STANDARD.encode("acme:s3cret"));
        assert!(parse_basic_header(&header).is_some());
    }

    #[test]
    fn secret_may_contain_colons() {
        let creds = parse_basic_header(&encode("acme:se:cr:et")).unwrap();
        assert_eq!(creds.secret.expose(), "se:cr:et");
    }

    #[test]
    fn empty_secret_is_allowed_empty_key_is_not() {
        assert!(parse_basic_header(&encode("acme:")).is_some());
        assert!(parse_basic_header(&encode(":s3cret")).is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_basic_header("Bearer abc123").is_none());
        assert!(parse_basic_header("Basic not-base64!!!").is_none());
        assert!(parse_basic_header("Basic").is_none());
        // base64 of bytes that aren't UTF-8
        let header = format!("Basic {}", STANDARD.encode([0xff, 0xfe, 0x00]));
        assert!(parse_basic_header(&header).is_none());
        // decodes fine but has no separator
        assert!(parse_basic_header(&encode("no-separator")).is_none());
    }

    #[test]
    fn debug_output_redacts_the_secret() {
        let creds = parse_basic_header(&encode("acme:s3cret")).unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("acme"));
        assert!(!debug.contains("s3cret"));
    }
}

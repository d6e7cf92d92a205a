//! Bearer token grammar and extraction
//!
//! Implements the `Authorization: Bearer <token>` scheme from the IETF
//! OAuth bearer-token draft. The token charset is letters, digits and
//! `_.~+/-`, with optional trailing `=` padding. Extraction enforces the
//! one-source rule: a token may arrive in the header or in the request
//! parameters, never both.

use crate::error::AuthError;

/// Whether `candidate` is a well-formed bearer token: one or more chars
/// from `[A-Za-z0-9_.~+/-]` followed by zero or more `=`.
pub fn is_well_formed_token(candidate: &str) -> bool {
    let body = candidate.trim_end_matches('=');
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '~' | '+' | '/' | '-'))
}

/// Parse an `Authorization` header value of the form `Bearer <token>`.
///
/// Returns the token on a match, `None` for any other header content:
/// wrong scheme, missing token, or a token outside the allowed charset.
/// The scheme is matched case-sensitively, as in the reference draft's
/// grammar.
pub fn parse_bearer_header(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?;
    is_well_formed_token(token).then_some(token)
}

/// Extract the access token for a resource call.
///
/// `authorization` is the raw `Authorization` header, if present;
/// `param_token` is the `access_token` request parameter from the
/// method-appropriate set (query for GET, form body for mutating
/// methods), if present.
///
/// Rules:
/// - header present but not `Bearer <well-formed-token>` → [`AuthError::BearerMalformed`]
/// - well-formed header AND a parameter token → [`AuthError::TokenInHeaderAndBody`],
///   even when the two values are identical
/// - no header → the parameter token, or [`AuthError::TokenMissing`]
pub fn extract_token(
    authorization: Option<&str>,
    param_token: Option<&str>,
) -> Result<String, AuthError> {
    match authorization {
        Some(header) => {
            let token = parse_bearer_header(header).ok_or(AuthError::BearerMalformed)?;
            if param_token.is_some() {
                return Err(AuthError::TokenInHeaderAndBody);
            }
            Ok(token.to_owned())
        }
        None => match param_token {
            Some(token) if !token.is_empty() => Ok(token.to_owned()),
            _ => Err(AuthError::TokenMissing),
        },
    }
}

//! Error types for the authentication core

use thiserror::Error;

/// Request-level authentication and authorization failures.
///
/// Every variant maps to HTTP 401 with the challenge header appropriate
/// to the scheme. The Display strings are part of the compatibility
/// surface (clients match on them), so they are exact response bodies,
/// not log messages. The two client-credential variants are deliberately
/// indistinguishable in responses (the service sends the same body for
/// both) so callers cannot enumerate registered client keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("A Bearer token is required in the Authorization header.")]
    BearerMalformed,

    #[error("Access token specified in both header and body.")]
    TokenInHeaderAndBody,

    #[error("An access token is required to access this resource.")]
    TokenMissing,

    #[error("Unknown access token.")]
    TokenUnknown,

    #[error("Token does not provide access to this resource.")]
    ScopeMissing,

    #[error("Client credentials required.")]
    ClientCredentialsMissing,

    #[error("Invalid client credentials.")]
    ClientCredentialsInvalid,
}

impl AuthError {
    /// Stable label for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            AuthError::BearerMalformed => "bearer_malformed",
            AuthError::TokenInHeaderAndBody => "token_in_header_and_body",
            AuthError::TokenMissing => "token_missing",
            AuthError::TokenUnknown => "token_unknown",
            AuthError::ScopeMissing => "scope_missing",
            AuthError::ClientCredentialsMissing => "client_credentials_missing",
            AuthError::ClientCredentialsInvalid => "client_credentials_invalid",
        }
    }
}

/// Errors from store loading and persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("store parse error: {0}")]
    Parse(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_the_wire_contract() {
        assert_eq!(
            AuthError::TokenUnknown.to_string(),
            "Unknown access token."
        );
        assert_eq!(
            AuthError::ScopeMissing.to_string(),
            "Token does not provide access to this resource."
        );
        assert_eq!(
            AuthError::TokenInHeaderAndBody.to_string(),
            "Access token specified in both header and body."
        );
    }

    #[test]
    fn client_credential_variants_render_differently_internally() {
        // The service layer collapses these to one response body; the
        // variants stay distinct for logging and metrics labels.
        assert_ne!(
            AuthError::ClientCredentialsMissing.to_string(),
            AuthError::ClientCredentialsInvalid.to_string()
        );
    }
}

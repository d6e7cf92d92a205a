//! Client (machine-to-machine) authentication
//!
//! Registered applications call the client API with HTTP Basic
//! credentials: the client key as username, the client secret as
//! password. Every failure mode (unknown key, deactivated client,
//! wrong secret) produces the identical 401 response, so the endpoint
//! can't be used to enumerate registered keys.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::debug;

use idp_auth::{AuthError, Client, parse_basic_header};

use crate::metrics;
use crate::params::extract_params;
use crate::resource::envelope_response;
use crate::state::AppState;

/// The client resolved by [`require_client`], available to wrapped
/// handlers through request extensions.
#[derive(Debug, Clone)]
pub struct AuthedClient(pub Client);

/// 401 with the Basic challenge. The body distinguishes "no credentials"
/// from "bad credentials"; the bad-credentials body is shared by every
/// failure cause.
fn basic_challenge(error: &AuthError) -> Response {
    metrics::record_auth_failure("basic", error.label());
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Basic realm="Client credentials""#),
        )],
        error.to_string(),
    )
        .into_response()
}

/// Gate a route on valid client credentials.
pub async fn require_client(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(credentials) = header.and_then(parse_basic_header) else {
        return basic_challenge(&AuthError::ClientCredentialsMissing);
    };

    let client = match state.credentials.client_by_key(&credentials.key).await {
        Some(client) if client.active && client.secret_matches(credentials.secret.expose()) => {
            client
        }
        _ => {
            debug!(key = %credentials.key, "client authentication failed");
            return basic_challenge(&AuthError::ClientCredentialsInvalid);
        }
    };

    request.extensions_mut().insert(AuthedClient(client));
    next.run(request).await
}

/// `POST /api/token/verify`: token introspection for clients.
///
/// Form fields: `access_token` (required), `resource` (optional). A
/// token is reported only to the client it was issued to; any other
/// lookup answers with the same `unknown_token` envelope as a genuinely
/// unknown string. With `resource`, the response also says whether the
/// token's scope grants that registered resource.
pub async fn token_verify(State(state): State<AppState>, request: Request) -> Response {
    let Some(AuthedClient(client)) = request.extensions().get::<AuthedClient>().cloned() else {
        // Route wired without the middleware; treat as missing credentials.
        return basic_challenge(&AuthError::ClientCredentialsMissing);
    };

    let params = match extract_params(request).await {
        Ok(params) => params,
        Err(response) => return response,
    };

    let Some(candidate) = params.get("access_token") else {
        return envelope_response(
            StatusCode::OK,
            json!({
                "status": "error",
                "error": "missing_token",
                "error_description": "An access_token form field is required.",
            }),
        );
    };

    let token = state.tokens.token_by_string(candidate).await;
    let owned = token
        .as_ref()
        .is_some_and(|t| t.client_key.as_deref() == Some(client.key.as_str()));
    let Some(token) = token.filter(|_| owned) else {
        return envelope_response(
            StatusCode::OK,
            json!({
                "status": "error",
                "error": "unknown_token",
                "error_description": "Unknown access token.",
            }),
        );
    };

    let mut result = json!({
        "userid": token.user_id,
        "client": client.key,
        "scope": token.scope.iter().collect::<Vec<_>>(),
    });

    if let Some(name) = params.get("resource") {
        let registration = state.registry.get(name);
        result["resource"] = json!({
            "name": name,
            "description": registration.map(|r| r.description.clone()),
            "granted": registration.is_some() && token.scope.contains(name),
        });
    }

    envelope_response(StatusCode::OK, json!({"status": "ok", "result": result}))
}

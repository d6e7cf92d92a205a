//! Resource registry and bearer-authenticated dispatch
//!
//! Resources are named operations registered once at startup; the
//! required scope of a resource is its name. Dispatch authorizes the
//! caller's bearer token, invokes the handler, and wraps the outcome in
//! the JSON envelope. Authentication and authorization short-circuit
//! before the handler runs; handler failures are carried in the payload
//! of a 200 response, so API callers must inspect `status` rather than
//! the HTTP status line.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, instrument, warn};

use idp_auth::{AuthError, AuthToken, ParamMap, User, extract_token};

use crate::metrics;
use crate::params::extract_params;
use crate::state::AppState;

/// A handler failure, reported in the response envelope as `error` plus
/// `error_description`.
#[derive(Debug, Clone)]
pub struct ResourceError {
    pub kind: String,
    pub description: String,
}

impl ResourceError {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
        }
    }
}

/// What a handler returns: a JSON value for the `result` field, or a
/// [`ResourceError`] for the error envelope.
pub type HandlerResult = Result<serde_json::Value, ResourceError>;

/// The authorized call a handler receives: the resolved token, its
/// owning user (when the record still exists), and the request
/// arguments including uploaded files.
pub struct ResourceRequest {
    pub token: AuthToken,
    pub user: Option<User>,
    pub params: ParamMap,
}

type ResourceHandler =
    Arc<dyn Fn(ResourceRequest) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// A registered resource: name, human-readable description, handler.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub description: String,
    handler: ResourceHandler,
}

impl Registration {
    pub async fn invoke(&self, request: ResourceRequest) -> HandlerResult {
        (self.handler)(request).await
    }
}

/// Table of registered resources. Built once at startup, then read-only;
/// shared through [`AppState`] so no ambient global is involved.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, Registration>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource handler under `name`.
    ///
    /// Registering the same name twice silently replaces the earlier
    /// handler; the registry is append-at-startup, so a duplicate is a
    /// wiring mistake rather than a runtime condition worth failing on.
    pub fn register<F, Fut>(&mut self, name: &str, description: &str, handler: F)
    where
        F: Fn(ResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if self.resources.contains_key(name) {
            warn!(resource = name, "resource re-registered, replacing earlier handler");
        }
        let handler: ResourceHandler = Arc::new(move |request| Box::pin(handler(request)));
        self.resources.insert(
            name.to_owned(),
            Registration {
                name: name.to_owned(),
                description: description.to_owned(),
                handler,
            },
        );
    }

    /// Look up a registration by name. `None` for unregistered names;
    /// introspection must not error.
    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.resources.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

/// JSON response with the cache-disabling headers every resource
/// response carries.
pub fn envelope_response(status: StatusCode, body: serde_json::Value) -> Response {
    let mut response = (status, body.to_string()).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// 401 with the Bearer challenge naming the scope the caller needed.
/// The body is the bare failure message, mirroring the Basic challenge
/// responses.
fn bearer_auth_error(resource: &str, error: &AuthError) -> Response {
    metrics::record_auth_failure("bearer", error.label());
    debug!(resource, reason = error.label(), "bearer authentication failed");
    let challenge = format!(r#"Bearer realm="Token Required" scope="{resource}""#);
    let mut response = (StatusCode::UNAUTHORIZED, error.to_string()).into_response();
    match HeaderValue::from_str(&challenge) {
        Ok(value) => {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        Err(e) => warn!(resource, error = %e, "challenge header not representable"),
    }
    response
}

/// Authorize and dispatch a call to the named resource.
#[instrument(skip_all, fields(resource = %name, method = %request.method()))]
pub async fn dispatch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request: Request,
) -> Response {
    let started = Instant::now();

    let Some(registration) = state.registry.get(&name) else {
        return envelope_response(
            StatusCode::NOT_FOUND,
            json!({
                "status": "error",
                "error": "unknown_resource",
                "error_description": format!("No resource named '{name}' is registered"),
            }),
        );
    };

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let params = match extract_params(request).await {
        Ok(params) => params,
        Err(response) => return response,
    };

    let candidate = match extract_token(authorization.as_deref(), params.get("access_token")) {
        Ok(candidate) => candidate,
        Err(error) => return bearer_auth_error(&name, &error),
    };

    let Some(token) = state.tokens.token_by_string(&candidate).await else {
        return bearer_auth_error(&name, &AuthError::TokenUnknown);
    };

    if !token.scope.contains(&name) {
        return bearer_auth_error(&name, &AuthError::ScopeMissing);
    }

    let user = state.credentials.user_by_id(&token.user_id).await;

    let result = registration
        .invoke(ResourceRequest {
            token,
            user,
            params,
        })
        .await;

    let (outcome, body) = match result {
        Ok(value) => ("ok", json!({"status": "ok", "result": value})),
        Err(error) => (
            "handler_error",
            json!({
                "status": "error",
                "error": error.kind,
                "error_description": error.description,
            }),
        ),
    };
    metrics::record_resource_request(&name, outcome, started.elapsed().as_secs_f64());

    // Handler errors still travel as HTTP 200; callers inspect `status`.
    envelope_response(StatusCode::OK, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_request() -> ResourceRequest {
        ResourceRequest {
            token: AuthToken {
                token: "abc123".into(),
                user_id: "alice".into(),
                client_key: Some("acme".into()),
                scope: ["profile"].into_iter().collect(),
            },
            user: None,
            params: ParamMap::new(),
        }
    }

    #[test]
    fn lookup_of_unregistered_name_returns_none() {
        let registry = ResourceRegistry::new();
        assert!(registry.get("profile").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn register_and_invoke() {
        let mut registry = ResourceRegistry::new();
        registry.register("profile", "Profile data", |req| async move {
            Ok(json!({"userid": req.token.user_id}))
        });

        let registration = registry.get("profile").unwrap();
        assert_eq!(registration.description, "Profile data");
        let result = registration.invoke(sample_request()).await.unwrap();
        assert_eq!(result["userid"], "alice");
    }

    #[tokio::test]
    async fn duplicate_registration_overwrites_silently() {
        let mut registry = ResourceRegistry::new();
        registry.register("profile", "first", |_| async { Ok(Value::from(1)) });
        registry.register("profile", "second", |_| async { Ok(Value::from(2)) });

        assert_eq!(registry.len(), 1);
        let registration = registry.get("profile").unwrap();
        assert_eq!(registration.description, "second");
        let result = registration.invoke(sample_request()).await.unwrap();
        assert_eq!(result, Value::from(2));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = ResourceRegistry::new();
        registry.register("email", "", |_| async { Ok(Value::Null) });
        registry.register("contacts", "", |_| async { Ok(Value::Null) });
        registry.register("profile", "", |_| async { Ok(Value::Null) });
        assert_eq!(registry.names(), vec!["contacts", "email", "profile"]);
    }

    #[test]
    fn envelope_response_disables_caching() {
        let response = envelope_response(StatusCode::OK, json!({"status": "ok"}));
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn bearer_challenge_names_the_scope() {
        let response = bearer_auth_error("contacts", &AuthError::TokenUnknown);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer realm="Token Required" scope="contacts""#
        );
    }
}

//! Per-request identity resolution
//!
//! Before any route logic runs, [`identity_middleware`] resolves the
//! session's user id to a [`User`] record and attaches a [`CurrentUser`]
//! to the request. A stale user id (record deleted since login) is the
//! same as no session: the request proceeds unauthenticated and no
//! avatar work happens. The avatar URL is an opportunistic display
//! detail cached in the session; it never influences an access decision.

use axum::extract::{Request, State};
use axum::http::header::{HOST, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::debug;

use idp_auth::{ExternalId, User, gravatar_url};

use crate::metrics;
use crate::session::{SESSION_AVATAR_URL, SESSION_EXTERNAL, SESSION_NEXT, SESSION_USERID, Session};
use crate::state::{AppState, LOGIN_PATH};

/// The resolved caller identity for one request. Present on every
/// request once [`identity_middleware`] has run; `user` is `None` for
/// anonymous callers.
#[derive(Clone, Default)]
pub struct CurrentUser {
    pub user: Option<User>,
    pub avatar_url: Option<String>,
}

/// Establish a login: point the session at the user.
///
/// The interactive sign-in flows that call this are separate from this
/// service; it lives beside `logout` so the session keys are managed in
/// one place.
#[allow(dead_code)]
pub fn login(session: &Session, user: &User) {
    session.set(SESSION_USERID, Value::String(user.userid.clone()));
}

/// Tear down a login: drop the user id, the external-identity
/// descriptor, and the cached avatar.
pub fn logout(session: &Session) {
    session.remove(SESSION_USERID);
    session.remove(SESSION_EXTERNAL);
    session.remove(SESSION_AVATAR_URL);
}

/// Whether the inbound request arrived over an encrypted transport.
///
/// The service listens on plain TCP behind TLS termination, so the
/// proxy's `x-forwarded-proto` header is the signal.
pub fn request_is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Resolve the session's user and attach [`CurrentUser`] to the request.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let secure = request_is_secure(request.headers());
    let session = request.extensions().get::<Session>().cloned();
    let current = match session {
        Some(session) => resolve_current_user(&state, &session, secure).await,
        None => CurrentUser::default(),
    };
    request.extensions_mut().insert(current);
    next.run(request).await
}

async fn resolve_current_user(state: &AppState, session: &Session, secure: bool) -> CurrentUser {
    let Some(userid) = session.get_str(SESSION_USERID) else {
        session.remove(SESSION_AVATAR_URL);
        return CurrentUser::default();
    };

    let Some(user) = state.credentials.user_by_id(&userid).await else {
        // The record is gone; treat the session as anonymous and skip
        // avatar computation entirely.
        debug!(userid, "session references unknown user");
        session.remove(SESSION_AVATAR_URL);
        return CurrentUser::default();
    };

    let avatar_url = cached_avatar(state, session, &user, secure).await;
    CurrentUser {
        user: Some(user),
        avatar_url,
    }
}

/// The cached avatar, computing and caching it on first use. A cached
/// JSON null means an earlier computation found nothing; that outcome is
/// cached too, so failed third-party lookups aren't retried per request.
async fn cached_avatar(
    state: &AppState,
    session: &Session,
    user: &User,
    secure: bool,
) -> Option<String> {
    if let Some(cached) = session.get(SESSION_AVATAR_URL) {
        return cached.as_str().map(String::from);
    }
    let computed = compute_avatar(state, session, user, secure).await;
    session.set(
        SESSION_AVATAR_URL,
        match &computed {
            Some(url) => Value::String(url.clone()),
            None => Value::Null,
        },
    );
    computed
}

async fn compute_avatar(
    state: &AppState,
    session: &Session,
    user: &User,
    secure: bool,
) -> Option<String> {
    if let Some(email) = &user.email {
        return Some(gravatar_url(email, secure));
    }

    // The session's descriptor (set by the federated login flow) wins;
    // the user record's stored link covers sessions established by other
    // means.
    let external = session_external(session).or_else(|| user.external.clone())?;

    if !state.settings.remote_avatar_lookups {
        return None;
    }

    match external.service.as_str() {
        "twitter" => {
            let username = external.username.or(external.userid)?;
            let url = state.avatars.twitter_profile_image(&username).await;
            if url.is_none() {
                metrics::record_avatar_lookup_failure("twitter");
            }
            url
        }
        "github" => {
            let userid = external.userid.or(external.username)?;
            let url = state.avatars.github_avatar_url(&userid).await;
            if url.is_none() {
                metrics::record_avatar_lookup_failure("github");
            }
            url
        }
        _ => None,
    }
}

fn session_external(session: &Session) -> Option<ExternalId> {
    let value = session.get(SESSION_EXTERNAL)?;
    serde_json::from_value(value).ok()
}

/// Gate a route on an established login.
///
/// Anonymous requests get their full URL stored in the session's
/// one-time `next` slot and a 302 to the login path, so the login flow
/// can send them back where they were headed.
pub async fn require_login(request: Request, next: Next) -> Response {
    let authenticated = request
        .extensions()
        .get::<CurrentUser>()
        .is_some_and(|current| current.user.is_some());
    if authenticated {
        return next.run(request).await;
    }

    if let Some(session) = request.extensions().get::<Session>() {
        session.set(SESSION_NEXT, Value::String(full_request_url(&request)));
    }
    (StatusCode::FOUND, [(LOCATION, LOGIN_PATH)]).into_response()
}

/// Reconstruct the absolute URL of the inbound request from the Host
/// header and forwarded-proto scheme.
fn full_request_url(request: &Request) -> String {
    let scheme = if request_is_secure(request.headers()) {
        "https"
    } else {
        "http"
    };
    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}{}", request.uri())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_sets_userid_logout_clears_identity_keys() {
        let session = Session::detached();
        let user = User {
            userid: "alice".into(),
            fullname: None,
            email: None,
            external: None,
        };

        login(&session, &user);
        assert_eq!(session.get_str(SESSION_USERID).as_deref(), Some("alice"));

        session.set(SESSION_EXTERNAL, json!({"service": "github", "userid": "alice"}));
        session.set(SESSION_AVATAR_URL, json!("http://example.com/a.png"));
        session.set(SESSION_NEXT, json!("/pending"));

        logout(&session);
        assert!(session.get(SESSION_USERID).is_none());
        assert!(session.get(SESSION_EXTERNAL).is_none());
        assert!(session.get(SESSION_AVATAR_URL).is_none());
        // `next` survives logout; the redirect policy consumes it
        assert!(session.get(SESSION_NEXT).is_some());
    }

    #[test]
    fn forwarded_proto_decides_transport_security() {
        let mut headers = HeaderMap::new();
        assert!(!request_is_secure(&headers));
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert!(request_is_secure(&headers));
        headers.insert("x-forwarded-proto", "http".parse().unwrap());
        assert!(!request_is_secure(&headers));
    }

    #[test]
    fn session_external_parses_descriptor() {
        let session = Session::detached();
        session.set(
            SESSION_EXTERNAL,
            json!({"service": "twitter", "username": "alice"}),
        );
        let external = session_external(&session).unwrap();
        assert_eq!(external.service, "twitter");
        assert_eq!(external.username.as_deref(), Some("alice"));
        assert_eq!(external.userid, None);
    }

    #[test]
    fn session_external_tolerates_garbage() {
        let session = Session::detached();
        session.set(SESSION_EXTERNAL, json!("not an object"));
        assert!(session_external(&session).is_none());
    }
}

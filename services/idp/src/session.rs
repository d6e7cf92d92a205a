//! Server-side sessions
//!
//! Each browser connection is identified by an opaque uuid carried in an
//! HttpOnly cookie; the values live server-side in a process-wide map,
//! so nothing readable crosses the wire. A [`Session`] handle is
//! attached to every request by [`session_middleware`]; mutations mark
//! the handle dirty and are written back to the store when the response
//! leaves. Fresh sessions that were never written are discarded without
//! setting a cookie, so health checks and metrics scrapes don't mint
//! sessions.

use std::collections::HashMap;

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

/// Session key: current user id.
pub const SESSION_USERID: &str = "userid";
/// Session key: one-time post-action redirect target.
pub const SESSION_NEXT: &str = "next";
/// Session key: cached avatar URL; JSON null means "computed, none".
pub const SESSION_AVATAR_URL: &str = "avatar_url";
/// Session key: external-identity descriptor from a federated login.
pub const SESSION_EXTERNAL: &str = "userid_external";

type SessionValues = HashMap<String, Value>;

/// Process-wide session map keyed by opaque session ids.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionValues>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the session identified by `id`, or start a fresh one when
    /// the id is absent or unknown (expired, or a forged cookie).
    pub fn open(&self, id: Option<&str>) -> Session {
        if let Some(id) = id {
            let sessions = self.sessions.lock();
            if let Some(values) = sessions.get(id) {
                return Session::new(id.to_owned(), false, values.clone());
            }
        }
        Session::new(Uuid::new_v4().simple().to_string(), true, SessionValues::new())
    }

    /// Write a session's values back. Untouched sessions are left
    /// alone; fresh ones are never stored until something is written.
    pub fn persist(&self, session: &Session) {
        let inner = session.inner.lock();
        if !inner.dirty {
            return;
        }
        self.sessions
            .lock()
            .insert(inner.id.clone(), inner.values.clone());
    }

    /// Number of live sessions, for the health endpoint.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
impl SessionStore {
    /// Seed a session directly.
    pub fn insert_values(&self, id: &str, values: HashMap<String, Value>) {
        self.sessions.lock().insert(id.to_owned(), values);
    }

    /// Snapshot a session's values, if the id is known.
    pub fn values(&self, id: &str) -> Option<HashMap<String, Value>> {
        self.sessions.lock().get(id).cloned()
    }
}

struct SessionInner {
    id: String,
    is_new: bool,
    dirty: bool,
    values: SessionValues,
}

/// Handle to one request's session. Cloning shares the underlying state;
/// the middleware and the handler see the same values.
#[derive(Clone)]
pub struct Session {
    inner: std::sync::Arc<Mutex<SessionInner>>,
}

impl Session {
    fn new(id: String, is_new: bool, values: SessionValues) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(SessionInner {
                id,
                is_new,
                dirty: false,
                values,
            })),
        }
    }

    /// A session not backed by any store. Used where a handler must run
    /// without the session middleware (tests, mostly).
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4().simple().to_string(), true, SessionValues::new())
    }

    pub fn id(&self) -> String {
        self.inner.lock().id.clone()
    }

    pub fn is_new(&self) -> bool {
        self.inner.lock().is_new
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.get(key).cloned()
    }

    /// String value under `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(String::from))
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock();
        inner.dirty = true;
        inner.values.insert(key.to_owned(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let removed = inner.values.remove(key);
        if removed.is_some() {
            inner.dirty = true;
        }
        removed
    }

    /// Read-once: return the value and clear it in the same step.
    pub fn take(&self, key: &str) -> Option<Value> {
        self.remove(key)
    }

    /// Whether any mutation happened since the handle was opened.
    pub fn was_written(&self) -> bool {
        self.inner.lock().dirty
    }
}

/// Extract the session cookie value from request headers.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .map(str::trim)
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| value.to_owned())
        })
}

/// Attach a [`Session`] to the request and persist it after the handler.
///
/// Runs before identity resolution. Also counts the request for the
/// health endpoint.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    state
        .requests_total
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let cookie_id = cookie_value(request.headers(), &state.settings.cookie_name);
    let session = state.sessions.open(cookie_id.as_deref());

    request.extensions_mut().insert(session.clone());
    let mut response = next.run(request).await;

    state.sessions.persist(&session);

    // A cookie is only worth setting once the session holds something;
    // health checks and metrics scrapes stay cookie-free.
    if session.is_new() && session.was_written() {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            state.settings.cookie_name,
            session.id()
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "session cookie not representable as header"),
        }
    }

    response
}

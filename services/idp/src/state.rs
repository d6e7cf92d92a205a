//! Shared application state
//!
//! One `AppState` is built at startup and cloned into every handler and
//! middleware via the axum `State` extractor. The stores sit behind
//! trait objects so tests can swap the file-backed store for the
//! in-memory one.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use idp_auth::{AvatarFetcher, CredentialStore, TokenStore};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::resource::ResourceRegistry;
use crate::session::SessionStore;

/// Path unauthenticated requests to protected routes are redirected to.
pub const LOGIN_PATH: &str = "/login";

/// Settings derived from [`Config`] that request handling needs.
#[derive(Debug)]
pub struct Settings {
    pub cookie_name: String,
    pub default_next: String,
    pub remote_avatar_lookups: bool,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cookie_name: config.session.cookie_name.clone(),
            default_next: config.server.default_next.clone(),
            remote_avatar_lookups: config.avatar.remote_lookups,
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<dyn CredentialStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<ResourceRegistry>,
    pub avatars: Arc<AvatarFetcher>,
    pub settings: Arc<Settings>,
    pub requests_total: Arc<AtomicU64>,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

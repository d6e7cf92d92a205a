//! Identity-provider backend
//!
//! Single-binary Rust service that:
//! 1. Resolves the session user on every request
//! 2. Serves registered resources to bearer-token holders, enforcing
//!    one scope per resource
//! 3. Authenticates machine clients via HTTP Basic for introspection
//! 4. Computes safe post-action redirects ("next URL")

mod client_auth;
mod config;
mod context;
mod metrics;
mod params;
mod redirect;
mod resource;
mod session;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, HOST, LOCATION, REFERER};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use idp_auth::{AvatarFetcher, FileStore, ParamMap};

use crate::config::Config;
use crate::context::CurrentUser;
use crate::redirect::NextUrlOptions;
use crate::resource::{ResourceError, ResourceRegistry, ResourceRequest};
use crate::session::{Session, SessionStore};
use crate::state::{AppState, Settings};

/// Drain timeout for graceful shutdown: in-flight requests get this long
/// after SIGTERM before the process exits anyway.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Register the resources this deployment serves.
///
/// Registration happens here, once, at startup; the registry is
/// read-only afterwards. A resource's required scope is its name.
fn build_registry() -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();

    registry.register(
        "profile",
        "Basic profile of the token's owner",
        |req: ResourceRequest| async move {
            let user = req
                .user
                .ok_or_else(|| ResourceError::new("unknown_user", "Token owner no longer exists"))?;
            Ok(json!({
                "userid": user.userid,
                "fullname": user.fullname,
                "email": user.email,
            }))
        },
    );

    registry.register(
        "email",
        "Email address of the token's owner",
        |req: ResourceRequest| async move {
            let user = req
                .user
                .ok_or_else(|| ResourceError::new("unknown_user", "Token owner no longer exists"))?;
            Ok(json!({"email": user.email}))
        },
    );

    registry.register(
        "contacts",
        "Contact list of the token's owner",
        |req: ResourceRequest| async move {
            let user = req
                .user
                .ok_or_else(|| ResourceError::new("unknown_user", "Token owner no longer exists"))?;
            Ok(json!({"userid": user.userid, "contacts": []}))
        },
    );

    registry
}

/// Build the axum router: session resolution and identity middleware
/// around every route, client auth around the client API, and a
/// concurrency limit on the outside.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let protected = Router::new()
        .route("/account", get(account_handler))
        .route_layer(middleware::from_fn(context::require_login));

    let client_api = Router::new()
        .route("/api/token/verify", post(client_auth::token_verify))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            client_auth::require_client,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/login", get(login_handler))
        .route("/logout", get(logout_handler))
        .route(
            "/api/resource/{name}",
            get(resource::dispatch)
                .post(resource::dispatch)
                .put(resource::dispatch)
                .delete(resource::dispatch),
        )
        .merge(protected)
        .merge(client_api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            context::identity_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::session_middleware,
        ))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting idp-backend");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        store = %config.store.path.display(),
        cookie = %config.session.cookie_name,
        remote_avatar_lookups = config.avatar.remote_lookups,
        "configuration loaded"
    );

    let store = Arc::new(
        FileStore::load(config.store.path.clone())
            .await
            .context("failed to load identity store")?,
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!("idp-backend/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let avatars = Arc::new(AvatarFetcher::new(
        http,
        Duration::from_secs(config.avatar.timeout_secs),
    ));

    let registry = Arc::new(build_registry());
    info!(resources = registry.len(), "resource registry built");

    let state = AppState {
        credentials: store.clone(),
        tokens: store,
        sessions: Arc::new(SessionStore::new()),
        registry,
        avatars,
        settings: Arc::new(Settings::from_config(&config)),
        requests_total: Arc::new(AtomicU64::new(0)),
        started_at: Instant::now(),
        prometheus,
    };

    let app = build_router(state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    // Graceful shutdown: stop accepting on SIGTERM/SIGINT, then give
    // in-flight requests DRAIN_TIMEOUT to finish.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            error!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: uptime, request count, registered resources, live
/// session count.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.requests_total.load(Ordering::Relaxed),
        "resources": state.registry.names(),
        "active_sessions": state.sessions.len(),
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// Landing target of denied redirects. The actual sign-in flows
/// (password form, federated login) live outside this service; this
/// endpoint just tells the caller why they were sent here.
async fn login_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        json!({"message": "You need to be logged in for that page"}).to_string(),
    )
}

/// Tear down the session and redirect via the next-URL policy, with
/// referrer fallback and external targets disallowed.
async fn logout_handler(State(state): State<AppState>, request: Request) -> Response {
    let session = request
        .extensions()
        .get::<Session>()
        .cloned()
        .unwrap_or_else(Session::detached);
    context::logout(&session);

    let params = ParamMap::from_query(request.uri().query());
    let host = request.headers().get(HOST).and_then(|v| v.to_str().ok());
    let referrer = request
        .headers()
        .get(REFERER)
        .and_then(|v| v.to_str().ok());

    let target = redirect::next_url(
        &session,
        params.get("next"),
        host,
        referrer,
        &state.settings.default_next,
        NextUrlOptions {
            referrer_fallback: true,
            allow_external: false,
        },
    );
    (StatusCode::FOUND, [(LOCATION, target)]).into_response()
}

/// The session user's own view of their account, avatar included.
async fn account_handler(request: Request) -> Response {
    let current = request
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .unwrap_or_default();
    let Some(user) = current.user else {
        // require_login guards this route; an anonymous caller here means
        // the route was wired without it.
        return (StatusCode::UNAUTHORIZED, "login required").into_response();
    };
    let body = json!({
        "userid": user.userid,
        "fullname": user.fullname,
        "email": user.email,
        "avatar_url": current.avatar_url,
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

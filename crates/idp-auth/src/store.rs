//! User, client, and token records and the stores that hold them
//!
//! The request path only ever reads: `CredentialStore` resolves users and
//! clients, `TokenStore` resolves access tokens. Both are trait seams so
//! the HTTP service stays independent of the backing persistence. Two
//! implementations ship here: `MemoryStore` for tests and seeding, and
//! `FileStore`, a JSON file manager with atomic writes for standalone
//! deployments. Record creation and revocation belong to administrative
//! tooling; nothing in the request path mutates a store.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::scope::ScopeSet;

/// Link to an account at an external identity service, recorded when a
/// user signed up through a federated login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalId {
    /// Service name, e.g. "twitter" or "github"
    pub service: String,
    /// Service-specific account id
    #[serde(default)]
    pub userid: Option<String>,
    /// Service-specific handle, where the service distinguishes the two
    #[serde(default)]
    pub username: Option<String>,
}

/// A registered user. Sessions reference users by `userid` only; the
/// record is resolved fresh on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub userid: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub external: Option<ExternalId>,
}

/// A registered third-party application.
///
/// The secret is stored as a SHA-256 hex digest, never in a form that can
/// be compared as plaintext. Deactivated clients keep their record but
/// fail authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub key: String,
    pub secret_sha256: String,
    pub active: bool,
    #[serde(default)]
    pub title: String,
}

impl Client {
    /// Verify a presented secret against the stored digest.
    ///
    /// Hashes the presented value and compares digests in constant time,
    /// so the comparison leaks nothing about how much of the secret
    /// matched. A stored digest that is not 64 hex chars never matches.
    pub fn secret_matches(&self, presented: &str) -> bool {
        let Some(stored) = decode_hex_digest(&self.secret_sha256) else {
            return false;
        };
        let presented = Sha256::digest(presented.as_bytes());
        bool::from(stored.as_slice().ct_eq(presented.as_slice()))
    }
}

/// An opaque access token granting a bounded scope set on behalf of a
/// user. Issuance and revocation happen elsewhere; this core reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    /// Owning user
    pub user_id: String,
    /// Client the token was issued to, when known
    #[serde(default)]
    pub client_key: Option<String>,
    pub scope: ScopeSet,
}

/// SHA-256 of `input` as lowercase hex, the storage form of client
/// secrets. Administrative tooling uses this when registering a client.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex_digest(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        out[i] = (hi as u8) << 4 | lo as u8;
    }
    Some(out)
}

/// Lookup seam for users and clients.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialStore>` in the service state).
pub trait CredentialStore: Send + Sync {
    fn user_by_id<'a>(
        &'a self,
        userid: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<User>> + Send + 'a>>;

    fn client_by_key<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Client>> + Send + 'a>>;
}

/// Lookup seam for access tokens. Resolution is exact string match on
/// the opaque token value.
pub trait TokenStore: Send + Sync {
    fn token_by_string<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<AuthToken>> + Send + 'a>>;
}

/// Record counts for the health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub users: usize,
    pub clients: usize,
    pub tokens: usize,
}

/// In-memory store for tests and programmatic seeding.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    clients: RwLock<HashMap<String, Client>>,
    tokens: RwLock<HashMap<String, AuthToken>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: User) {
        self.users.write().await.insert(user.userid.clone(), user);
    }

    pub async fn add_client(&self, client: Client) {
        self.clients.write().await.insert(client.key.clone(), client);
    }

    pub async fn add_token(&self, token: AuthToken) {
        self.tokens.write().await.insert(token.token.clone(), token);
    }

    pub async fn counts(&self) -> StoreCounts {
        StoreCounts {
            users: self.users.read().await.len(),
            clients: self.clients.read().await.len(),
            tokens: self.tokens.read().await.len(),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn user_by_id<'a>(
        &'a self,
        userid: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<User>> + Send + 'a>> {
        Box::pin(async move { self.users.read().await.get(userid).cloned() })
    }

    fn client_by_key<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Client>> + Send + 'a>> {
        Box::pin(async move { self.clients.read().await.get(key).cloned() })
    }
}

impl TokenStore for MemoryStore {
    fn token_by_string<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<AuthToken>> + Send + 'a>> {
        Box::pin(async move { self.tokens.read().await.get(token).cloned() })
    }
}

/// On-disk layout of the store file: three keyed maps in one JSON object.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    clients: HashMap<String, Client>,
    #[serde(default)]
    tokens: HashMap<String, AuthToken>,
}

/// JSON-file-backed store for standalone deployments.
///
/// The file is the single source of truth; the in-memory state is a full
/// copy loaded at startup. All writes use atomic temp-file + rename to
/// prevent corruption on crash, and the file is chmodded 0600 since it
/// holds token strings and secret digests.
pub struct FileStore {
    path: PathBuf,
    state: RwLock<StoreData>,
}

impl FileStore {
    /// Load the store from the given file path.
    ///
    /// If the file doesn't exist, creates it empty: a cold start with
    /// zero records, to be populated by administrative tooling.
    pub async fn load(path: PathBuf) -> StoreResult<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Io(format!("reading store file: {e}")))?;
            let data: StoreData = serde_json::from_str(&contents)
                .map_err(|e| StoreError::Parse(format!("parsing store file: {e}")))?;
            info!(
                path = %path.display(),
                users = data.users.len(),
                clients = data.clients.len(),
                tokens = data.tokens.len(),
                "loaded identity store"
            );
            data
        } else {
            info!(path = %path.display(), "store file not found, starting empty");
            let data = StoreData::default();
            write_atomic(&path, &data).await?;
            data
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Persist the current in-memory state to disk.
    pub async fn save(&self) -> StoreResult<()> {
        let state = self.state.read().await;
        write_atomic(&self.path, &state).await
    }

    /// Add or replace a user and persist.
    pub async fn add_user(&self, user: User) -> StoreResult<()> {
        let mut state = self.state.write().await;
        debug!(userid = %user.userid, "added user");
        state.users.insert(user.userid.clone(), user);
        write_atomic(&self.path, &state).await
    }

    /// Add or replace a client and persist.
    pub async fn add_client(&self, client: Client) -> StoreResult<()> {
        let mut state = self.state.write().await;
        debug!(key = %client.key, "added client");
        state.clients.insert(client.key.clone(), client);
        write_atomic(&self.path, &state).await
    }

    /// Add or replace a token and persist.
    pub async fn add_token(&self, token: AuthToken) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.tokens.insert(token.token.clone(), token);
        write_atomic(&self.path, &state).await
    }

    /// Remove a token (revocation via admin tooling) and persist.
    ///
    /// Returns the removed token if it existed.
    pub async fn remove_token(&self, token: &str) -> StoreResult<Option<AuthToken>> {
        let mut state = self.state.write().await;
        let removed = state.tokens.remove(token);
        if removed.is_some() {
            debug!("removed token");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }

    pub async fn counts(&self) -> StoreCounts {
        let state = self.state.read().await;
        StoreCounts {
            users: state.users.len(),
            clients: state.clients.len(),
            tokens: state.tokens.len(),
        }
    }
}

impl CredentialStore for FileStore {
    fn user_by_id<'a>(
        &'a self,
        userid: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<User>> + Send + 'a>> {
        Box::pin(async move { self.state.read().await.users.get(userid).cloned() })
    }

    fn client_by_key<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Client>> + Send + 'a>> {
        Box::pin(async move { self.state.read().await.clients.get(key).cloned() })
    }
}

impl TokenStore for FileStore {
    fn token_by_string<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<AuthToken>> + Send + 'a>> {
        Box::pin(async move { self.state.read().await.tokens.get(token).cloned() })
    }
}

/// Write the store to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are set to 0600 (owner read/write only) since
/// the file contains live token strings.
async fn write_atomic(path: &Path, data: &StoreData) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| StoreError::Parse(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io("store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".idp-store.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError::Io(format!("writing temp store file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| StoreError::Io(format!("setting store file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::Io(format!("renaming temp store file: {e}")))?;

    debug!(path = %path.display(), "persisted identity store");
    Ok(())
}

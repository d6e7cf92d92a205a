//! Authentication core for the identity-provider backend
//!
//! Framework-independent pieces of the auth layer: the bearer-token
//! grammar, HTTP Basic credential parsing, scope sets, the credential
//! and token store seams with in-memory and file-backed implementations,
//! and avatar URL derivation. The HTTP service in `services/idp` wires
//! these into middleware and route handlers; this crate can be tested
//! and used independently.
//!
//! Request flow through this crate:
//! 1. `bearer::extract_token()` pulls the candidate token from the
//!    Authorization header or the request parameters
//! 2. `TokenStore::token_by_string()` resolves it to an [`AuthToken`]
//! 3. `ScopeSet::contains()` gates access to the named resource
//! 4. Client calls instead go through `basic::parse_basic_header()` and
//!    `Client::secret_matches()`

pub mod avatar;
pub mod basic;
pub mod bearer;
pub mod error;
pub mod params;
pub mod scope;
pub mod store;

pub use avatar::{AvatarFetcher, gravatar_url};
pub use basic::{BasicCredentials, parse_basic_header};
pub use bearer::{extract_token, is_well_formed_token, parse_bearer_header};
pub use error::{AuthError, StoreError, StoreResult};
pub use params::{ParamMap, UploadedFile};
pub use scope::ScopeSet;
pub use store::{
    AuthToken, Client, CredentialStore, ExternalId, FileStore, MemoryStore, StoreCounts,
    TokenStore, User, sha256_hex,
};

//! Display avatar derivation
//!
//! Computes an avatar URL for a logged-in user: a gravatar-style URL
//! when the user has an email, otherwise a third-party profile image
//! fetched from the service the user signed in with. The remote lookups
//! are best-effort with a bounded timeout; any failure degrades to "no
//! avatar", never to a request error. The session layer caches whatever
//! comes back, including the absence of a result.

use std::time::Duration;

use tracing::debug;

/// Twitter's legacy profile-image endpoint; responds with a redirect to
/// the image, and the final URL is the value we want.
const TWITTER_PROFILE_IMAGE_BASE: &str = "http://api.twitter.com/1/users/profile_image";

/// GitHub users API; the avatar URL is a field of the JSON payload.
const GITHUB_USERS_BASE: &str = "https://api.github.com/users";

/// Gravatar-style avatar URL for an email address.
///
/// The address is trimmed and lowercased before hashing, per the
/// gravatar convention. `secure` selects the TLS endpoint and should
/// reflect the transport the inbound request arrived on, so pages served
/// over TLS don't embed mixed content.
pub fn gravatar_url(email: &str, secure: bool) -> String {
    let digest = md5::compute(email.trim().to_lowercase().as_bytes());
    if secure {
        format!("https://secure.gravatar.com/avatar/{digest:x}?s=80&d=mm")
    } else {
        format!("http://www.gravatar.com/avatar/{digest:x}?s=80&d=mm")
    }
}

/// Remote avatar lookups against third-party identity services.
pub struct AvatarFetcher {
    http: reqwest::Client,
    timeout: Duration,
    twitter_base: String,
    github_base: String,
}

impl AvatarFetcher {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http,
            timeout,
            twitter_base: TWITTER_PROFILE_IMAGE_BASE.into(),
            github_base: GITHUB_USERS_BASE.into(),
        }
    }

    /// Override the service endpoints (tests, or deployments that reach
    /// the services through an egress proxy).
    pub fn with_endpoints(mut self, twitter: impl Into<String>, github: impl Into<String>) -> Self {
        self.twitter_base = twitter.into();
        self.github_base = github.into();
        self
    }

    /// Resolve a twitter profile image by following the profile_image
    /// redirect and taking the final URL. Network failure yields `None`.
    pub async fn twitter_profile_image(&self, username: &str) -> Option<String> {
        let url = format!("{}/{username}", self.twitter_base);
        match self.http.get(&url).timeout(self.timeout).send().await {
            Ok(response) => Some(response.url().to_string()),
            Err(e) => {
                debug!(username, error = %e, "twitter avatar lookup failed");
                None
            }
        }
    }

    /// Resolve a github avatar from the users API JSON payload. Network
    /// or decode failure yields `None`.
    pub async fn github_avatar_url(&self, userid: &str) -> Option<String> {
        let url = format!("{}/{userid}", self.github_base);
        let response = match self.http.get(&url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(userid, error = %e, "github avatar lookup failed");
                return None;
            }
        };
        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                debug!(userid, error = %e, "github avatar payload unreadable");
                return None;
            }
        };
        payload
            .get("avatar_url")
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

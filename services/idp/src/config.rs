//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env var > default
//! filename. The store file referenced by `[store] path` holds the live
//! token strings and secret digests; its permissions are managed by the
//! store itself, not here.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub avatar: AvatarConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Landing location when no safe redirect target is available
    #[serde(default = "default_next_location")]
    pub default_next: String,
}

/// Identity store settings
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Session cookie settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
        }
    }
}

/// Third-party avatar lookup settings
#[derive(Debug, Deserialize)]
pub struct AvatarConfig {
    #[serde(default = "default_avatar_timeout")]
    pub timeout_secs: u64,
    /// Disable to skip the twitter/github network lookups entirely
    /// (gravatar URLs are computed locally and always available)
    #[serde(default = "default_remote_lookups")]
    pub remote_lookups: bool,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_avatar_timeout(),
            remote_lookups: default_remote_lookups(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_next_location() -> String {
    "/".into()
}

fn default_cookie_name() -> String {
    "idp_session".into()
}

fn default_avatar_timeout() -> u64 {
    3
}

fn default_remote_lookups() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if !config.server.default_next.starts_with('/') {
            return Err(common::Error::Config(format!(
                "default_next must be a local path starting with '/', got: {}",
                config.server.default_next
            )));
        }

        if config.avatar.timeout_secs == 0 {
            return Err(common::Error::Config(
                "avatar timeout_secs must be greater than 0".into(),
            ));
        }

        let cookie = &config.session.cookie_name;
        if cookie.is_empty()
            || cookie
                .chars()
                .any(|c| c.is_ascii_whitespace() || matches!(c, ';' | '=' | ','))
        {
            return Err(common::Error::Config(format!(
                "cookie_name must be a plain token, got: {cookie:?}"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("idp.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"

[store]
path = "/var/lib/idp/idp-store.json"
"#
    }

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("idp-config-test-{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config_applies_defaults() {
        let path = write_config("valid", valid_toml());
        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.default_next, "/");
        assert_eq!(config.session.cookie_name, "idp_session");
        assert_eq!(config.avatar.timeout_secs, 3);
        assert!(config.avatar.remote_lookups);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let path = write_config("invalid", "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let path = write_config(
            "explicit",
            r#"
[server]
listen_addr = "0.0.0.0:9000"
max_connections = 250
default_next = "/home"

[store]
path = "/tmp/store.json"

[session]
cookie_name = "sessid"

[avatar]
timeout_secs = 1
remote_lookups = false
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.max_connections, 250);
        assert_eq!(config.server.default_next, "/home");
        assert_eq!(config.session.cookie_name, "sessid");
        assert_eq!(config.avatar.timeout_secs, 1);
        assert!(!config.avatar.remote_lookups);
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let path = write_config(
            "zero-maxconn",
            r#"
[server]
listen_addr = "127.0.0.1:8080"
max_connections = 0

[store]
path = "/tmp/store.json"
"#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_external_default_next_rejected() {
        let path = write_config(
            "ext-next",
            r#"
[server]
listen_addr = "127.0.0.1:8080"
default_next = "http://evil.com/"

[store]
path = "/tmp/store.json"
"#,
        );
        let result = Config::load(&path);
        assert!(result.is_err(), "absolute default_next must be rejected");
        let err = format!("{}", result.unwrap_err());
        assert!(err.contains("default_next"), "got: {err}");
    }

    #[test]
    fn test_zero_avatar_timeout_rejected() {
        let path = write_config(
            "zero-timeout",
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[store]
path = "/tmp/store.json"

[avatar]
timeout_secs = 0
"#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_malformed_cookie_name_rejected() {
        let path = write_config(
            "bad-cookie",
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[store]
path = "/tmp/store.json"

[session]
cookie_name = "has spaces"
"#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { std::env::remove_var("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("idp.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
        unsafe { std::env::remove_var("CONFIG_PATH") };
    }
}

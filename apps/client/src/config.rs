//! Client configuration from the environment.

use std::path::PathBuf;

use review_core::SessionConfig;

/// Backend base URL.
pub const BACKEND_URL_VAR: &str = "REVIEW_BACKEND_URL";
/// Bearer token issued by `/api/users/register`.
pub const API_TOKEN_VAR: &str = "REVIEW_API_TOKEN";
/// Local SQLite file.
pub const DB_PATH_VAR: &str = "REVIEW_DB_PATH";

/// Where the client stores state and which backend it talks to.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub backend_url: Option<String>,
    pub api_token: Option<String>,
    pub db_path: PathBuf,
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            backend_url: read(BACKEND_URL_VAR).map(|url| url.trim_end_matches('/').to_string()),
            api_token: read(API_TOKEN_VAR),
            db_path: read(DB_PATH_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            session: SessionConfig::default(),
        }
    }

    /// Whether a remote backend is configured and authenticated.
    pub fn is_online(&self) -> bool {
        self.backend_url.is_some() && self.api_token.is_some()
    }
}

/// Default database location in the platform data directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("review-engine")
        .join("review.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ClientConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.backend_url, None);
        assert_eq!(config.api_token, None);
        assert_eq!(config.db_path, default_db_path());
        assert!(config.db_path.ends_with("review-engine/review.db"));
        assert!(!config.is_online());
    }

    #[test]
    fn reads_values_and_trims_trailing_slash() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (BACKEND_URL_VAR, "https://review.example.com/"),
            (API_TOKEN_VAR, "abc"),
            (DB_PATH_VAR, "/tmp/review.db"),
        ]));
        assert_eq!(
            config.backend_url.as_deref(),
            Some("https://review.example.com")
        );
        assert_eq!(config.api_token.as_deref(), Some("abc"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/review.db"));
        assert!(config.is_online());
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (BACKEND_URL_VAR, "  "),
            (API_TOKEN_VAR, ""),
        ]));
        assert_eq!(config.backend_url, None);
        assert_eq!(config.api_token, None);
    }
}

//! Application-level configuration.
//!
//! One flat [`KeygateConfig`] covers everything a deployment sets. The
//! lower crates keep their own config structs; the `*_config` methods here
//! produce them.
//!
//! # Sources
//!
//! | Loader | Input |
//! |---|---|
//! | [`KeygateConfig::from_env`] | `KEYGATE_*` environment variables |
//! | [`KeygateConfig::from_lookup`] | any `key -> value` function (tests) |
//! | [`KeygateConfig::from_json_str`] | a JSON object, missing fields default |
//!
//! Every loader finishes with [`KeygateConfig::validated`].

use std::time::Duration;

use keygate_guard::GuardConfig;
use keygate_session::{RetryPolicy, SessionConfig};
use keygate_token::TokenConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ConfigError;

/// Everything a deployment configures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygateConfig {
    /// Base address of the identity provider. Default: `http://localhost:8080`.
    pub idp_url: String,
    /// Default: `document-demo`.
    pub realm: String,
    /// This application's client at the provider. Default: `frontend-app`.
    pub client_id: String,
    /// Base address of the document backend. Default: `http://localhost:3001/api`.
    pub backend_url: String,
    pub login_path: String,
    pub post_login_path: String,
    /// Where signed-in users without a required role are sent.
    pub fallback_path: String,
    /// Default: 10.
    pub init_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub storage_namespace: String,
    /// Exposes raw provider error text through
    /// [`AuthContext::error_detail`](crate::AuthContext::error_detail).
    pub debug: bool,
}

impl Default for KeygateConfig {
    fn default() -> Self {
        Self {
            idp_url: "http://localhost:8080".to_string(),
            realm: "document-demo".to_string(),
            client_id: "frontend-app".to_string(),
            backend_url: "http://localhost:3001/api".to_string(),
            login_path: "/login".to_string(),
            post_login_path: "/dashboard".to_string(),
            fallback_path: "/dashboard".to_string(),
            init_timeout_secs: 10,
            retry: RetryPolicy::default(),
            storage_namespace: "keygate".to_string(),
            debug: false,
        }
    }
}

impl KeygateConfig {
    /// Upper bound for `init_timeout_secs`.
    pub const MAX_INIT_TIMEOUT_SECS: u64 = 120;

    /// Reads `KEYGATE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from defaults overridden by whatever `lookup`
    /// returns for each `KEYGATE_*` key.
    ///
    /// # Errors
    /// [`ConfigError::InvalidValue`] for a number or flag that doesn't
    /// parse, [`ConfigError::Missing`] for an empty realm or client.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let text = |key: &str, field: &mut String| {
            if let Some(value) = lookup(key) {
                *field = value.trim().to_string();
            }
        };
        text("KEYGATE_IDP_URL", &mut config.idp_url);
        text("KEYGATE_REALM", &mut config.realm);
        text("KEYGATE_CLIENT_ID", &mut config.client_id);
        text("KEYGATE_BACKEND_URL", &mut config.backend_url);
        text("KEYGATE_LOGIN_PATH", &mut config.login_path);
        text("KEYGATE_POST_LOGIN_PATH", &mut config.post_login_path);
        text("KEYGATE_FALLBACK_PATH", &mut config.fallback_path);
        text("KEYGATE_STORAGE_NAMESPACE", &mut config.storage_namespace);

        if let Some(value) = lookup("KEYGATE_INIT_TIMEOUT_SECS") {
            config.init_timeout_secs = parse_number("KEYGATE_INIT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("KEYGATE_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_number("KEYGATE_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("KEYGATE_RETRY_INITIAL_BACKOFF_MS") {
            config.retry.initial_backoff_ms = parse_number("KEYGATE_RETRY_INITIAL_BACKOFF_MS", &value)?;
        }
        if let Some(value) = lookup("KEYGATE_RETRY_MAX_BACKOFF_MS") {
            config.retry.max_backoff_ms = parse_number("KEYGATE_RETRY_MAX_BACKOFF_MS", &value)?;
        }
        if let Some(value) = lookup("KEYGATE_RETRY_JITTER") {
            config.retry.jitter = parse_flag("KEYGATE_RETRY_JITTER", &value)?;
        }
        if let Some(value) = lookup("KEYGATE_DEBUG") {
            config.debug = parse_flag("KEYGATE_DEBUG", &value)?;
        }

        config.checked()
    }

    /// Parses a JSON object. Absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.checked()
    }

    /// Returns the config with out-of-range values fixed:
    ///
    /// - `init_timeout_secs` of 0 becomes the default, above
    ///   [`Self::MAX_INIT_TIMEOUT_SECS`] is clamped.
    /// - Paths that aren't absolute fall back to their defaults.
    /// - Trailing slashes are dropped from both base addresses.
    /// - `retry` goes through [`RetryPolicy::validated`].
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.init_timeout_secs == 0 {
            warn!("init_timeout_secs is 0, using default");
            self.init_timeout_secs = defaults.init_timeout_secs;
        }
        if self.init_timeout_secs > Self::MAX_INIT_TIMEOUT_SECS {
            warn!(
                init_timeout_secs = self.init_timeout_secs,
                max = Self::MAX_INIT_TIMEOUT_SECS,
                "init_timeout_secs exceeds maximum, clamping"
            );
            self.init_timeout_secs = Self::MAX_INIT_TIMEOUT_SECS;
        }
        for (name, path, default) in [
            ("login_path", &mut self.login_path, defaults.login_path),
            ("post_login_path", &mut self.post_login_path, defaults.post_login_path),
            ("fallback_path", &mut self.fallback_path, defaults.fallback_path),
        ] {
            if !path.starts_with('/') {
                warn!(field = name, value = %path, "path must be absolute, using default");
                *path = default;
            }
        }
        for base in [&mut self.idp_url, &mut self.backend_url] {
            let trimmed = base.trim_end_matches('/').len();
            base.truncate(trimmed);
        }
        self.retry = self.retry.validated();
        self
    }

    /// `<idp_url>/realms/<realm>`, the issuer the provider stamps into tokens.
    pub fn issuer_url(&self) -> String {
        format!("{}/realms/{}", self.idp_url, self.realm)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            init_timeout: Duration::from_secs(self.init_timeout_secs),
            retry: self.retry.clone(),
            login_path: self.login_path.clone(),
            post_login_path: self.post_login_path.clone(),
            storage_namespace: self.storage_namespace.clone(),
        }
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            login_path: self.login_path.clone(),
            fallback_path: self.fallback_path.clone(),
        }
    }

    pub fn token_config(&self) -> TokenConfig {
        TokenConfig::default()
    }

    fn checked(self) -> Result<Self, ConfigError> {
        if self.realm.is_empty() {
            return Err(ConfigError::Missing("realm"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }
        Ok(self.validated())
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

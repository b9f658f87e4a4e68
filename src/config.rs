//! Environment variable configuration, read once at registry construction.
//!
//! Grounded in `examples/original_source/src/dispatch/config.py`'s
//! `NamedValueFromEnvironment` and the env var reads scattered across
//! `http.py`/`__init__.py`. Rust has no pickling concern (the Python type
//! exists so a secret's value survives `__getstate__`/`__setstate__` across a
//! process fork while still re-reading the environment), so this is a plain
//! struct populated once; what is carried over is the *provenance* tracking —
//! [`ConfigSource`] — so error messages can still name which environment
//! variable a secret came from, per spec.md §4.9.

use std::env;

use crate::status::Status;

/// Where a configuration value came from, so error messages can point at the
/// right place to fix (spec.md §4.9: "a message naming the configuration
/// source of the key").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Env(&'static str),
    Explicit,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Env(var) => write!(f, "environment variable {var}"),
            ConfigSource::Explicit => write!(f, "an explicitly provided value"),
        }
    }
}

/// The public orchestrator URL used when `DISPATCH_API_URL` is unset.
pub const DEFAULT_API_URL: &str = crate::client::DEFAULT_API_URL;

/// The default bind address for the endpoint's HTTP server.
pub const DEFAULT_ENDPOINT_ADDR: &str = "[::]:8000";

/// Errors encountered while assembling a [`Config`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} does not hold a valid Ed25519 verification key: {1}")]
    InvalidVerificationKey(ConfigSource, String),
}

impl ConfigError {
    pub fn status(&self) -> Status {
        match self {
            ConfigError::InvalidVerificationKey(..) => Status::InvalidArgument,
        }
    }
}

/// Process configuration assembled from `DISPATCH_*` environment variables,
/// per spec.md §6.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<(String, ConfigSource)>,
    pub api_url: (String, ConfigSource),
    pub endpoint_url: Option<(String, ConfigSource)>,
    pub endpoint_addr: (String, ConfigSource),
    pub verification_key: Option<(ed25519_dalek::VerifyingKey, ConfigSource)>,
}

impl Config {
    /// Read configuration from `DISPATCH_API_KEY`, `DISPATCH_API_URL`,
    /// `DISPATCH_ENDPOINT_URL`, `DISPATCH_ENDPOINT_ADDR` and
    /// `DISPATCH_VERIFICATION_KEY`.
    pub fn from_env() -> Result<Config, ConfigError> {
        let api_key = read_env("DISPATCH_API_KEY");
        let api_url = read_env("DISPATCH_API_URL")
            .unwrap_or_else(|| (DEFAULT_API_URL.to_string(), ConfigSource::Explicit));
        let endpoint_url = read_env("DISPATCH_ENDPOINT_URL");
        let endpoint_addr = read_env("DISPATCH_ENDPOINT_ADDR")
            .unwrap_or_else(|| (DEFAULT_ENDPOINT_ADDR.to_string(), ConfigSource::Explicit));

        let verification_key = match env::var("DISPATCH_VERIFICATION_KEY") {
            Ok(raw) => {
                let source = ConfigSource::Env("DISPATCH_VERIFICATION_KEY");
                // The orchestrator ships multi-line PEM keys as a single env
                // var with literal `\n` escapes; unescape before parsing,
                // matching spec.md §6.
                let unescaped = raw.replace("\\n", "\n");
                let key = crate::signature::parse_verification_key(&unescaped)
                    .map_err(|e| ConfigError::InvalidVerificationKey(source.clone(), e.to_string()))?;
                Some((key, source))
            }
            Err(_) => None,
        };

        tracing::debug!(
            api_url = %api_url.0,
            endpoint_addr = %endpoint_addr.0,
            verification_enabled = verification_key.is_some(),
            "loaded configuration from environment"
        );

        Ok(Config {
            api_key,
            api_url,
            endpoint_url,
            endpoint_addr,
            verification_key,
        })
    }

    /// The source to blame in an error message if the dispatch API key turns
    /// out to be invalid, e.g. rejected by the orchestrator.
    pub fn api_key_source(&self) -> &'static str {
        match &self.api_key {
            Some((_, ConfigSource::Env(var))) => var,
            _ => "DISPATCH_API_KEY",
        }
    }
}

fn read_env(var: &'static str) -> Option<(String, ConfigSource)> {
    env::var(var).ok().map(|v| (v, ConfigSource::Env(var)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that mutate
    // them so they don't observe each other's writes.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in [
            "DISPATCH_API_KEY",
            "DISPATCH_API_URL",
            "DISPATCH_ENDPOINT_URL",
            "DISPATCH_ENDPOINT_ADDR",
            "DISPATCH_VERIFICATION_KEY",
        ] {
            env::remove_var(var);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.api_url.0, DEFAULT_API_URL);
        assert_eq!(config.endpoint_addr.0, DEFAULT_ENDPOINT_ADDR);
        assert!(config.verification_key.is_none());
        assert!(config.api_key.is_none());
    }

    #[test]
    fn invalid_verification_key_names_its_source() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("DISPATCH_VERIFICATION_KEY", "not a valid key");
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.status(), Status::InvalidArgument);
        assert!(err.to_string().contains("DISPATCH_VERIFICATION_KEY"));
        env::remove_var("DISPATCH_VERIFICATION_KEY");
    }
}

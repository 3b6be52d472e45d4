//! Configuration loading.
//!
//! Provider credentials are layered through `ortho-config` (defaults,
//! `kiln.toml`, `HCLOUD_*` environment variables). The per-build settings
//! live in a JSON template handled by [`template`].

mod template;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

pub use template::{BuildConfig, ImageFilter};

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

/// Default action poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Provider settings derived from environment variables and `kiln.toml`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "HCLOUD")]
pub struct ProviderConfig {
    /// API token used as bearer credential. Required.
    pub token: String,
    /// API base URL.
    #[ortho_config(default = DEFAULT_ENDPOINT.to_owned())]
    pub endpoint: String,
    /// Interval between action polls, in milliseconds.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ProviderConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [hcloud] in kiln.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("kiln")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Checks that required values are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and TOML key that supply the missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.token,
            &FieldMetadata::new("API token", "HCLOUD_TOKEN", "token"),
        )?;
        Self::require_field(
            &self.endpoint,
            &FieldMetadata::new("API endpoint", "HCLOUD_ENDPOINT", "endpoint"),
        )?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::MissingField(String::from(
                "poll_interval_ms must be positive: set HCLOUD_POLL_INTERVAL_MS or add \
                 poll_interval_ms to [hcloud] in kiln.toml",
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required provider setting is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Merging configuration layers failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// The build template could not be read.
    #[error("failed to read template `{path}`: {message}")]
    Read {
        /// Template path.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// The build template failed validation.
    #[error("invalid template: {}", problems.join("; "))]
    Invalid {
        /// Every problem found, in template field order.
        problems: Vec<String>,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn provider() -> ProviderConfig {
        ProviderConfig {
            token: String::from("hcloud-token"),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    #[rstest]
    fn valid_provider_config_passes(provider: ProviderConfig) {
        assert_eq!(provider.validate(), Ok(()));
        assert_eq!(provider.poll_interval(), Duration::from_millis(500));
    }

    #[rstest]
    fn missing_token_names_env_var_and_key(provider: ProviderConfig) {
        let cfg = ProviderConfig {
            token: String::from("  "),
            ..provider
        };

        let message = cfg.validate().expect_err("token is required").to_string();

        assert!(message.contains("HCLOUD_TOKEN"), "{message}");
        assert!(message.contains("kiln.toml"), "{message}");
    }

    #[rstest]
    fn zero_poll_interval_is_rejected(provider: ProviderConfig) {
        let cfg = ProviderConfig {
            poll_interval_ms: 0,
            ..provider
        };
        assert!(cfg.validate().is_err());
    }
}

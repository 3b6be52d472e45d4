//! SSH communicator settings loaded via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;

/// SSH settings merged from defaults, `kiln.toml` and `KILN_SSH_*` variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "KILN_SSH")]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `ssh-keygen` executable.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub keygen_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub user: String,
    /// Remote SSH port.
    #[ortho_config(default = 22)]
    pub port: u16,
    /// Known hosts file; `/dev/null` suits throwaway servers.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// How long to wait for the server to accept SSH, in seconds.
    #[ortho_config(default = 300)]
    pub connect_timeout_secs: u64,
    /// Pause between two connection attempts, in milliseconds.
    #[ortho_config(default = 2000)]
    pub retry_interval_ms: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            keygen_bin: String::from("ssh-keygen"),
            user: String::from("root"),
            port: 22,
            known_hosts_file: String::from("/dev/null"),
            connect_timeout_secs: 300,
            retry_interval_ms: 2000,
        }
    }
}

impl SshConfig {
    /// Loads settings without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("kiln")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that required values are present after trimming.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the variable to set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, field) in [
            (self.ssh_bin.as_str(), "ssh_bin"),
            (self.keygen_bin.as_str(), "keygen_bin"),
            (self.user.as_str(), "user"),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "missing {field}: set KILN_SSH_{} or add {field} to [ssh] in kiln.toml",
                    field.to_uppercase()
                )));
            }
        }
        Ok(())
    }

    /// Connection deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Pause between connection attempts.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

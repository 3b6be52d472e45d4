//! JSON build template.

use camino::Utf8Path;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::ConfigError;
use crate::paths::{expand_tilde, is_file_ambient, read_to_string_ambient};
use crate::provider::Labels;

/// Selects the source image by label instead of by name.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ImageFilter {
    /// Label selectors, joined with `,` when querying.
    #[serde(default)]
    pub with_selector: Vec<String>,
    /// Pick the newest match when several images qualify.
    #[serde(default)]
    pub most_recent: bool,
}

impl ImageFilter {
    /// Returns the selectors in the provider's query syntax.
    #[must_use]
    pub fn label_selector(&self) -> String {
        self.with_selector.join(",")
    }
}

/// Per-build settings, read-only once validated.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "template toggles map one-to-one onto user-facing switches"
)]
pub struct BuildConfig {
    /// Name of the temporary server. Defaults to `kiln-<uuid>`.
    pub server_name: String,
    /// Location such as `nbg1`.
    pub location: String,
    /// Server type used for the build.
    pub server_type: String,
    /// Server type switched to after creation, keeping the disk size.
    pub upgrade_server_type: Option<String>,
    /// Source image id or name.
    pub image: Option<String>,
    /// Source image label filter.
    pub image_filter: Option<ImageFilter>,
    /// Snapshot name. Defaults to `kiln-<unix timestamp>`.
    pub snapshot_name: String,
    /// Labels attached to the snapshot.
    pub snapshot_labels: Labels,
    /// Labels attached to the temporary server.
    pub server_labels: Labels,
    /// Labels attached to the temporary SSH key.
    pub ssh_keys_labels: Labels,
    /// Inline cloud-init user data.
    pub user_data: Option<String>,
    /// Path to a cloud-init user-data file.
    pub user_data_file: Option<String>,
    /// Additional SSH keys (id or name) injected into the server.
    pub ssh_keys: Vec<String>,
    /// Firewalls (id or name) applied to the server.
    pub firewalls: Vec<String>,
    /// Private network ids the server is attached to.
    pub networks: Vec<i64>,
    /// Primary IPv4 to assign (id, name or address).
    pub public_ipv4: Option<String>,
    /// Primary IPv6 to assign (id, name or address).
    pub public_ipv6: Option<String>,
    /// Create the server without a public IPv4 address.
    pub public_ipv4_disabled: bool,
    /// Create the server without a public IPv6 block.
    pub public_ipv6_disabled: bool,
    /// Rescue system type to boot into, for example `linux64`.
    pub rescue: Option<String>,
    /// Skip snapshot creation entirely.
    pub skip_create_snapshot: bool,
    /// Replace an existing snapshot with the same name.
    pub force: bool,
    /// Dump the temporary private key for debugging.
    pub debug: bool,
    /// Private key used instead of a generated one.
    pub ssh_private_key_file: Option<String>,
    /// Shell commands run on the server before it is shut down.
    pub provisioners: Vec<String>,
}

impl BuildConfig {
    /// Reads a template, fills defaults and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read,
    /// [`ConfigError::Parse`] when it is not a valid template and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let expanded = expand_tilde(path.as_str());
        let raw = read_to_string_ambient(&expanded).map_err(|message| ConfigError::Read {
            path: expanded.clone(),
            message,
        })?;
        Self::from_json(&raw)
    }

    /// Parses a template from JSON, fills defaults and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fills generated names and drops empty optional strings.
    pub fn apply_defaults(&mut self) {
        if self.server_name.trim().is_empty() {
            self.server_name = format!("kiln-{}", Uuid::new_v4());
        }
        if self.snapshot_name.trim().is_empty() {
            self.snapshot_name = format!("kiln-{}", Utc::now().timestamp());
        }
        for field in [
            &mut self.upgrade_server_type,
            &mut self.image,
            &mut self.user_data,
            &mut self.user_data_file,
            &mut self.public_ipv4,
            &mut self.public_ipv6,
            &mut self.rescue,
            &mut self.ssh_private_key_file,
        ] {
            if field.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *field = None;
            }
        }
    }

    /// Collects every problem with the template.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing all problems found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.location.trim().is_empty() {
            problems.push(String::from("location is required"));
        }
        if self.server_type.trim().is_empty() {
            problems.push(String::from("server type is required"));
        }

        match (&self.image, &self.image_filter) {
            (None, None) => problems.push(String::from("image or image_filter is required")),
            (_, Some(filter)) if filter.with_selector.is_empty() => problems.push(String::from(
                "image_filter.with_selector is required when specifying filter",
            )),
            (Some(_), Some(_)) => problems.push(String::from(
                "only one of image or image_filter can be specified",
            )),
            _ => {}
        }

        if self.user_data.is_some() && self.user_data_file.is_some() {
            problems.push(String::from(
                "only one of user_data or user_data_file can be specified",
            ));
        } else if let Some(file) = &self.user_data_file
            && !is_file_ambient(&expand_tilde(file))
        {
            problems.push(format!("user_data_file not found: {file}"));
        }

        if self.public_ipv4.is_some() && self.public_ipv4_disabled {
            problems.push(String::from(
                "public_ipv4 cannot be set when public_ipv4_disabled is true",
            ));
        }
        if self.public_ipv6.is_some() && self.public_ipv6_disabled {
            problems.push(String::from(
                "public_ipv6 cannot be set when public_ipv6_disabled is true",
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

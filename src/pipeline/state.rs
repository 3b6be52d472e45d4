//! Build-local state shared by the steps.

use std::net::IpAddr;

use crate::communicator::GeneratedData;
use crate::provider::{Image, ServerType};

use super::BuildError;

/// A cleanup failure reported during unwind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CleanupReport {
    /// Step whose cleanup failed.
    pub step: &'static str,
    /// Human readable description, including manual follow-up.
    pub message: String,
}

/// Values produced by steps and read by later ones.
///
/// Every field starts empty; each is written by exactly one step.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildState {
    /// Resolved base server type.
    pub server_type: Option<ServerType>,
    /// Snapshot to delete once its replacement exists.
    pub old_snapshot_id: Option<i64>,
    /// Temporary SSH key.
    pub ssh_key_id: Option<i64>,
    /// Image the server booted from.
    pub source_image: Option<Image>,
    /// Build server.
    pub server_id: Option<i64>,
    /// Alias of the server id handed to provisioning.
    pub instance_id: Option<i64>,
    /// Address used to reach the build server.
    pub server_ip: Option<IpAddr>,
    /// Created snapshot.
    pub snapshot_id: Option<i64>,
    /// Name of the created snapshot.
    pub snapshot_name: Option<String>,
    /// Data produced while provisioning.
    pub generated_data: GeneratedData,
    /// First error that halted the build.
    pub error: Option<BuildError>,
    /// Failures reported while unwinding.
    pub cleanup_reports: Vec<CleanupReport>,
}

impl BuildState {
    /// Records `err` unless an earlier error is already recorded.
    ///
    /// Returns `true` when `err` became the build's error.
    pub fn record_error(&mut self, err: BuildError) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(err);
        true
    }

    /// Returns the resolved server type.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingState`] before validation has run.
    pub fn require_server_type(&self) -> Result<&ServerType, BuildError> {
        self.server_type
            .as_ref()
            .ok_or(BuildError::MissingState("server_type"))
    }

    /// Returns the build server id.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingState`] before the server exists.
    pub const fn require_server_id(&self) -> Result<i64, BuildError> {
        match self.server_id {
            Some(id) => Ok(id),
            None => Err(BuildError::MissingState("server_id")),
        }
    }

    /// Returns the temporary SSH key id.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingState`] before the key was uploaded.
    pub const fn require_ssh_key_id(&self) -> Result<i64, BuildError> {
        match self.ssh_key_id {
            Some(id) => Ok(id),
            None => Err(BuildError::MissingState("ssh_key_id")),
        }
    }

    /// Returns the build server address.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingState`] before the server exists.
    pub const fn require_server_ip(&self) -> Result<IpAddr, BuildError> {
        match self.server_ip {
            Some(ip) => Ok(ip),
            None => Err(BuildError::MissingState("server_ip")),
        }
    }
}

//! Cloud provider abstraction consumed by the build pipeline.
//!
//! [`CloudApi`] covers exactly the calls the pipeline makes: server types,
//! images, SSH keys, firewalls, primary IPs, servers and their actions. The
//! trait returns boxed futures so the pipeline can hold it as a trait object;
//! [`crate::hcloud::HcloudClient`] is the production implementation and
//! [`crate::test_support::FakeCloud`] the scripted double.

mod types;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub use types::{
    Action, ActionError, ActionStatus, Architecture, Firewall, Image, ImageKind, ImageQuery,
    Ipv6Block, Labels, PrimaryIp, PrimaryIpKind, PrivateNet, PublicNetRequest, Server,
    ServerCreate, ServerCreated, ServerType, SnapshotCreate, SnapshotCreated, SshKey,
    SshKeyCreate,
};

/// Boxed future returned by [`CloudApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Errors surfaced by provider calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The provider answered with an error document.
    #[error("{message} ({code}, status {status})")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Provider error code such as `not_found` or `uniqueness_error`.
        code: String,
        /// Provider error message.
        message: String,
    },
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),
    /// The response body did not match the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns `true` when the provider reported the resource as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status, code, .. } if *status == 404 || code == "not_found")
    }
}

/// Provider operations used by the build steps and the artifact.
///
/// Lookups that may legitimately find nothing return `Ok(None)` instead of an
/// error so callers can phrase their own "not found" message.
pub trait CloudApi: Send + Sync {
    /// Looks up a server type by name.
    fn get_server_type<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<ServerType>>;

    /// Lists every image matching `query`, following pagination.
    fn list_images<'a>(&'a self, query: &'a ImageQuery) -> ApiFuture<'a, Vec<Image>>;

    /// Resolves an image by id or name for one architecture.
    fn get_image_for_architecture<'a>(
        &'a self,
        id_or_name: &'a str,
        architecture: Architecture,
    ) -> ApiFuture<'a, Option<Image>>;

    /// Looks up an image by id.
    fn get_image(&self, id: i64) -> ApiFuture<'_, Option<Image>>;

    /// Deletes an image.
    fn delete_image(&self, id: i64) -> ApiFuture<'_, ()>;

    /// Uploads an SSH public key.
    fn create_ssh_key<'a>(&'a self, request: &'a SshKeyCreate) -> ApiFuture<'a, SshKey>;

    /// Resolves an SSH key by id or name.
    fn get_ssh_key<'a>(&'a self, id_or_name: &'a str) -> ApiFuture<'a, Option<SshKey>>;

    /// Deletes an SSH key.
    fn delete_ssh_key(&self, id: i64) -> ApiFuture<'_, ()>;

    /// Resolves a firewall by id or name.
    fn get_firewall<'a>(&'a self, id_or_name: &'a str) -> ApiFuture<'a, Option<Firewall>>;

    /// Resolves a primary IP by id or name.
    fn get_primary_ip<'a>(&'a self, id_or_name: &'a str) -> ApiFuture<'a, Option<PrimaryIp>>;

    /// Resolves a primary IP by its address.
    fn get_primary_ip_by_ip<'a>(&'a self, ip: &'a str) -> ApiFuture<'a, Option<PrimaryIp>>;

    /// Creates a server.
    fn create_server<'a>(&'a self, request: &'a ServerCreate) -> ApiFuture<'a, ServerCreated>;

    /// Deletes a server, returning the deletion action.
    fn delete_server(&self, id: i64) -> ApiFuture<'_, Action>;

    /// Lists actions of a server that are still running.
    fn list_running_server_actions(&self, server_id: i64) -> ApiFuture<'_, Vec<Action>>;

    /// Changes the server type; the disk is never upgraded.
    fn change_server_type<'a>(
        &'a self,
        server_id: i64,
        server_type: &'a str,
    ) -> ApiFuture<'a, Action>;

    /// Powers a server on.
    fn power_on(&self, server_id: i64) -> ApiFuture<'_, Action>;

    /// Sends an ACPI shutdown request.
    fn shutdown(&self, server_id: i64) -> ApiFuture<'_, Action>;

    /// Hard-resets a server.
    fn reset(&self, server_id: i64) -> ApiFuture<'_, Action>;

    /// Enables the rescue system with the given SSH keys.
    fn enable_rescue<'a>(
        &'a self,
        server_id: i64,
        rescue_type: &'a str,
        ssh_keys: &'a [i64],
    ) -> ApiFuture<'a, Action>;

    /// Disables the rescue system.
    fn disable_rescue(&self, server_id: i64) -> ApiFuture<'_, Action>;

    /// Creates a snapshot image of a server's disk.
    fn create_snapshot<'a>(
        &'a self,
        server_id: i64,
        request: &'a SnapshotCreate,
    ) -> ApiFuture<'a, SnapshotCreated>;

    /// Fetches the current state of an action.
    fn get_action(&self, id: i64) -> ApiFuture<'_, Action>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(404, "not_found", true)]
    #[case(400, "not_found", true)]
    #[case(404, "other", true)]
    #[case(409, "uniqueness_error", false)]
    fn not_found_detection(#[case] status: u16, #[case] code: &str, #[case] expected: bool) {
        let err = ApiError::Http {
            status,
            code: code.to_owned(),
            message: String::from("boom"),
        };
        assert_eq!(err.is_not_found(), expected);
    }

    #[test]
    fn transport_errors_are_not_not_found() {
        assert!(!ApiError::Transport(String::from("reset")).is_not_found());
    }
}

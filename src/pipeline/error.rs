//! Errors recorded by build steps.

use thiserror::Error;

use crate::action::WaitError;
use crate::communicator::CommunicatorError;
use crate::provider::{ApiError, Architecture};
use crate::user_data::UserDataError;

/// The single error a failed build reports.
///
/// Request and action failures carry the intent of the call that failed, for
/// example "Could not create server".
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BuildError {
    /// The configured server type does not exist.
    #[error("Could not find server type '{0}'")]
    ServerTypeNotFound(String),
    /// The configured upgrade server type does not exist.
    #[error("Could not find upgrade server type '{0}'")]
    UpgradeServerTypeNotFound(String),
    /// The base and upgrade server types run on different architectures.
    #[error(
        "server_type and upgrade_server_type have incompatible architectures ({base} vs {upgrade})"
    )]
    IncompatibleArchitectures {
        /// Architecture of the base server type.
        base: Architecture,
        /// Architecture of the upgrade server type.
        upgrade: Architecture,
    },
    /// A snapshot with the target name exists and overwriting was not requested.
    #[error("Found existing snapshot (id={id}, arch={architecture}) with name '{name}'")]
    SnapshotNameInUse {
        /// Identifier of the existing snapshot.
        id: i64,
        /// Architecture the snapshot was found for.
        architecture: Architecture,
        /// Snapshot name in use.
        name: String,
    },
    /// A named resource could not be resolved.
    #[error("Could not find {kind} '{name}'")]
    NotFound {
        /// Resource kind such as `SSH key` or `firewall`.
        kind: &'static str,
        /// Identifier or name that was looked up.
        name: String,
    },
    /// An image selector matched nothing.
    #[error("no image found for selector \"{0}\"")]
    NoImageForSelector(String),
    /// An image selector matched several images without `most_recent`.
    #[error("more than one image found for selector \"{0}\"")]
    AmbiguousImageSelector(String),
    /// A primary IP was resolved for the wrong address family.
    #[error("Primary ip {ip} is not an {family} address")]
    PrimaryIpFamily {
        /// Configured identifier, name or address.
        ip: String,
        /// Expected family, `IPv4` or `IPv6`.
        family: &'static str,
    },
    /// A provider request failed.
    #[error("{context}: {source}")]
    Request {
        /// What the failing call was meant to do.
        context: String,
        /// Provider error.
        source: ApiError,
    },
    /// An action finished in error or could not be awaited.
    #[error("{context}: {source}")]
    Action {
        /// What the awaited action was meant to do.
        context: String,
        /// Wait failure.
        source: WaitError,
    },
    /// The old snapshot could not be removed after its replacement was created.
    #[error("Could not delete old snapshot id={id}: {source}")]
    OldSnapshotDelete {
        /// Identifier of the stale snapshot left behind.
        id: i64,
        /// Provider error.
        source: ApiError,
    },
    /// User data could not be resolved.
    #[error("Could not read user data file: {0}")]
    UserData(#[from] UserDataError),
    /// The communicator has no public key to upload.
    #[error("missing SSH public key in communicator")]
    MissingPublicKey,
    /// The created server exposes no reachable address.
    #[error("Could not find available ip")]
    NoAvailableIp,
    /// The communicator failed to connect or provision.
    #[error(transparent)]
    Communicator(#[from] CommunicatorError),
    /// The debug copy of the private key could not be written.
    #[error("Could not write private key to {path}: {message}")]
    DumpPrivateKey {
        /// Target file.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// A step ran before the step that produces its input.
    #[error("build state is missing {0}")]
    MissingState(&'static str),
    /// The build was cancelled between steps.
    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    /// Wraps a provider error with the intent of the failed call.
    pub fn request(context: impl Into<String>, source: ApiError) -> Self {
        Self::Request {
            context: context.into(),
            source,
        }
    }

    /// Wraps a wait failure with the intent of the awaited action.
    pub fn action(context: impl Into<String>, source: WaitError) -> Self {
        Self::Action {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` when the failure stems from cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Action {
                    source: WaitError::Cancelled { .. },
                    ..
                }
                | Self::Communicator(CommunicatorError::Cancelled)
        )
    }
}

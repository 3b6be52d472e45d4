//! Remote-connect collaborator used by the connect and provision steps.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Boxed future returned by [`Communicator`] methods.
pub type CommunicatorFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CommunicatorError>> + Send + 'a>>;

/// Data produced by provisioning, exposed on the artifact.
pub type GeneratedData = BTreeMap<String, String>;

/// Errors raised by a communicator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommunicatorError {
    /// The host never became reachable.
    #[error("timed out waiting for SSH on {host}")]
    Timeout {
        /// Address that was probed.
        host: IpAddr,
    },
    /// Talking to the server was interrupted by cancellation.
    #[error("cancelled while talking to the build server")]
    Cancelled,
    /// A helper program could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program name.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// A command exited unsuccessfully.
    #[error("{program} exited with status {status}: {stderr}")]
    CommandFailed {
        /// Program or remote command that failed.
        program: String,
        /// Exit status text.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Key material could not be prepared or stored.
    #[error("key material error: {0}")]
    Key(String),
}

/// Server a provisioning run targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProvisionTarget {
    /// Address to connect to.
    pub host: IpAddr,
    /// Provider identifier of the server, exported as `INSTANCE_ID`.
    pub instance_id: i64,
}

/// Connects to and provisions the build server.
pub trait Communicator: Send + Sync {
    /// Public key uploaded as the temporary credential, if one exists.
    fn public_key(&self) -> Option<&str>;

    /// Private key matching [`Communicator::public_key`], if held in memory.
    fn private_key(&self) -> Option<&str>;

    /// Waits until `host` accepts SSH connections.
    fn connect<'a>(
        &'a self,
        host: IpAddr,
        cancel: &'a CancellationToken,
    ) -> CommunicatorFuture<'a, ()>;

    /// Runs the configured provisioning commands on the target, stopping
    /// between or during commands once `cancel` fires.
    fn provision<'a>(
        &'a self,
        target: ProvisionTarget,
        commands: &'a [String],
        cancel: &'a CancellationToken,
    ) -> CommunicatorFuture<'a, GeneratedData>;

    /// Deletes the temporary public key from the server's
    /// `authorized_keys` files so it is not baked into the snapshot.
    fn remove_temporary_key<'a>(
        &'a self,
        host: IpAddr,
        cancel: &'a CancellationToken,
    ) -> CommunicatorFuture<'a, ()>;
}

//! Core library for the kiln snapshot builder.
//!
//! A build runs a fixed list of steps against Hetzner Cloud: validate the
//! template, upload a temporary SSH key, create a server, wait for SSH, run
//! the provisioning commands, strip the temporary key from the server, shut
//! it down and snapshot its disk.
//! Whatever the outcome, the steps that ran are unwound in reverse order so
//! the temporary key and server never outlive the build; the first error a
//! step records is what the caller sees.

pub mod action;
pub mod artifact;
pub mod builder;
pub mod communicator;
pub mod config;
pub mod hcloud;
pub mod paths;
pub mod pipeline;
pub mod provider;
pub mod ssh;
pub mod steps;
pub mod test_support;
pub mod ui;
pub mod user_data;

pub use action::{ActionWaiter, WaitError};
pub use artifact::Artifact;
pub use builder::Builder;
pub use communicator::{Communicator, CommunicatorError, GeneratedData, ProvisionTarget};
pub use config::{BuildConfig, ConfigError, ImageFilter, ProviderConfig};
pub use hcloud::HcloudClient;
pub use pipeline::{
    BuildContext, BuildError, BuildState, CleanupReport, RunStatus, Runner, Step, StepAction,
};
pub use provider::{ApiError, CloudApi};
pub use ssh::{ProcessCommandRunner, SshCommunicator, SshConfig};
pub use ui::{StderrUi, Ui};
pub use user_data::{UserDataError, resolve_user_data};

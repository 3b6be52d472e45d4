//! The build steps, in the order the builder runs them.

mod connect;
mod create_server;
mod pre_validate;
mod resolve;
mod shutdown;
mod snapshot;
mod ssh_key;

pub use connect::{CleanupTempKeys, Connect, Provision};
pub use create_server::CreateServer;
pub use pre_validate::PreValidate;
pub use resolve::select_image;
pub use shutdown::Shutdown;
pub use snapshot::CreateSnapshot;
pub use ssh_key::{CreateSshKey, DumpPrivateKey};

//! Wires configuration, collaborators and steps into one build.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::action::ActionWaiter;
use crate::artifact::Artifact;
use crate::communicator::Communicator;
use crate::config::BuildConfig;
use crate::pipeline::{BuildContext, BuildError, BuildState, RunStatus, Runner};
use crate::provider::CloudApi;
use crate::steps::{
    CleanupTempKeys, Connect, CreateServer, CreateSnapshot, CreateSshKey, DumpPrivateKey,
    PreValidate, Provision, Shutdown,
};
use crate::ui::Ui;

/// Runs one snapshot build against a provider.
pub struct Builder {
    config: BuildConfig,
    api: Arc<dyn CloudApi>,
    poll_interval: Duration,
}

impl Builder {
    /// Creates a builder for a validated template.
    #[must_use]
    pub fn new(config: BuildConfig, api: Arc<dyn CloudApi>, poll_interval: Duration) -> Self {
        Self {
            config,
            api,
            poll_interval,
        }
    }

    /// Template the builder runs.
    #[must_use]
    pub const fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// The step sequence for this template.
    #[must_use]
    pub fn runner<'env>(&self) -> Runner<BuildContext<'env>> {
        let dump_key = self.config.debug && self.config.ssh_private_key_file.is_none();
        Runner::new()
            .step(PreValidate)
            .step_if(dump_key, DumpPrivateKey)
            .step(CreateSshKey::new())
            .step(CreateServer::new())
            .step(Connect)
            .step(Provision)
            .step(CleanupTempKeys)
            .step(Shutdown)
            .step(CreateSnapshot)
    }

    /// Runs every step and turns the final state into the build result.
    ///
    /// Returns `Ok(None)` when the run completed without creating a snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded by a step, or
    /// [`BuildError::Cancelled`] when `cancel` fired between steps.
    pub async fn run(
        &self,
        communicator: &dyn Communicator,
        ui: &dyn Ui,
        cancel: CancellationToken,
    ) -> Result<Option<Artifact>, BuildError> {
        let waiter = ActionWaiter::new(self.poll_interval, cancel.clone());
        let mut ctx = BuildContext::new(&self.config, self.api.as_ref(), communicator, ui, waiter);
        let mut runner = self.runner();
        info!(steps = ?runner.step_names(), "starting build");
        let status = runner.run(&mut ctx, &cancel).await;
        let state = ctx.state;

        if !state.cleanup_reports.is_empty() {
            warn!(
                count = state.cleanup_reports.len(),
                "cleanup left resources behind"
            );
        }
        if let Some(err) = state.error {
            return Err(err);
        }
        if status == RunStatus::Cancelled {
            return Err(BuildError::Cancelled);
        }
        Ok(self.artifact(state))
    }

    fn artifact(&self, state: BuildState) -> Option<Artifact> {
        let snapshot_id = state.snapshot_id?;
        let (source_image, source_image_id) = state.source_image.map_or_else(
            || (String::new(), 0),
            |image| {
                let name = image.name.unwrap_or_else(|| image.id.to_string());
                (name, image.id)
            },
        );
        Some(Artifact::new(
            state
                .snapshot_name
                .unwrap_or_else(|| self.config.snapshot_name.clone()),
            snapshot_id,
            source_image,
            source_image_id,
            state
                .server_type
                .map_or_else(|| self.config.server_type.clone(), |found| found.name),
            state.generated_data,
            Arc::clone(&self.api),
        ))
    }
}

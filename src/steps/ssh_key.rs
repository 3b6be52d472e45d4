//! Temporary SSH credential handling.

use uuid::Uuid;

use crate::paths::write_ambient;
use crate::pipeline::{BuildContext, BuildError, Step, StepAction, StepFuture};
use crate::provider::SshKeyCreate;

/// Uploads the communicator's public key; cleanup deletes it again.
#[derive(Debug, Default)]
pub struct CreateSshKey {
    key_id: Option<i64>,
}

impl CreateSshKey {
    /// Creates the step.
    #[must_use]
    pub const fn new() -> Self {
        Self { key_id: None }
    }

    async fn upload(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        ctx.ui.say("Uploading temporary SSH key for instance...");
        let public_key = ctx
            .communicator
            .public_key()
            .ok_or(BuildError::MissingPublicKey)?;
        let request = SshKeyCreate {
            name: format!("kiln-{}", Uuid::new_v4()),
            public_key: public_key.to_owned(),
            labels: ctx.config.ssh_keys_labels.clone(),
        };
        let key = ctx
            .api
            .create_ssh_key(&request)
            .await
            .map_err(|err| BuildError::request("Could not upload temporary SSH key", err))?;
        self.key_id = Some(key.id);
        ctx.state.ssh_key_id = Some(key.id);
        Ok(())
    }
}

impl<'env> Step<BuildContext<'env>> for CreateSshKey {
    fn name(&self) -> &'static str {
        "create_ssh_key"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = self.upload(ctx).await;
            ctx.finish(result)
        })
    }

    fn cleanup<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, ()> {
        Box::pin(async move {
            let Some(key_id) = self.key_id.take() else {
                return;
            };
            ctx.ui.say("Deleting temporary SSH key...");
            if let Err(err) = ctx.api.delete_ssh_key(key_id).await {
                ctx.report_cleanup(
                    "create_ssh_key",
                    format!("Could not cleanup temporary SSH key {key_id}: {err}"),
                );
            }
        })
    }
}

/// Writes the temporary private key to `ssh_key_<server name>.pem` so a
/// failed build can be inspected by hand.
#[derive(Clone, Copy, Debug, Default)]
pub struct DumpPrivateKey;

impl DumpPrivateKey {
    /// File the key is written to for a given server name.
    #[must_use]
    pub fn file_name(server_name: &str) -> String {
        format!("ssh_key_{server_name}.pem")
    }

    fn dump(ctx: &BuildContext<'_>) -> Result<(), BuildError> {
        let path = Self::file_name(&ctx.config.server_name);
        let private_key = ctx
            .communicator
            .private_key()
            .ok_or_else(|| BuildError::DumpPrivateKey {
                path: path.clone(),
                message: String::from("no private key available"),
            })?;
        ctx.ui.say(&format!("Saving key for debug purposes: {path}"));
        write_ambient(&path, private_key)
            .map_err(|message| BuildError::DumpPrivateKey { path, message })
    }
}

impl<'env> Step<BuildContext<'env>> for DumpPrivateKey {
    fn name(&self) -> &'static str {
        "dump_private_key"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = Self::dump(ctx);
            ctx.finish(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::action::ActionWaiter;
    use crate::communicator::Communicator;
    use crate::config::BuildConfig;
    use crate::provider::ApiError;
    use crate::test_support::{FakeCloud, RecordingUi, ScriptedCommunicator};

    fn config() -> BuildConfig {
        let mut config = BuildConfig {
            server_name: String::from("dummy-server"),
            ..BuildConfig::default()
        };
        config
            .ssh_keys_labels
            .insert(String::from("purpose"), String::from("build"));
        config
    }

    #[tokio::test]
    async fn uploads_public_key_with_labels_and_cleans_up() {
        let cloud = FakeCloud::new();
        let communicator = ScriptedCommunicator::new();
        let ui = RecordingUi::new();
        let config = config();
        let mut ctx = BuildContext::new(
            &config,
            &cloud,
            &communicator,
            &ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );
        let mut step = CreateSshKey::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Continue);
        let key_id = ctx.state.ssh_key_id.expect("key id recorded");
        let request = cloud.ssh_key_requests().pop().expect("upload");
        assert!(request.name.starts_with("kiln-"));
        assert_eq!(Some(request.public_key.as_str()), communicator.public_key());
        assert_eq!(request.labels.get("purpose").map(String::as_str), Some("build"));

        step.cleanup(&mut ctx).await;

        assert_eq!(
            cloud.calls_starting_with("delete_ssh_key"),
            vec![format!("delete_ssh_key {key_id}")]
        );
        assert!(cloud.ssh_key_ids().is_empty());
    }

    #[tokio::test]
    async fn missing_public_key_halts_without_calls() {
        let cloud = FakeCloud::new();
        let communicator = ScriptedCommunicator::new().without_keys();
        let ui = RecordingUi::new();
        let config = config();
        let mut ctx = BuildContext::new(
            &config,
            &cloud,
            &communicator,
            &ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );
        let mut step = CreateSshKey::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Halt);
        assert_eq!(ctx.state.error, Some(BuildError::MissingPublicKey));
        assert!(cloud.calls().is_empty());

        step.cleanup(&mut ctx).await;
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn cleanup_failures_are_reported_not_escalated() {
        let cloud = FakeCloud::new();
        let communicator = ScriptedCommunicator::new();
        let ui = RecordingUi::new();
        let config = config();
        let mut ctx = BuildContext::new(
            &config,
            &cloud,
            &communicator,
            &ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );
        let mut step = CreateSshKey::new();
        assert_eq!(step.run(&mut ctx).await, StepAction::Continue);
        cloud.fail(
            "delete_ssh_key",
            ApiError::Transport(String::from("connection reset")),
        );

        step.cleanup(&mut ctx).await;

        assert_eq!(ctx.state.error, None);
        assert_eq!(ctx.state.cleanup_reports.len(), 1);
        assert_eq!(ui.errors().len(), 1);
    }

    #[test]
    fn dump_file_is_named_after_the_server() {
        assert_eq!(
            DumpPrivateKey::file_name("dummy-server"),
            "ssh_key_dummy-server.pem"
        );
    }
}

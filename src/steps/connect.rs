//! Steps delegating to the communicator.

use tracing::debug;

use crate::communicator::{CommunicatorError, ProvisionTarget};
use crate::pipeline::{BuildContext, BuildError, Step, StepAction, StepFuture};

/// Waits until the build server accepts SSH.
#[derive(Clone, Copy, Debug, Default)]
pub struct Connect;

impl Connect {
    async fn connect(ctx: &BuildContext<'_>) -> Result<(), BuildError> {
        let host = ctx.state.require_server_ip()?;
        ctx.ui.say(&format!("Waiting for SSH to become available on {host}..."));
        ctx.communicator
            .connect(host, ctx.waiter.cancel_token())
            .await?;
        ctx.ui.say("Connected to SSH!");
        Ok(())
    }
}

impl<'env> Step<BuildContext<'env>> for Connect {
    fn name(&self) -> &'static str {
        "connect"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = Self::connect(ctx).await;
            ctx.finish(result)
        })
    }
}

/// Runs the configured provisioning commands and keeps their generated data.
#[derive(Clone, Copy, Debug, Default)]
pub struct Provision;

impl Provision {
    async fn provision(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let commands = &ctx.config.provisioners;
        if commands.is_empty() {
            return Ok(());
        }
        let target = ProvisionTarget {
            host: ctx.state.require_server_ip()?,
            instance_id: ctx
                .state
                .instance_id
                .ok_or(BuildError::MissingState("instance_id"))?,
        };
        ctx.ui.say("Provisioning with shell commands...");
        let generated = ctx
            .communicator
            .provision(target, commands, ctx.waiter.cancel_token())
            .await?;
        ctx.state.generated_data.extend(generated);
        Ok(())
    }
}

impl<'env> Step<BuildContext<'env>> for Provision {
    fn name(&self) -> &'static str {
        "provision"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = Self::provision(ctx).await;
            ctx.finish(result)
        })
    }
}

/// Removes the temporary public key from the server's `authorized_keys`
/// files before shutdown. Failures are shown to the user but do not fail the
/// build.
#[derive(Clone, Copy, Debug, Default)]
pub struct CleanupTempKeys;

impl CleanupTempKeys {
    async fn remove_keys(ctx: &BuildContext<'_>) -> Result<(), BuildError> {
        if ctx.config.ssh_private_key_file.is_some() || ctx.communicator.public_key().is_none() {
            debug!("no temporary key in use, leaving authorized_keys untouched");
            return Ok(());
        }
        let host = ctx.state.require_server_ip()?;
        ctx.ui.say("Trying to remove ephemeral keys from authorized_keys files");
        match ctx
            .communicator
            .remove_temporary_key(host, ctx.waiter.cancel_token())
            .await
        {
            Ok(()) => Ok(()),
            Err(CommunicatorError::Cancelled) => Err(CommunicatorError::Cancelled.into()),
            Err(err) => {
                ctx.ui.error(&format!(
                    "Error cleaning up ~/.ssh/authorized_keys; please clean up keys manually: {err}"
                ));
                Ok(())
            }
        }
    }
}

impl<'env> Step<BuildContext<'env>> for CleanupTempKeys {
    fn name(&self) -> &'static str {
        "cleanup_temp_keys"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = Self::remove_keys(ctx).await;
            ctx.finish(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use super::*;
    use crate::action::ActionWaiter;
    use crate::communicator::{CommunicatorError, GeneratedData};
    use crate::config::BuildConfig;
    use crate::test_support::{FakeCloud, RecordingUi, ScriptedCommunicator};
    use rstest::rstest;

    #[tokio::test]
    async fn connect_targets_the_recorded_address() {
        let cloud = FakeCloud::new();
        let communicator = ScriptedCommunicator::new();
        let ui = RecordingUi::new();
        let config = BuildConfig::default();
        let mut ctx = BuildContext::new(
            &config,
            &cloud,
            &communicator,
            &ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );
        ctx.state.server_ip = Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));

        assert_eq!(Connect.run(&mut ctx).await, StepAction::Continue);
        assert_eq!(communicator.calls(), vec!["connect 1.2.3.4"]);
    }

    #[tokio::test]
    async fn connect_without_address_is_a_missing_state_error() {
        let cloud = FakeCloud::new();
        let communicator = ScriptedCommunicator::new();
        let ui = RecordingUi::new();
        let config = BuildConfig::default();
        let mut ctx = BuildContext::new(
            &config,
            &cloud,
            &communicator,
            &ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );

        assert_eq!(Connect.run(&mut ctx).await, StepAction::Halt);
        assert_eq!(ctx.state.error, Some(BuildError::MissingState("server_ip")));
    }

    #[tokio::test]
    async fn provision_merges_generated_data() {
        let cloud = FakeCloud::new();
        let data: GeneratedData = [(String::from("os"), String::from("debian"))].into();
        let communicator = ScriptedCommunicator::new().with_provision(Ok(data));
        let ui = RecordingUi::new();
        let config = BuildConfig {
            provisioners: vec![String::from("apt-get update")],
            ..BuildConfig::default()
        };
        let mut ctx = BuildContext::new(
            &config,
            &cloud,
            &communicator,
            &ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );
        ctx.state.server_ip = Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        ctx.state.instance_id = Some(8);

        assert_eq!(Provision.run(&mut ctx).await, StepAction::Continue);
        assert_eq!(
            ctx.state.generated_data.get("os").map(String::as_str),
            Some("debian")
        );
        assert_eq!(
            communicator.calls(),
            vec!["provision 1.2.3.4 8 [apt-get update]"]
        );
    }

    #[tokio::test]
    async fn provision_failures_halt() {
        let cloud = FakeCloud::new();
        let failure = CommunicatorError::CommandFailed {
            program: String::from("false"),
            status: String::from("1"),
            stderr: String::new(),
        };
        let communicator = ScriptedCommunicator::new().with_provision(Err(failure.clone()));
        let ui = RecordingUi::new();
        let config = BuildConfig {
            provisioners: vec![String::from("false")],
            ..BuildConfig::default()
        };
        let mut ctx = BuildContext::new(
            &config,
            &cloud,
            &communicator,
            &ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );
        ctx.state.server_ip = Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        ctx.state.instance_id = Some(8);

        assert_eq!(Provision.run(&mut ctx).await, StepAction::Halt);
        assert_eq!(ctx.state.error, Some(BuildError::Communicator(failure)));
    }

    async fn run_key_cleanup(
        config: &BuildConfig,
        communicator: &ScriptedCommunicator,
        ui: &RecordingUi,
    ) -> (StepAction, Option<BuildError>) {
        let cloud = FakeCloud::new();
        let mut ctx = BuildContext::new(
            config,
            &cloud,
            communicator,
            ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );
        ctx.state.server_ip = Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        let outcome = CleanupTempKeys.run(&mut ctx).await;
        (outcome, ctx.state.error)
    }

    #[tokio::test]
    async fn temporary_key_is_removed_from_the_server() {
        let communicator = ScriptedCommunicator::new();
        let ui = RecordingUi::new();

        let (outcome, error) =
            run_key_cleanup(&BuildConfig::default(), &communicator, &ui).await;

        assert_eq!(outcome, StepAction::Continue);
        assert_eq!(error, None);
        assert_eq!(communicator.calls(), vec!["remove_temporary_key 1.2.3.4"]);
        assert!(ui.errors().is_empty());
    }

    #[rstest]
    #[case::configured_private_key(Some("~/.ssh/id_ed25519"), true)]
    #[case::no_key_material(None, false)]
    #[tokio::test]
    async fn key_cleanup_is_skipped_without_a_temporary_key(
        #[case] key_file: Option<&str>,
        #[case] has_keys: bool,
    ) {
        let config = BuildConfig {
            ssh_private_key_file: key_file.map(str::to_owned),
            ..BuildConfig::default()
        };
        let scripted = ScriptedCommunicator::new();
        let communicator = if has_keys {
            scripted
        } else {
            scripted.without_keys()
        };
        let ui = RecordingUi::new();

        let (outcome, _) = run_key_cleanup(&config, &communicator, &ui).await;

        assert_eq!(outcome, StepAction::Continue);
        assert!(communicator.calls().is_empty());
        assert!(ui.lines().is_empty());
    }

    #[tokio::test]
    async fn key_cleanup_failures_are_reported_but_do_not_halt() {
        let failure = CommunicatorError::CommandFailed {
            program: String::from("sed"),
            status: String::from("2"),
            stderr: String::from("No such file"),
        };
        let communicator = ScriptedCommunicator::new().with_key_removal(Err(failure));
        let ui = RecordingUi::new();

        let (outcome, error) =
            run_key_cleanup(&BuildConfig::default(), &communicator, &ui).await;

        assert_eq!(outcome, StepAction::Continue);
        assert_eq!(error, None);
        let errors = ui.errors();
        assert_eq!(errors.len(), 1);
        assert!(
            errors
                .first()
                .is_some_and(|line| line.starts_with("Error cleaning up ~/.ssh/authorized_keys")),
            "{errors:?}"
        );
    }

    #[tokio::test]
    async fn cancelled_key_cleanup_halts_as_cancelled() {
        let communicator =
            ScriptedCommunicator::new().with_key_removal(Err(CommunicatorError::Cancelled));
        let ui = RecordingUi::new();

        let (outcome, error) =
            run_key_cleanup(&BuildConfig::default(), &communicator, &ui).await;

        assert_eq!(outcome, StepAction::Halt);
        assert!(error.is_some_and(|err| err.is_cancelled()));
    }
}

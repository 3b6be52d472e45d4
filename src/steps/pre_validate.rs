//! Read-only checks run before anything billable is created.

use crate::pipeline::{BuildContext, BuildError, Step, StepAction, StepFuture};
use crate::provider::{ImageKind, ImageQuery};

/// Resolves server types, checks architecture compatibility and looks for
/// a snapshot already using the target name.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreValidate;

impl PreValidate {
    async fn validate(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let config = ctx.config;
        let api = ctx.api;

        ctx.ui.say(&format!("Validating server types: {}", config.server_type));
        let base = api
            .get_server_type(&config.server_type)
            .await
            .map_err(|err| {
                BuildError::request(
                    format!("Could not fetch server type '{}'", config.server_type),
                    err,
                )
            })?
            .ok_or_else(|| BuildError::ServerTypeNotFound(config.server_type.clone()))?;
        let architecture = base.architecture;
        ctx.state.server_type = Some(base);

        if let Some(upgrade_name) = &config.upgrade_server_type {
            ctx.ui
                .say(&format!("Validating upgrade server types: {upgrade_name}"));
            let upgrade = api
                .get_server_type(upgrade_name)
                .await
                .map_err(|err| {
                    BuildError::request(
                        format!("Could not fetch upgrade server type '{upgrade_name}'"),
                        err,
                    )
                })?
                .ok_or_else(|| BuildError::UpgradeServerTypeNotFound(upgrade_name.clone()))?;
            if upgrade.architecture != architecture {
                return Err(BuildError::IncompatibleArchitectures {
                    base: architecture,
                    upgrade: upgrade.architecture,
                });
            }
        }

        if config.skip_create_snapshot {
            return Ok(());
        }

        ctx.ui.say(&format!("Validating snapshot name: {}", config.snapshot_name));
        // Snapshots carry their name in the description, which cannot be
        // queried, so every snapshot of the architecture is scanned.
        let query = ImageQuery {
            kind: Some(ImageKind::Snapshot),
            architecture: Some(architecture),
            ..ImageQuery::default()
        };
        let snapshots = api
            .list_images(&query)
            .await
            .map_err(|err| BuildError::request("Could not fetch snapshots", err))?;

        let Some(existing) = snapshots
            .iter()
            .find(|snapshot| snapshot.description == config.snapshot_name)
        else {
            return Ok(());
        };

        let in_use = BuildError::SnapshotNameInUse {
            id: existing.id,
            architecture,
            name: config.snapshot_name.clone(),
        };
        if !config.force {
            return Err(in_use);
        }
        ctx.ui.say(&format!(
            "{in_use}. Force flag specified, will safely overwrite this snapshot"
        ));
        ctx.state.old_snapshot_id = Some(existing.id);
        Ok(())
    }
}

impl<'env> Step<BuildContext<'env>> for PreValidate {
    fn name(&self) -> &'static str {
        "pre_validate"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = Self::validate(ctx).await;
            ctx.finish(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::action::ActionWaiter;
    use crate::config::BuildConfig;
    use crate::pipeline::BuildState;
    use crate::provider::Architecture;
    use crate::test_support::{
        FakeCloud, RecordingUi, ScriptedCommunicator, server_type, snapshot, timestamp,
    };
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> BuildConfig {
        BuildConfig {
            server_name: String::from("dummy-server"),
            location: String::from("nbg1"),
            server_type: String::from("cpx11"),
            image: Some(String::from("debian-12")),
            snapshot_name: String::from("dummy-snapshot"),
            ..BuildConfig::default()
        }
    }

    fn cloud() -> FakeCloud {
        FakeCloud::new()
            .with_server_type(server_type(1, "cpx11", Architecture::X86))
            .with_server_type(server_type(2, "cpx21", Architecture::X86))
            .with_server_type(server_type(3, "cax11", Architecture::Arm))
    }

    async fn run(cloud: &FakeCloud, config: &BuildConfig) -> (StepAction, BuildState) {
        let communicator = ScriptedCommunicator::new();
        let ui = RecordingUi::new();
        let mut ctx = BuildContext::new(
            config,
            cloud,
            &communicator,
            &ui,
            ActionWaiter::uncancellable(Duration::from_millis(1)),
        );
        let outcome = PreValidate.run(&mut ctx).await;
        (outcome, ctx.state)
    }

    #[rstest]
    #[tokio::test]
    async fn unused_name_continues(config: BuildConfig) {
        let cloud = cloud().with_image(snapshot(9, "other", Architecture::X86, timestamp(0)));

        let (outcome, state) = run(&cloud, &config).await;

        assert_eq!(outcome, StepAction::Continue);
        assert_eq!(state.old_snapshot_id, None);
        assert_eq!(state.server_type.map(|found| found.id), Some(1));
        assert_eq!(
            cloud.calls(),
            vec!["get_server_type cpx11", "list_images snapshot x86 -"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn existing_name_halts_without_force(config: BuildConfig) {
        let cloud = cloud().with_image(snapshot(
            1,
            "dummy-snapshot",
            Architecture::X86,
            timestamp(0),
        ));

        let (outcome, state) = run(&cloud, &config).await;

        assert_eq!(outcome, StepAction::Halt);
        assert_eq!(
            state.error.map(|err| err.to_string()),
            Some(String::from(
                "Found existing snapshot (id=1, arch=x86) with name 'dummy-snapshot'"
            ))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn existing_name_with_force_records_old_snapshot(config: BuildConfig) {
        let cloud = cloud().with_image(snapshot(
            1,
            "dummy-snapshot",
            Architecture::X86,
            timestamp(0),
        ));
        let forced = BuildConfig {
            force: true,
            ..config
        };

        let (outcome, state) = run(&cloud, &forced).await;

        assert_eq!(outcome, StepAction::Continue);
        assert_eq!(state.old_snapshot_id, Some(1));
        assert_eq!(state.error, None);
    }

    #[rstest]
    #[tokio::test]
    async fn snapshots_of_other_architectures_are_ignored(config: BuildConfig) {
        let cloud = cloud().with_image(snapshot(
            1,
            "dummy-snapshot",
            Architecture::Arm,
            timestamp(0),
        ));

        let (outcome, _) = run(&cloud, &config).await;

        assert_eq!(outcome, StepAction::Continue);
    }

    #[rstest]
    #[tokio::test]
    async fn mismatched_upgrade_architecture_halts_before_listing(config: BuildConfig) {
        let cloud = cloud();
        let upgrade = BuildConfig {
            upgrade_server_type: Some(String::from("cax11")),
            ..config
        };

        let (outcome, state) = run(&cloud, &upgrade).await;

        assert_eq!(outcome, StepAction::Halt);
        assert_eq!(
            state.error,
            Some(BuildError::IncompatibleArchitectures {
                base: Architecture::X86,
                upgrade: Architecture::Arm,
            })
        );
        assert_eq!(
            cloud.calls(),
            vec!["get_server_type cpx11", "get_server_type cax11"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_server_type_halts(config: BuildConfig) {
        let cloud = FakeCloud::new();

        let (outcome, state) = run(&cloud, &config).await;

        assert_eq!(outcome, StepAction::Halt);
        assert_eq!(
            state.error,
            Some(BuildError::ServerTypeNotFound(String::from("cpx11")))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn skip_snapshot_does_not_list_images(config: BuildConfig) {
        let cloud = cloud();
        let skipping = BuildConfig {
            skip_create_snapshot: true,
            ..config
        };

        let (outcome, _) = run(&cloud, &skipping).await;

        assert_eq!(outcome, StepAction::Continue);
        assert!(cloud.calls_starting_with("list_images").is_empty());
    }
}

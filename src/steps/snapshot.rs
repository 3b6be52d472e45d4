//! Snapshot creation with overwrite-by-replace.

use crate::pipeline::{BuildContext, BuildError, Step, StepAction, StepFuture};
use crate::provider::SnapshotCreate;

const CONTEXT: &str = "Could not create snapshot";

/// Snapshots the server disk. When validation found a snapshot with the same
/// name and force was set, that snapshot is deleted only after the new one
/// finished.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateSnapshot;

impl CreateSnapshot {
    async fn snapshot(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let config = ctx.config;
        if config.skip_create_snapshot {
            ctx.ui.say("Skipping snapshot creation...");
            return Ok(());
        }
        let server_id = ctx.state.require_server_id()?;

        ctx.ui.say("Creating snapshot...");
        ctx.ui.say("This can take some time");
        let request = SnapshotCreate {
            description: config.snapshot_name.clone(),
            labels: config.snapshot_labels.clone(),
        };
        let created = ctx
            .api
            .create_snapshot(server_id, &request)
            .await
            .map_err(|err| BuildError::request(CONTEXT, err))?;
        ctx.waiter
            .wait(ctx.api, &created.action)
            .await
            .map_err(|err| BuildError::action(CONTEXT, err))?;
        ctx.state.snapshot_id = Some(created.image.id);
        ctx.state.snapshot_name = Some(config.snapshot_name.clone());

        let Some(old_id) = ctx.state.old_snapshot_id else {
            return Ok(());
        };
        ctx.ui.say(&format!("Deleting old snapshot with ID: {old_id}"));
        ctx.api
            .delete_image(old_id)
            .await
            .map_err(|source| BuildError::OldSnapshotDelete { id: old_id, source })
    }
}

impl<'env> Step<BuildContext<'env>> for CreateSnapshot {
    fn name(&self) -> &'static str {
        "create_snapshot"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = Self::snapshot(ctx).await;
            ctx.finish(result)
        })
    }
}

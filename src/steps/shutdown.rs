//! Graceful shutdown before snapshotting.

use crate::pipeline::{BuildContext, BuildError, Step, StepAction, StepFuture};

const CONTEXT: &str = "Could not shut down server";

/// Shuts the server down and waits for the action to finish.
#[derive(Clone, Copy, Debug, Default)]
pub struct Shutdown;

impl Shutdown {
    async fn shutdown(ctx: &BuildContext<'_>) -> Result<(), BuildError> {
        let server_id = ctx.state.require_server_id()?;
        ctx.ui.say("Shutting down server...");
        let action = ctx
            .api
            .shutdown(server_id)
            .await
            .map_err(|err| BuildError::request(CONTEXT, err))?;
        ctx.waiter
            .wait(ctx.api, &action)
            .await
            .map_err(|err| BuildError::action(CONTEXT, err))
    }
}

impl<'env> Step<BuildContext<'env>> for Shutdown {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = Self::shutdown(ctx).await;
            ctx.finish(result)
        })
    }
}

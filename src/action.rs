//! Polling of provider actions until they finish.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::provider::{Action, ActionStatus, ApiError, CloudApi};

/// Default interval between two polls of the same action.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors raised while waiting for actions.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// The action finished with status `error`.
    #[error("action {id} ({command}) failed: {message} ({code})")]
    ActionFailed {
        /// Action identifier.
        id: i64,
        /// Action command such as `create_server`.
        command: String,
        /// Provider error code.
        code: String,
        /// Provider error message.
        message: String,
    },
    /// The build was cancelled while waiting.
    #[error("cancelled while waiting for action {id}")]
    Cancelled {
        /// Action that was still pending.
        id: i64,
    },
    /// Polling the action failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Polls actions at a fixed interval, giving up when cancellation fires.
#[derive(Clone, Debug)]
pub struct ActionWaiter {
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ActionWaiter {
    /// Creates a waiter bound to the build's cancellation token.
    #[must_use]
    pub const fn new(poll_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            poll_interval,
            cancel,
        }
    }

    /// Creates a waiter whose token never fires.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn uncancellable(poll_interval: Duration) -> Self {
        Self::new(poll_interval, CancellationToken::new())
    }

    /// Returns the cancellation token this waiter observes.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Waits for every action in order.
    ///
    /// # Errors
    ///
    /// Returns the first failure, cancellation or polling error encountered.
    pub async fn wait_all(&self, api: &dyn CloudApi, actions: &[Action]) -> Result<(), WaitError> {
        for action in actions {
            self.wait(api, action).await?;
        }
        Ok(())
    }

    /// Waits until `action` reaches a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::ActionFailed`] when the action ends with status
    /// `error`, [`WaitError::Cancelled`] when the token fires first, and
    /// [`WaitError::Api`] when polling fails. Both the pause and the poll
    /// request are abandoned on cancellation.
    pub async fn wait(&self, api: &dyn CloudApi, action: &Action) -> Result<(), WaitError> {
        let mut current = action.clone();
        loop {
            match current.status {
                ActionStatus::Success => return Ok(()),
                ActionStatus::Error => return Err(Self::failure(&current)),
                ActionStatus::Running => {}
            }

            let id = current.id;
            let polled = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(WaitError::Cancelled { id }),
                fetched = self.poll(api, &current) => fetched?,
            };
            current = polled;
        }
    }

    async fn poll(&self, api: &dyn CloudApi, action: &Action) -> Result<Action, ApiError> {
        sleep(self.poll_interval).await;
        debug!(action = action.id, command = %action.command, "polling action");
        api.get_action(action.id).await
    }

    fn failure(action: &Action) -> WaitError {
        let (code, message) = action.error.as_ref().map_or_else(
            || (String::from("unknown"), String::from("no error details")),
            |err| (err.code.clone(), err.message.clone()),
        );
        WaitError::ActionFailed {
            id: action.id,
            command: action.command.clone(),
            code,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ActionError;
    use crate::test_support::{FakeCloud, action};

    fn waiter() -> ActionWaiter {
        ActionWaiter::uncancellable(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn finished_actions_return_without_polling() {
        let cloud = FakeCloud::new();
        let done = action(1, "create_server", ActionStatus::Success);

        waiter().wait(&cloud, &done).await.expect("success");

        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn running_actions_are_polled_until_success() {
        let cloud = FakeCloud::new();
        cloud.script_action_progress(3, &[ActionStatus::Running, ActionStatus::Success]);

        waiter()
            .wait(&cloud, &action(3, "shutdown_server", ActionStatus::Running))
            .await
            .expect("success");

        assert_eq!(cloud.calls(), vec!["get_action 3", "get_action 3"]);
    }

    #[tokio::test]
    async fn failed_actions_carry_provider_details() {
        let cloud = FakeCloud::new();
        let mut failed = action(4, "create_image", ActionStatus::Error);
        failed.error = Some(ActionError {
            code: String::from("image_failed"),
            message: String::from("disk busy"),
        });

        let err = waiter().wait(&cloud, &failed).await.expect_err("failure");

        assert_eq!(
            err,
            WaitError::ActionFailed {
                id: 4,
                command: String::from("create_image"),
                code: String::from("image_failed"),
                message: String::from("disk busy"),
            }
        );
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_poll_sleep() {
        let cloud = FakeCloud::new();
        let token = CancellationToken::new();
        let slow = ActionWaiter::new(Duration::from_secs(3600), token.clone());
        let pending = action(5, "create_server", ActionStatus::Running);

        let canceller = tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = slow.wait(&cloud, &pending).await.expect_err("cancelled");
        canceller.await.expect("canceller task");

        assert_eq!(err, WaitError::Cancelled { id: 5 });
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn cancellation_abandons_a_hanging_poll() {
        let cloud = FakeCloud::new();
        cloud.stall_action_polls();
        let token = CancellationToken::new();
        let waiter = ActionWaiter::new(Duration::from_millis(1), token.clone());
        let pending = action(6, "create_image", ActionStatus::Running);

        let canceller = tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let err = waiter.wait(&cloud, &pending).await.expect_err("cancelled");
        canceller.await.expect("canceller task");

        assert_eq!(err, WaitError::Cancelled { id: 6 });
        assert_eq!(cloud.calls(), vec!["get_action 6"]);
    }
}

//! Creates the build server and prepares it for provisioning.

use tracing::info;

use crate::pipeline::{BuildContext, BuildError, Step, StepAction, StepFuture};
use crate::provider::{Image, PrimaryIpKind, PublicNetRequest, Server, ServerCreate};
use crate::user_data::resolve_user_data;

use super::resolve;

/// Creates the server, waits for it to settle and applies the optional type
/// upgrade and rescue boot. Cleanup deletes the server.
#[derive(Debug, Default)]
pub struct CreateServer {
    server_id: Option<i64>,
}

impl CreateServer {
    /// Creates the step.
    #[must_use]
    pub const fn new() -> Self {
        Self { server_id: None }
    }

    async fn create(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let config = ctx.config;
        let api = ctx.api;
        ctx.ui.say("Creating server...");

        let architecture = ctx.state.require_server_type()?.architecture;
        let user_data = resolve_user_data(
            config.user_data.as_deref(),
            config.user_data_file.as_deref(),
        )?;

        let mut ssh_keys = vec![ctx.state.require_ssh_key_id()?];
        ssh_keys.extend(resolve::ssh_keys(api, &config.ssh_keys).await?);
        let firewalls = resolve::firewalls(api, &config.firewalls).await?;

        let image = match (&config.image_filter, &config.image) {
            (Some(filter), _) => resolve::image_by_selector(api, filter, architecture).await?,
            (None, Some(id_or_name)) => {
                resolve::image_by_name(api, id_or_name, architecture).await?
            }
            (None, None) => return Err(BuildError::MissingState("image")),
        };
        ctx.ui.say(&format!("Using image '{}'", image.id));
        warn_if_deprecated(ctx, &image);

        let mut public_net = PublicNetRequest {
            enable_ipv4: !config.public_ipv4_disabled,
            enable_ipv6: !config.public_ipv6_disabled,
            ipv4: None,
            ipv6: None,
        };
        if let Some(reference) = config.public_ipv4.as_deref().filter(|_| public_net.enable_ipv4) {
            let reserved = resolve::primary_ip(api, reference, PrimaryIpKind::Ipv4).await?;
            public_net.ipv4 = Some(reserved.id);
        }
        if let Some(reference) = config.public_ipv6.as_deref().filter(|_| public_net.enable_ipv6) {
            let reserved = resolve::primary_ip(api, reference, PrimaryIpKind::Ipv6).await?;
            public_net.ipv6 = Some(reserved.id);
        }

        let request = ServerCreate {
            name: config.server_name.clone(),
            server_type: config.server_type.clone(),
            image: image.id,
            location: config.location.clone(),
            ssh_keys: ssh_keys.clone(),
            firewalls,
            networks: config.networks.clone(),
            user_data,
            labels: config.server_labels.clone(),
            public_net,
            start_after_create: config.upgrade_server_type.is_none(),
        };
        ctx.state.source_image = Some(image);

        let created = api
            .create_server(&request)
            .await
            .map_err(|err| BuildError::request("Could not create server", err))?;
        self.server_id = Some(created.server.id);

        ctx.waiter
            .wait(api, &created.action)
            .await
            .map_err(|err| BuildError::action("Could not create server", err))?;
        ctx.waiter
            .wait_all(api, &created.next_actions)
            .await
            .map_err(|err| BuildError::action("Could not create server", err))?;

        let server = created.server;
        info!(server = server.id, "server created");
        ctx.state.server_id = Some(server.id);
        ctx.state.instance_id = Some(server.id);
        ctx.state.server_ip = Some(server.first_available_ip().ok_or(BuildError::NoAvailableIp)?);

        Self::settle(ctx, server.id).await?;

        if let Some(upgrade) = &config.upgrade_server_type {
            Self::upgrade(ctx, server.id, upgrade).await?;
        }
        if let Some(rescue) = &config.rescue {
            Self::boot_rescue(ctx, &server, rescue, &ssh_keys).await?;
        }
        Ok(())
    }

    async fn settle(ctx: &BuildContext<'_>, server_id: i64) -> Result<(), BuildError> {
        let running = ctx
            .api
            .list_running_server_actions(server_id)
            .await
            .map_err(|err| BuildError::request("Could not fetch server running actions", err))?;
        ctx.waiter
            .wait_all(ctx.api, &running)
            .await
            .map_err(|err| BuildError::action("Could not wait for server running actions", err))
    }

    async fn upgrade(
        ctx: &BuildContext<'_>,
        server_id: i64,
        server_type: &str,
    ) -> Result<(), BuildError> {
        ctx.ui.say("Upgrading server type...");
        let changed = ctx
            .api
            .change_server_type(server_id, server_type)
            .await
            .map_err(|err| BuildError::request("Could not upgrade server type", err))?;
        ctx.waiter
            .wait(ctx.api, &changed)
            .await
            .map_err(|err| BuildError::action("Could not upgrade server type", err))?;

        ctx.ui.say("Starting server...");
        let started = ctx
            .api
            .power_on(server_id)
            .await
            .map_err(|err| BuildError::request("Could not start server", err))?;
        ctx.waiter
            .wait(ctx.api, &started)
            .await
            .map_err(|err| BuildError::action("Could not start server", err))
    }

    async fn boot_rescue(
        ctx: &BuildContext<'_>,
        server: &Server,
        rescue: &str,
        ssh_keys: &[i64],
    ) -> Result<(), BuildError> {
        ctx.ui.say("Enabling Rescue Mode...");
        if server.rescue_enabled {
            let disabled = ctx
                .api
                .disable_rescue(server.id)
                .await
                .map_err(|err| BuildError::request("Could not enable rescue mode", err))?;
            ctx.waiter
                .wait(ctx.api, &disabled)
                .await
                .map_err(|err| BuildError::action("Could not enable rescue mode", err))?;
        }
        let enabled = ctx
            .api
            .enable_rescue(server.id, rescue, ssh_keys)
            .await
            .map_err(|err| BuildError::request("Could not enable rescue mode", err))?;
        ctx.waiter
            .wait(ctx.api, &enabled)
            .await
            .map_err(|err| BuildError::action("Could not enable rescue mode", err))?;

        ctx.ui.say("Rebooting server...");
        let reset = ctx
            .api
            .reset(server.id)
            .await
            .map_err(|err| BuildError::request("Could not reboot server", err))?;
        ctx.waiter
            .wait(ctx.api, &reset)
            .await
            .map_err(|err| BuildError::action("Could not reboot server", err))
    }
}

fn warn_if_deprecated(ctx: &BuildContext<'_>, image: &Image) {
    if let Some(deprecated) = image.deprecated {
        ctx.ui.error(&format!(
            "WARNING: image '{}' is deprecated since {} and will be removed",
            image.name.as_deref().unwrap_or(&image.description),
            deprecated.to_rfc3339()
        ));
    }
}

impl<'env> Step<BuildContext<'env>> for CreateServer {
    fn name(&self) -> &'static str {
        "create_server"
    }

    fn run<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let result = self.create(ctx).await;
            ctx.finish(result)
        })
    }

    fn cleanup<'a>(&'a mut self, ctx: &'a mut BuildContext<'env>) -> StepFuture<'a, ()> {
        Box::pin(async move {
            let Some(server_id) = self.server_id.take() else {
                return;
            };
            ctx.ui.say("Destroying server...");
            if let Err(err) = ctx.api.delete_server(server_id).await {
                ctx.report_cleanup(
                    "create_server",
                    format!(
                        "Could not destroy server {server_id} (please destroy it manually): {err}"
                    ),
                );
            }
        })
    }
}

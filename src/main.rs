//! Binary entry point for the kiln CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kiln::{
    ApiError, Artifact, BuildConfig, BuildError, Builder, CloudApi, CommunicatorError,
    ConfigError, HcloudClient, ProviderConfig, SshCommunicator, SshConfig, StderrUi, Ui,
};

use cli::{BuildCommand, Cli, DestroyCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("provider error: {0}")]
    Provider(#[from] ApiError),
    #[error("ssh setup failed: {0}")]
    Communicator(#[from] CommunicatorError),
    #[error("Build failed: {0}")]
    Build(#[from] BuildError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Build(command) => build(command).await,
        Cli::Destroy(command) => destroy(command).await,
    }
}

fn load_template(args: &BuildCommand) -> Result<BuildConfig, ConfigError> {
    let mut config = BuildConfig::load(Utf8Path::new(&args.template))?;
    config.force |= args.force;
    config.debug |= args.debug;
    Ok(config)
}

fn provider() -> Result<(ProviderConfig, Arc<dyn CloudApi>), CliError> {
    let config = ProviderConfig::load_without_cli_args()?;
    config.validate()?;
    let client = HcloudClient::from_config(&config)?;
    Ok((config, Arc::new(client)))
}

async fn build(args: BuildCommand) -> Result<(), CliError> {
    let template = load_template(&args)?;
    let (provider_config, api) = provider()?;
    let ssh_config = SshConfig::load_without_cli_args()?;
    ssh_config.validate()?;
    let communicator = SshCommunicator::with_process_runner(
        ssh_config,
        template.ssh_private_key_file.as_deref(),
    )
    .await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            on_interrupt.cancel();
        }
    });

    let ui = StderrUi;
    let builder = Builder::new(template, api, provider_config.poll_interval());
    match builder.run(&communicator, &ui, cancel).await? {
        Some(artifact) => ui.say(&artifact.to_string()),
        None => ui.say("Build finished without creating a snapshot"),
    }
    Ok(())
}

async fn destroy(args: DestroyCommand) -> Result<(), CliError> {
    let (_, api) = provider()?;
    let ui = StderrUi;
    let Some(image) = api.get_image(args.snapshot_id).await? else {
        ui.say(&format!("Snapshot {} is already gone", args.snapshot_id));
        return Ok(());
    };
    let artifact = Artifact::new(
        image.description,
        image.id,
        String::new(),
        0,
        String::new(),
        kiln::GeneratedData::new(),
        api,
    );
    ui.say(&format!("Destroying snapshot {}...", artifact.id()));
    artifact.destroy().await?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

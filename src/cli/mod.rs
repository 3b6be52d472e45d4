//! Command-line interface definitions for the `kiln` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `kiln` binary.
#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    about = "Bake Hetzner Cloud snapshots from a build template",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run a build template and create a snapshot.
    #[command(name = "build", about = "Run a build template and create a snapshot")]
    Build(BuildCommand),
    /// Delete a snapshot created by an earlier build.
    #[command(name = "destroy", about = "Delete a snapshot created by an earlier build")]
    Destroy(DestroyCommand),
}

/// Arguments for the `kiln build` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BuildCommand {
    /// Path to the JSON build template.
    #[arg(long, short = 't', value_name = "PATH")]
    pub(crate) template: String,
    /// Replace an existing snapshot with the same name once the new one exists.
    #[arg(long)]
    pub(crate) force: bool,
    /// Keep a copy of the temporary private key in the working directory.
    #[arg(long)]
    pub(crate) debug: bool,
}

/// Arguments for the `kiln destroy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Identifier of the snapshot image to delete.
    #[arg(long, value_name = "ID")]
    pub(crate) snapshot_id: i64,
}

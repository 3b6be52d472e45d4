//! SSH communicator backed by the system `ssh` and `ssh-keygen` binaries.
//!
//! The communicator owns the temporary key pair uploaded by the build, waits
//! for the server to accept SSH, runs provisioning commands remotely and
//! removes its public key from the server before the snapshot is taken.
//! Commands are executed through a [`CommandRunner`] so tests can script the
//! process results; every remote command is abandoned once the build's
//! cancellation token fires.

mod config;
mod runner;

use std::ffi::OsString;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::communicator::{
    Communicator, CommunicatorError, CommunicatorFuture, GeneratedData, ProvisionTarget,
};
use crate::paths::{expand_tilde, read_to_string_ambient};

pub use config::SshConfig;
pub use runner::{CommandFuture, CommandOutput, CommandRunner, ProcessCommandRunner};

/// Prefix of stdout lines that provisioning commands use to publish data.
pub const GENERATED_DATA_PREFIX: &str = "kiln-generated:";

const KEY_FILE_NAME: &str = "id_ed25519";

/// Key pair used to reach the build server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// OpenSSH public key line.
    pub public: String,
    /// OpenSSH private key.
    pub private: String,
    /// Private key file handed to `ssh -i`.
    pub identity_file: Utf8PathBuf,
}

/// Communicator driving the build server over SSH.
#[derive(Debug)]
pub struct SshCommunicator<R: CommandRunner> {
    config: SshConfig,
    runner: R,
    keys: KeyPair,
    scratch_dir: Option<Utf8PathBuf>,
}

impl SshCommunicator<ProcessCommandRunner> {
    /// Prepares a communicator that shells out to the host binaries.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicatorError`] when key material cannot be prepared.
    pub async fn with_process_runner(
        config: SshConfig,
        private_key_file: Option<&str>,
    ) -> Result<Self, CommunicatorError> {
        Self::prepare(config, ProcessCommandRunner, private_key_file).await
    }
}

impl<R: CommandRunner> SshCommunicator<R> {
    /// Prepares key material: the configured private key when given,
    /// otherwise a fresh ed25519 key pair in a scratch directory.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicatorError`] when `ssh-keygen` fails or the key files
    /// cannot be read.
    pub async fn prepare(
        config: SshConfig,
        runner: R,
        private_key_file: Option<&str>,
    ) -> Result<Self, CommunicatorError> {
        match private_key_file {
            Some(path) => {
                let keys = load_key_pair(&config, &runner, &expand_tilde(path)).await?;
                Ok(Self::with_keys(config, runner, keys))
            }
            None => {
                let scratch = create_scratch_dir()?;
                let keys = match generate_key_pair(&config, &runner, &scratch).await {
                    Ok(keys) => keys,
                    Err(err) => {
                        remove_scratch_dir(&scratch);
                        return Err(err);
                    }
                };
                let mut communicator = Self::with_keys(config, runner, keys);
                communicator.scratch_dir = Some(scratch);
                Ok(communicator)
            }
        }
    }

    /// Wraps an existing key pair.
    #[must_use]
    pub const fn with_keys(config: SshConfig, runner: R, keys: KeyPair) -> Self {
        Self {
            config,
            runner,
            keys,
            scratch_dir: None,
        }
    }

    /// Returns the communicator settings.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    async fn wait_for_ssh(
        &self,
        host: IpAddr,
        cancel: &CancellationToken,
    ) -> Result<(), CommunicatorError> {
        let deadline = Instant::now() + self.config.connect_timeout();
        loop {
            let output = self.run_remote(host, "true", cancel).await?;
            if output.is_success() {
                return Ok(());
            }
            debug!(%host, status = %output.status_text(), "ssh not ready yet");
            if Instant::now() >= deadline {
                return Err(CommunicatorError::Timeout { host });
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(CommunicatorError::Cancelled),
                () = sleep(self.config.retry_interval()) => {}
            }
        }
    }

    async fn run_commands(
        &self,
        target: ProvisionTarget,
        commands: &[String],
        cancel: &CancellationToken,
    ) -> Result<GeneratedData, CommunicatorError> {
        let mut generated = GeneratedData::new();
        for command in commands {
            let remote = format!(
                "INSTANCE_ID={} sh -c {}",
                target.instance_id,
                escape(command.as_str().into())
            );
            let output = self.run_remote(target.host, &remote, cancel).await?;
            if !output.is_success() {
                return Err(CommunicatorError::CommandFailed {
                    program: command.clone(),
                    status: output.status_text(),
                    stderr: output.stderr,
                });
            }
            generated.extend(parse_generated_data(&output.stdout));
        }
        Ok(generated)
    }

    async fn remove_key_lines(
        &self,
        host: IpAddr,
        cancel: &CancellationToken,
    ) -> Result<(), CommunicatorError> {
        let material = self
            .keys
            .public
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| CommunicatorError::Key(String::from("public key has no key data")))?;
        for command in authorized_keys_cleanup(material, &self.config.user) {
            let output = self.run_remote(host, &command, cancel).await?;
            if !output.is_success() {
                return Err(CommunicatorError::CommandFailed {
                    program: command,
                    status: output.status_text(),
                    stderr: output.stderr,
                });
            }
        }
        Ok(())
    }

    /// Runs one remote command, abandoning it when `cancel` fires.
    async fn run_remote(
        &self,
        host: IpAddr,
        remote_command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommunicatorError> {
        let args = self.ssh_args(host, remote_command);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CommunicatorError::Cancelled),
            output = self.runner.run(&self.config.ssh_bin, &args) => output,
        }
    }

    fn ssh_args(&self, host: IpAddr, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.config.port.to_string()),
            OsString::from("-i"),
            OsString::from(self.keys.identity_file.as_str()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("ConnectTimeout=10"),
        ];
        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }
        args.push(OsString::from(format!("{}@{host}", self.config.user)));
        args.push(OsString::from(remote_command));
        args
    }
}

impl<R: CommandRunner> Communicator for SshCommunicator<R> {
    fn public_key(&self) -> Option<&str> {
        Some(self.keys.public.as_str()).filter(|key| !key.trim().is_empty())
    }

    fn private_key(&self) -> Option<&str> {
        Some(self.keys.private.as_str()).filter(|key| !key.trim().is_empty())
    }

    fn connect<'a>(
        &'a self,
        host: IpAddr,
        cancel: &'a CancellationToken,
    ) -> CommunicatorFuture<'a, ()> {
        Box::pin(self.wait_for_ssh(host, cancel))
    }

    fn provision<'a>(
        &'a self,
        target: ProvisionTarget,
        commands: &'a [String],
        cancel: &'a CancellationToken,
    ) -> CommunicatorFuture<'a, GeneratedData> {
        Box::pin(self.run_commands(target, commands, cancel))
    }

    fn remove_temporary_key<'a>(
        &'a self,
        host: IpAddr,
        cancel: &'a CancellationToken,
    ) -> CommunicatorFuture<'a, ()> {
        Box::pin(self.remove_key_lines(host, cancel))
    }
}

impl<R: CommandRunner> Drop for SshCommunicator<R> {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch_dir.take() {
            remove_scratch_dir(&scratch);
        }
    }
}

/// Extracts `key=value` pairs from lines starting with
/// [`GENERATED_DATA_PREFIX`].
#[must_use]
pub fn parse_generated_data(stdout: &str) -> GeneratedData {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(GENERATED_DATA_PREFIX))
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Remote commands deleting every `authorized_keys` line that carries
/// `key_material`. Non-root users also clean root's file through `sudo`.
#[must_use]
pub fn authorized_keys_cleanup(key_material: &str, user: &str) -> Vec<String> {
    let sed_script = format!("\\|{key_material}|d");
    let pattern = escape(sed_script.as_str().into());
    let mut commands = vec![format!(
        "sed -i.bak {pattern} ~/.ssh/authorized_keys && rm -f ~/.ssh/authorized_keys.bak"
    )];
    if user != "root" {
        commands.push(format!(
            "sudo sed -i.bak {pattern} /root/.ssh/authorized_keys && \
             sudo rm -f /root/.ssh/authorized_keys.bak"
        ));
    }
    commands
}

fn create_scratch_dir() -> Result<Utf8PathBuf, CommunicatorError> {
    let temp = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .map_err(|path| CommunicatorError::Key(format!("non UTF-8 temp dir: {}", path.display())))?;
    let name = format!("kiln-{}", Uuid::new_v4());
    let dir = Dir::open_ambient_dir(&temp, ambient_authority())
        .map_err(|err| CommunicatorError::Key(err.to_string()))?;
    dir.create_dir(&name)
        .map_err(|err| CommunicatorError::Key(err.to_string()))?;
    Ok(temp.join(name))
}

fn remove_scratch_dir(scratch: &Utf8Path) {
    let (Some(parent), Some(name)) = (scratch.parent(), scratch.file_name()) else {
        return;
    };
    if let Ok(dir) = Dir::open_ambient_dir(parent, ambient_authority()) {
        dir.remove_dir_all(name).ok();
    }
}

async fn generate_key_pair(
    config: &SshConfig,
    runner: &impl CommandRunner,
    scratch: &Utf8Path,
) -> Result<KeyPair, CommunicatorError> {
    let identity_file = scratch.join(KEY_FILE_NAME);
    let args = ["-q", "-t", "ed25519", "-N", "", "-C", "kiln", "-f"]
        .into_iter()
        .map(OsString::from)
        .chain(std::iter::once(OsString::from(identity_file.as_str())))
        .collect::<Vec<_>>();
    let output = runner.run(&config.keygen_bin, &args).await?;
    if !output.is_success() {
        return Err(CommunicatorError::CommandFailed {
            program: config.keygen_bin.clone(),
            status: output.status_text(),
            stderr: output.stderr,
        });
    }
    let private = read_to_string_ambient(identity_file.as_str()).map_err(CommunicatorError::Key)?;
    let public = read_to_string_ambient(&format!("{identity_file}.pub"))
        .map_err(CommunicatorError::Key)?;
    Ok(KeyPair {
        public: public.trim().to_owned(),
        private,
        identity_file,
    })
}

async fn load_key_pair(
    config: &SshConfig,
    runner: &impl CommandRunner,
    path: &str,
) -> Result<KeyPair, CommunicatorError> {
    let private = read_to_string_ambient(path)
        .map_err(|message| CommunicatorError::Key(format!("{path}: {message}")))?;
    let args = [OsString::from("-y"), OsString::from("-f"), OsString::from(path)];
    let output = runner.run(&config.keygen_bin, &args).await?;
    if !output.is_success() {
        return Err(CommunicatorError::CommandFailed {
            program: config.keygen_bin.clone(),
            status: output.status_text(),
            stderr: output.stderr,
        });
    }
    Ok(KeyPair {
        public: output.stdout.trim().to_owned(),
        private,
        identity_file: Utf8PathBuf::from(path),
    })
}

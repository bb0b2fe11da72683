//! # Provisioning Pipeline
//!
//! Commands run against a machine in five stages. Which stages take part
//! depends on what this run did to the machine, but their relative order is
//! fixed:
//!
//! ```text
//!   commands_pre ─▶ creation ─▶ startup ─▶ creation_post ─▶ commands
//!      always       if created  if started   if created      always
//! ```
//!
//! The first failing command aborts the pipeline.
//!
//! ## Remote Commands
//!
//! Unless `local` is set, a command runs inside the machine through the
//! transient-unit runner, waiting for it and propagating its exit status:
//!
//! ```text
//!   systemd-run -M <fqdn> -P [wrapper_parameters…] -- <command…> [fqdn] [addrs…]
//! ```

use crate::constants::{DEFAULT_REDIRECT_MODE, REMOTE_WRAPPER, REMOTE_WRAPPER_PIPE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::process::Stdio;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{Span, debug, info};

// =============================================================================
// CommandSpec
// =============================================================================

/// One provisioning command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    /// Program and arguments.
    pub command: Vec<String>,

    /// Extra arguments for the remote wrapper, before `--`.
    #[serde(alias = "wrapperparameters")]
    pub wrapper_parameters: Vec<String>,

    /// Append the machine's fully-qualified name.
    #[serde(alias = "appendfqdn")]
    pub append_fqdn: bool,

    /// Append every routable machine address.
    #[serde(alias = "appendaddr")]
    pub append_addr: bool,

    /// Run on the host instead of inside the machine.
    pub local: bool,

    /// Inline standard input.
    pub stdin: String,

    /// File to read standard input from; wins over `stdin`.
    #[serde(alias = "stdinfile")]
    pub stdin_file: String,

    #[serde(alias = "stdoutfile")]
    pub stdout_file: String,

    #[serde(alias = "stdoutappend")]
    pub stdout_append: bool,

    #[serde(alias = "stderrfile")]
    pub stderr_file: String,

    #[serde(alias = "stderrappend")]
    pub stderr_append: bool,

    /// Permission bits for created output files (default `0o600`).
    pub mode: Option<u32>,
}

impl CommandSpec {
    /// Creates a command from an argument vector.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.first().is_none_or(|program| program.is_empty()) {
            return Err(Error::InvalidConfig(
                "command has an empty argument vector".to_string(),
            ));
        }
        Ok(())
    }

    /// Full argument vector for machine `fqdn` with addresses `addrs`.
    pub fn argv(&self, fqdn: &str, addrs: &[IpAddr]) -> Vec<String> {
        let mut args = Vec::new();
        if !self.local {
            args.extend(REMOTE_WRAPPER.iter().map(|s| s.to_string()));
            args.push(fqdn.to_string());
            args.push(REMOTE_WRAPPER_PIPE.to_string());
            args.extend(self.wrapper_parameters.iter().cloned());
            args.push("--".to_string());
        }
        args.extend(self.command.iter().cloned());
        if self.append_fqdn {
            args.push(fqdn.to_string());
        }
        if self.append_addr {
            args.extend(addrs.iter().map(IpAddr::to_string));
        }
        args
    }

    /// Runs the command to completion.
    pub async fn run(&self, fqdn: &str, addrs: &[IpAddr]) -> Result<()> {
        let argv = self.argv(fqdn, addrs);
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::InvalidConfig(
                "command has an empty argument vector".to_string(),
            ));
        };
        debug!(command = ?argv, "Running command");

        let spawn_err = |reason: String| Error::CommandSpawn {
            program: program.clone(),
            reason,
        };

        let mut cmd = Command::new(program);
        cmd.args(args);

        if !self.stdin_file.is_empty() {
            debug!(file = %self.stdin_file, "Using stdin");
            let file = File::open(&self.stdin_file)
                .await
                .map_err(|e| spawn_err(format!("stdin {}: {}", self.stdin_file, e)))?;
            cmd.stdin(Stdio::from(file.into_std().await));
        } else if !self.stdin.is_empty() {
            debug!(inline = %self.stdin, "Using stdin");
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let stdout = self
            .redirect(&self.stdout_file, self.stdout_append, "stdout")
            .await
            .map_err(|e| spawn_err(format!("stdout {}: {}", self.stdout_file, e)))?;
        let stderr = self
            .redirect(&self.stderr_file, self.stderr_append, "stderr")
            .await
            .map_err(|e| spawn_err(format!("stderr {}: {}", self.stderr_file, e)))?;
        cmd.stdout(stdout);
        cmd.stderr(stderr);

        let mut child = cmd.spawn().map_err(|e| spawn_err(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(self.stdin.as_bytes()).await {
                Ok(()) => {}
                // The command exited without reading all of its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(spawn_err(format!("stdin: {}", e))),
            }
        }

        let status = child.wait().await.map_err(|e| spawn_err(e.to_string()))?;
        if !status.success() {
            return Err(Error::CommandFailed {
                program: program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    async fn redirect(&self, path: &str, append: bool, stream: &str) -> std::io::Result<Stdio> {
        if path.is_empty() {
            return Ok(Stdio::null());
        }
        debug!(file = %path, append, "Using {}", stream);

        let mut open = OpenOptions::new();
        open.write(true)
            .create(true)
            .mode(self.mode.unwrap_or(DEFAULT_REDIRECT_MODE));
        if append {
            open.append(true);
        } else {
            open.truncate(true);
        }
        let file = open.open(path).await?;
        Ok(Stdio::from(file.into_std().await))
    }
}

// =============================================================================
// Stages
// =============================================================================

/// The five command lists of a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandStages {
    /// Run first, on every invocation.
    #[serde(alias = "commandspre")]
    pub commands_pre: Vec<CommandSpec>,

    /// Run once, right after the machine was cloned.
    pub creation: Vec<CommandSpec>,

    /// Run whenever this invocation started the machine.
    pub startup: Vec<CommandSpec>,

    /// Run once, after startup of a freshly cloned machine.
    #[serde(alias = "creationpost")]
    pub creation_post: Vec<CommandSpec>,

    /// Run last, on every invocation.
    pub commands: Vec<CommandSpec>,
}

impl CommandStages {
    /// Returns the commands to run, in execution order.
    pub fn assemble(&self, created: bool, started: bool) -> Vec<&CommandSpec> {
        let mut pipeline: Vec<&CommandSpec> = self.commands_pre.iter().collect();
        if created {
            pipeline.extend(&self.creation);
        }
        if started {
            pipeline.extend(&self.startup);
        }
        if created {
            pipeline.extend(&self.creation_post);
        }
        pipeline.extend(&self.commands);
        pipeline
    }

    /// Iterates every command of every stage.
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands_pre
            .iter()
            .chain(&self.creation)
            .chain(&self.startup)
            .chain(&self.creation_post)
            .chain(&self.commands)
    }
}

/// Runs `pipeline` in order, stopping at the first failure.
pub async fn run_pipeline(
    pipeline: &[&CommandSpec],
    fqdn: &str,
    addrs: &[IpAddr],
    log: &Span,
) -> Result<()> {
    if !pipeline.is_empty() {
        log.in_scope(|| info!(count = pipeline.len(), "Running commands"));
    }
    for command in pipeline {
        command.run(fqdn, addrs).await?;
    }
    Ok(())
}

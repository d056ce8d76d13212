//! Transport abstraction for running one command on one endpoint.
//!
//! The [`Transport`] trait decouples the action tree from the actual remote
//! backend (currently the `ssh` client). Tests use scripted transports that
//! return predetermined outputs without spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::error::TransportError;
use crate::io::config::SshConfig;
use crate::io::process::{CommandOutput, run_command};

/// Parameters for one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Host (or `user@host`) to connect to.
    pub endpoint: String,
    /// Command line handed to the remote shell.
    pub command: String,
    /// Kill the command once this elapses. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over remote execution backends.
///
/// Implementations are shared by concurrently running leaves, and each call
/// must use its own connection.
pub trait Transport: Send + Sync {
    /// Run the request to completion. `Err` means no command outcome exists
    /// (the connection could not be made); a non-zero exit is still `Ok`.
    fn exec(&self, request: &ExecRequest) -> Result<CommandOutput>;
}

/// Transport that spawns the `ssh` client once per request.
#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
    options: Vec<String>,
}

impl SshTransport {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            program: config.program.clone(),
            options: config.options.clone(),
        }
    }

    /// `ssh <options> <endpoint> <command>` with stdin detached.
    pub fn command(&self, endpoint: &str, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.options).arg(endpoint).arg(remote_command);
        cmd
    }
}

/// Refuse endpoints `ssh` would parse as an option.
pub(crate) fn check_endpoint(endpoint: &str) -> Result<(), TransportError> {
    if endpoint.starts_with('-') {
        return Err(TransportError {
            endpoint: endpoint.to_string(),
            message: "endpoint must not start with '-'".to_string(),
        });
    }
    Ok(())
}

impl Transport for SshTransport {
    #[instrument(skip_all, fields(endpoint = %request.endpoint))]
    fn exec(&self, request: &ExecRequest) -> Result<CommandOutput> {
        check_endpoint(&request.endpoint)?;
        let cmd = self.command(&request.endpoint, &request.command);
        debug!(command = %request.command, "running remote command");
        run_command(cmd, None, request.timeout, request.output_limit_bytes).map_err(|err| {
            TransportError {
                endpoint: request.endpoint.clone(),
                message: format!("{err:#}"),
            }
            .into()
        })
    }
}

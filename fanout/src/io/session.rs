//! Long-lived duplex sessions used by the interactive agent.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::TransportError;
use crate::io::config::SshConfig;
use crate::io::transport::check_endpoint;

/// How long a closing session may linger before it is killed.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// A bidirectional byte stream to a command running on some endpoint.
pub trait Session {
    /// The command's standard input.
    fn writer(&mut self) -> &mut dyn Write;
    /// The command's standard output.
    fn reader(&mut self) -> &mut dyn BufRead;
    /// Release the session, waiting briefly for the remote side to finish.
    fn close(&mut self) -> Result<()>;
}

/// Opens sessions: "run `command` on `endpoint`, give me its stdin/stdout".
pub trait Connector {
    fn open(&self, endpoint: &str, command: &str) -> Result<Box<dyn Session>>;
}

/// Session backed by a local child process (the `ssh` client, or a shell in tests).
pub struct ProcessSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ProcessSession {
    /// Spawn `cmd` with piped stdin/stdout. Stderr is inherited so connection
    /// diagnostics reach the operator.
    pub fn spawn(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        debug!(program = ?cmd.get_program(), "spawning session process");
        let mut child = cmd.spawn().context("spawn session")?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }
}

impl Session for ProcessSession {
    fn writer(&mut self) -> &mut dyn Write {
        &mut self.stdin
    }

    fn reader(&mut self) -> &mut dyn BufRead {
        &mut self.stdout
    }

    fn close(&mut self) -> Result<()> {
        match self
            .child
            .wait_timeout(CLOSE_GRACE)
            .context("wait for session")?
        {
            Some(status) => {
                debug!(exit_code = ?status.code(), "session exited");
            }
            None => {
                warn!(
                    grace_secs = CLOSE_GRACE.as_secs(),
                    "session did not exit, killing"
                );
                self.child.kill().context("kill session")?;
                self.child.wait().context("wait session after kill")?;
            }
        }
        Ok(())
    }
}

/// Connector that runs the command through the `ssh` client without a PTY.
#[derive(Debug, Clone)]
pub struct SshConnector {
    program: String,
    options: Vec<String>,
}

impl SshConnector {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            program: config.program.clone(),
            options: config.options.clone(),
        }
    }

    pub fn command(&self, endpoint: &str, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.options)
            .arg("-T")
            .arg(endpoint)
            .arg(remote_command);
        cmd
    }
}

impl Connector for SshConnector {
    fn open(&self, endpoint: &str, command: &str) -> Result<Box<dyn Session>> {
        check_endpoint(endpoint)?;
        let session =
            ProcessSession::spawn(self.command(endpoint, command)).map_err(|err| TransportError {
                endpoint: endpoint.to_string(),
                message: format!("{err:#}"),
            })?;
        Ok(Box::new(session))
    }
}

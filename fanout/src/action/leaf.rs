//! One command on one endpoint.

use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use super::{ActionState, ExecContext};
use crate::exit_codes;
use crate::io::transport::ExecRequest;

#[derive(Debug, Clone)]
pub struct LeafAction {
    state: ActionState,
    endpoint: String,
    command: String,
    exit_code: Option<i32>,
    timed_out: bool,
    stdout: String,
    stderr: String,
}

impl LeafAction {
    pub fn new(
        label: impl Into<String>,
        endpoint: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            state: ActionState::new(label.into()),
            endpoint: endpoint.into(),
            command: command.into(),
            exit_code: None,
            timed_out: false,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Kill the command and fail the leaf once `timeout` elapses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.state.timeout = Some(timeout);
        self
    }

    pub fn label(&self) -> &str {
        &self.state.label
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> &ActionState {
        &self.state
    }

    /// `None` until the leaf has run.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Run the command through the context's transport.
    ///
    /// Never fails: transport errors and timeouts become exit codes.
    /// `deadline` comes from enclosing composites and caps the leaf's own timeout.
    #[instrument(skip_all, fields(label = %self.state.label))]
    pub(crate) fn run(&mut self, ctx: &ExecContext<'_>, deadline: Option<Instant>) {
        if self.exit_code.is_some() {
            warn!("leaf already has an exit code, not running it again");
            return;
        }
        let started = Instant::now();
        self.state.started_at = Some(started);

        let timeout = match (self.state.timeout, deadline) {
            (own, None) => own,
            (None, Some(deadline)) => Some(deadline.saturating_duration_since(started)),
            (Some(own), Some(deadline)) => Some(own.min(deadline.saturating_duration_since(started))),
        };
        if timeout == Some(Duration::ZERO) {
            self.timed_out = true;
            self.stderr = "deadline elapsed before the command started\n".to_string();
            self.finish(exit_codes::TIMED_OUT);
            return;
        }

        let request = ExecRequest {
            endpoint: self.endpoint.clone(),
            command: self.command.clone(),
            timeout,
            output_limit_bytes: ctx.output_limit_bytes,
        };
        info!(endpoint = %self.endpoint, "leaf started");
        match ctx.transport.exec(&request) {
            Ok(output) => {
                self.stdout = output.stdout_lossy();
                self.stderr = output.stderr_lossy();
                self.timed_out = output.timed_out;
                let code = if output.timed_out {
                    exit_codes::TIMED_OUT
                } else {
                    output.exit_code.unwrap_or(exit_codes::TERMINATED)
                };
                self.finish(code);
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "transport failure");
                self.stderr = format!("{err:#}\n");
                self.finish(exit_codes::TRANSPORT_FAILURE);
            }
        }
    }

    /// Fail the leaf without running it (enclosing deadline already elapsed).
    pub(crate) fn abandon(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        self.timed_out = true;
        self.stderr = "not started: deadline elapsed\n".to_string();
        self.finish(exit_codes::TIMED_OUT);
    }

    fn finish(&mut self, code: i32) {
        self.exit_code = Some(code);
        self.state.ended_at = Some(Instant::now());
        info!(
            exit_code = code,
            elapsed_ms = self.state.elapsed().map(|e| e.as_millis() as u64),
            "leaf finished"
        );
    }
}

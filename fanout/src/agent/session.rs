//! One interactive agent on one endpoint, from bootstrap to `EXIT`.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::bootstrap::Bootstrap;
use super::protocol::{ProtocolChannel, Reply};
use crate::error::{ProtocolError, TransportError};
use crate::io::session::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Bootstrapped,
    Active,
    Closed,
}

pub struct AgentSession {
    endpoint: String,
    channel: ProtocolChannel,
    phase: SessionPhase,
}

impl AgentSession {
    /// Open a session to `endpoint`, start the interpreter and pipe the agent
    /// program into it. The returned session is ready for `exec`.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub fn open(connector: &dyn Connector, endpoint: &str, bootstrap: &Bootstrap) -> Result<Self> {
        let mut phase = SessionPhase::Created;
        debug!(?phase, command = %bootstrap.start_command, "opening agent session");
        let mut session = connector.open(endpoint, &bootstrap.start_command)?;

        let writer = session.writer();
        let sent = writer
            .write_all(&bootstrap.payload)
            .and_then(|()| writer.flush());
        if let Err(err) = sent {
            // The remote side is already gone; release what is left of it.
            if let Err(close_err) = session.close() {
                warn!(err = %format!("{close_err:#}"), "closing failed session");
            }
            return Err(TransportError {
                endpoint: endpoint.to_string(),
                message: format!("send agent program: {err}"),
            }
            .into());
        }
        phase = SessionPhase::Bootstrapped;
        debug!(?phase, payload_bytes = bootstrap.payload.len(), "agent program sent");

        let channel = ProtocolChannel::new(session);
        info!("agent session active");
        Ok(Self {
            endpoint: endpoint.to_string(),
            channel,
            phase: SessionPhase::Active,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Run one command on the agent and wait for its reply.
    ///
    /// Any protocol failure leaves the session unusable; the caller should
    /// `close` it and stop.
    pub fn exec(&mut self, command: &str) -> Result<Reply, ProtocolError> {
        if self.phase != SessionPhase::Active {
            return Err(ProtocolError::NotReady("session is not active"));
        }
        self.channel.exec(command)
    }

    /// Send `EXIT` (when the channel is still usable) and release the session.
    /// Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.phase == SessionPhase::Closed {
            return Ok(());
        }
        if let Err(err) = self.channel.exit() {
            debug!(err = %err, "agent channel already closed");
        }
        self.phase = SessionPhase::Closed;
        self.channel
            .shutdown()
            .with_context(|| format!("close session to {}", self.endpoint))?;
        info!(endpoint = %self.endpoint, "agent session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::bootstrap::build_bootstrap;
    use crate::test_support::{LocalConnector, ScriptedConnector, ScriptedSession};

    #[test]
    fn open_writes_payload_before_any_request() {
        let session = ScriptedSession::new(&[r#"{"stdout":"hi\n","stderr":""}"#]);
        let sent = session.sent();
        let connector = ScriptedConnector::new(session);
        let bootstrap = build_bootstrap();

        let mut agent = AgentSession::open(&connector, "build-7", &bootstrap).expect("open");
        assert_eq!(agent.phase(), SessionPhase::Active);
        let reply = agent.exec("echo hi").expect("exec");
        agent.close().expect("close");

        assert_eq!(reply.stdout, "hi\n");
        assert_eq!(agent.phase(), SessionPhase::Closed);
        assert_eq!(
            connector.opened(),
            vec![("build-7".to_string(), bootstrap.start_command.clone())]
        );
        let bytes = sent.bytes();
        assert!(bytes.starts_with(&bootstrap.payload));
        let records = String::from_utf8(bytes[bootstrap.payload.len()..].to_vec()).expect("utf8");
        assert_eq!(
            records,
            "{\"type\":\"EXEC\",\"key\":1,\"command\":\"echo hi\"}\n{\"type\":\"EXIT\"}\n"
        );
    }

    #[test]
    fn exec_after_close_is_refused() {
        let connector = ScriptedConnector::new(ScriptedSession::new(&[]));
        let mut agent =
            AgentSession::open(&connector, "build-7", &build_bootstrap()).expect("open");
        agent.close().expect("close");
        agent.close().expect("second close");
        assert!(matches!(
            agent.exec("true").unwrap_err(),
            ProtocolError::NotReady(_)
        ));
    }

    #[test]
    fn failed_bootstrap_write_is_transport_error() {
        let connector = ScriptedConnector::new(ScriptedSession::new(&[]).failing_writes());
        let err = AgentSession::open(&connector, "build-7", &build_bootstrap())
            .err()
            .expect("open should fail");
        let transport = err.downcast_ref::<TransportError>().expect("transport error");
        assert_eq!(transport.endpoint, "build-7");
    }

    #[cfg(unix)]
    #[test]
    fn real_agent_runs_commands_until_exit() {
        if !LocalConnector::has_program("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let connector = LocalConnector;
        let mut agent =
            AgentSession::open(&connector, "localhost", &build_bootstrap()).expect("open");

        let first = agent.exec("echo hi").expect("first");
        assert_eq!(first.stdout, "hi\n");
        assert_eq!(first.key, Some(1));
        assert_eq!(first.exit_code, Some(0));

        let second = agent.exec("echo oops >&2; exit 3").expect("second");
        assert_eq!(second.stderr, "oops\n");
        assert_eq!(second.key, Some(2));
        assert_eq!(second.exit_code, Some(3));

        agent.close().expect("close");
    }
}

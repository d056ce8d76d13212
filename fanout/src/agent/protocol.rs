//! Newline-delimited JSON protocol spoken with a running agent.
//!
//! One record per line. The controller sends `EXEC` and blocks for exactly one
//! reply before sending anything else; replies are matched to requests by
//! arrival order. `EXIT` ends the session and gets no reply.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::ProtocolError;
use crate::io::session::Session;

/// Controller to agent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Request {
    Exec { key: u64, command: String },
    Exit,
}

/// Agent to controller record, sent once per `EXEC`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub stdout: String,
    pub stderr: String,
    /// Echo of the request key, when the agent provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<u64>,
    #[serde(default, rename = "exit", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Serialize a request as one line, including the trailing newline.
pub fn encode_request(request: &Request) -> Result<String, ProtocolError> {
    let mut line =
        serde_json::to_string(request).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
    line.push('\n');
    Ok(line)
}

pub fn decode_reply(line: &str) -> Result<Reply, ProtocolError> {
    serde_json::from_str(line).map_err(|err| ProtocolError::Malformed(format!("{err}: {line}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Ready,
    AwaitingReply { key: u64 },
    Closed,
}

impl ChannelState {
    fn name(self) -> &'static str {
        match self {
            ChannelState::Ready => "ready",
            ChannelState::AwaitingReply { .. } => "awaiting reply",
            ChannelState::Closed => "closed",
        }
    }
}

/// Request/reply layer over a session whose agent is already running.
pub struct ProtocolChannel {
    session: Box<dyn Session>,
    state: ChannelState,
    next_key: u64,
}

impl ProtocolChannel {
    pub fn new(session: Box<dyn Session>) -> Self {
        Self {
            session,
            state: ChannelState::Ready,
            next_key: 1,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Send `EXEC` and return its key. Fails if a reply is still outstanding.
    pub fn send_exec(&mut self, command: &str) -> Result<u64, ProtocolError> {
        match self.state {
            ChannelState::Ready => {}
            ChannelState::AwaitingReply { key } => return Err(ProtocolError::ReplyPending { key }),
            ChannelState::Closed => return Err(ProtocolError::NotReady(self.state.name())),
        }
        let key = self.next_key;
        self.write_record(&Request::Exec {
            key,
            command: command.to_string(),
        })?;
        self.next_key += 1;
        self.state = ChannelState::AwaitingReply { key };
        Ok(key)
    }

    /// Block until the reply to the outstanding `EXEC` arrives.
    pub fn wait_for_reply(&mut self) -> Result<Reply, ProtocolError> {
        let ChannelState::AwaitingReply { key } = self.state else {
            return Err(ProtocolError::NotReady(self.state.name()));
        };
        let line = self.read_record()?;
        let reply = decode_reply(&line)?;
        if let Some(echoed) = reply.key
            && echoed != key
        {
            warn!(expected = key, echoed, "agent reply key does not match request");
        }
        debug!(key, exit_code = ?reply.exit_code, "reply received");
        self.state = ChannelState::Ready;
        Ok(reply)
    }

    /// One full round trip.
    pub fn exec(&mut self, command: &str) -> Result<Reply, ProtocolError> {
        self.send_exec(command)?;
        self.wait_for_reply()
    }

    /// Send `EXIT`. The channel is closed afterwards whatever the outcome.
    pub fn exit(&mut self) -> Result<(), ProtocolError> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        let result = self.write_record(&Request::Exit);
        self.state = ChannelState::Closed;
        result
    }

    /// Release the underlying session.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        self.state = ChannelState::Closed;
        self.session.close()
    }

    fn write_record(&mut self, request: &Request) -> Result<(), ProtocolError> {
        let line = encode_request(request)?;
        trace!(record = line.trim_end(), "sending record");
        let writer = self.session.writer();
        let written = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush());
        written.map_err(|err| self.broken(err))
    }

    fn read_record(&mut self) -> Result<String, ProtocolError> {
        loop {
            let mut line = String::new();
            let read = self.session.reader().read_line(&mut line);
            match read {
                Ok(0) => {
                    self.state = ChannelState::Closed;
                    return Err(ProtocolError::ChannelClosed);
                }
                Ok(_) => {
                    let record = line.trim_end_matches(['\r', '\n']);
                    if record.trim().is_empty() {
                        continue;
                    }
                    trace!(record, "received record");
                    return Ok(record.to_string());
                }
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    return Err(ProtocolError::Malformed(err.to_string()));
                }
                Err(err) => return Err(self.broken(err)),
            }
        }
    }

    fn broken(&mut self, err: io::Error) -> ProtocolError {
        warn!(err = %err, "agent channel broken");
        self.state = ChannelState::Closed;
        ProtocolError::ChannelClosed
    }
}

//! Starting the agent by piping its source into a freshly opened session.
//!
//! The start command runs a one-line loader that reads a length header and
//! then exactly that many bytes of program text from stdin, and executes it.
//! Everything after the program on stdin belongs to the protocol, so one
//! session carries both the program and the records that follow it. Nothing
//! is written to the remote filesystem.

use crate::core::command::shell_escape;

const AGENT_PROGRAM: &str = include_str!("agent.py");

const LOADER: &str = "import sys;n=int(sys.stdin.buffer.readline());\
exec(compile(sys.stdin.buffer.read(n),\"<fanout-agent>\",\"exec\"))";

pub const DEFAULT_INTERPRETER: &str = "python3";

/// Start command plus the bytes to write to its stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub start_command: String,
    pub payload: Vec<u8>,
}

impl Bootstrap {
    pub fn new(interpreter: &str) -> Self {
        let start_command = format!(
            "{} -u -c {}",
            shell_escape(interpreter),
            shell_escape(LOADER)
        );
        let mut payload = format!("{}\n", AGENT_PROGRAM.len()).into_bytes();
        payload.extend_from_slice(AGENT_PROGRAM.as_bytes());
        Self {
            start_command,
            payload,
        }
    }
}

/// Bootstrap for the default `python3` interpreter.
pub fn build_bootstrap() -> Bootstrap {
    Bootstrap::new(DEFAULT_INTERPRETER)
}

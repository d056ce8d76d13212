//! Orchestration for `fanout shell`: a prompt loop against one agent.
//!
//! Each input line is sent as one `EXEC` and the loop blocks for its reply
//! before prompting again. `exit` or end of input ends the session.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agent::bootstrap::Bootstrap;
use crate::agent::session::AgentSession;
use crate::io::lease::LeaseResolver;
use crate::io::session::Connector;

const PROMPT: &str = "> ";

/// Where `fanout shell` connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellTarget {
    Lease(String),
    Endpoint(String),
}

impl ShellTarget {
    pub fn resolve(&self, leases: &dyn LeaseResolver) -> Result<String> {
        match self {
            ShellTarget::Lease(lease) => leases
                .resolve(lease)
                .with_context(|| format!("resolve lease {lease}")),
            ShellTarget::Endpoint(endpoint) => Ok(endpoint.clone()),
        }
    }
}

/// Resolve the target, start the agent there and run the prompt loop.
#[instrument(skip_all, fields(target = ?target))]
pub fn run_shell(
    target: &ShellTarget,
    leases: &dyn LeaseResolver,
    connector: &dyn Connector,
    bootstrap: &Bootstrap,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<()> {
    let endpoint = target.resolve(leases)?;
    let mut session = AgentSession::open(connector, &endpoint, bootstrap)
        .with_context(|| format!("start agent on {endpoint}"))?;
    run_interactive(&mut session, input, out, err)
}

/// Prompt, read a line, run it, print the reply; until `exit` or end of input.
///
/// The session is closed on every path. A protocol failure ends the loop and
/// is returned after the session has been released.
pub fn run_interactive(
    session: &mut AgentSession,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<()> {
    let looped = prompt_loop(session, input, out, err);
    if let Err(loop_err) = &looped {
        warn!(err = %format!("{loop_err:#}"), "interactive session failed");
    }
    let closed = session.close();
    looped?;
    closed
}

fn prompt_loop(
    session: &mut AgentSession,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<()> {
    let mut commands = 0usize;
    loop {
        write!(out, "{PROMPT}").context("write prompt")?;
        out.flush().context("flush prompt")?;

        let mut line = String::new();
        if input.read_line(&mut line).context("read command")? == 0 {
            writeln!(out).context("write newline")?;
            break;
        }
        let command = line.trim_end_matches(['\r', '\n']);
        if command.trim() == "exit" {
            break;
        }
        if command.trim().is_empty() {
            continue;
        }

        let reply = session.exec(command)?;
        commands += 1;
        out.write_all(reply.stdout.as_bytes())
            .context("write command stdout")?;
        err.write_all(reply.stderr.as_bytes())
            .context("write command stderr")?;
        err.flush().context("flush command stderr")?;
    }
    info!(endpoint = %session.endpoint(), commands, "interactive session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    use crate::agent::bootstrap::build_bootstrap;
    use crate::error::ProtocolError;
    use crate::io::lease::ConfigLeases;
    use crate::test_support::{ScriptedConnector, ScriptedSession};

    struct Transcript {
        result: Result<()>,
        out: String,
        err: String,
        sent: Vec<String>,
        closed: bool,
    }

    fn drive(replies: &[&str], input: &str) -> Transcript {
        let session = ScriptedSession::new(replies);
        let sent = session.sent();
        let closed = session.closed_flag();
        let connector = ScriptedConnector::new(session);
        let bootstrap = build_bootstrap();
        let mut agent = AgentSession::open(&connector, "build-7", &bootstrap).expect("open");

        let mut input = Cursor::new(input.as_bytes().to_vec());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = run_interactive(&mut agent, &mut input, &mut out, &mut err);

        let sent = sent
            .lines()
            .into_iter()
            .filter(|line| line.starts_with("{\"type\""))
            .collect();
        let closed = *closed.lock().expect("closed flag");
        Transcript {
            result,
            out: String::from_utf8(out).expect("utf8"),
            err: String::from_utf8(err).expect("utf8"),
            sent,
            closed,
        }
    }

    #[test]
    fn runs_each_line_and_stops_at_exit() {
        let transcript = drive(
            &[
                r#"{"stdout":"hi\n","stderr":""}"#,
                r#"{"stdout":"","stderr":"nope\n"}"#,
            ],
            "echo hi\n\nls /missing\nexit\necho never\n",
        );

        transcript.result.expect("session");
        assert_eq!(transcript.out, "> hi\n> > > ");
        assert_eq!(transcript.err, "nope\n");
        assert_eq!(
            transcript.sent,
            vec![
                r#"{"type":"EXEC","key":1,"command":"echo hi"}"#,
                r#"{"type":"EXEC","key":2,"command":"ls /missing"}"#,
                r#"{"type":"EXIT"}"#,
            ]
        );
        assert!(transcript.closed);
    }

    #[test]
    fn end_of_input_sends_exit() {
        let transcript = drive(&[], "");
        transcript.result.expect("session");
        assert_eq!(transcript.out, "> \n");
        assert_eq!(transcript.sent, vec![r#"{"type":"EXIT"}"#]);
    }

    #[test]
    fn lost_channel_ends_the_loop_and_still_closes() {
        let transcript = drive(&[], "uptime\nuptime\n");
        let err = transcript.result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::ChannelClosed)
        ));
        assert!(transcript.closed);
        assert_eq!(transcript.out, "> ");
    }

    #[test]
    fn crlf_input_is_trimmed() {
        let transcript = drive(&[r#"{"stdout":"ok\n","stderr":""}"#], "true\r\nexit\r\n");
        transcript.result.expect("session");
        assert_eq!(
            transcript.sent[0],
            r#"{"type":"EXEC","key":1,"command":"true"}"#
        );
    }

    #[test]
    fn lease_targets_resolve_through_the_config() {
        let mut leases = BTreeMap::new();
        leases.insert("42".to_string(), "build-042".to_string());
        let leases = ConfigLeases::new(leases);

        let target = ShellTarget::Lease("42".to_string());
        assert_eq!(target.resolve(&leases).expect("resolve"), "build-042");
        let direct = ShellTarget::Endpoint("10.0.0.9".to_string());
        assert_eq!(direct.resolve(&leases).expect("resolve"), "10.0.0.9");
        let missing = ShellTarget::Lease("43".to_string());
        assert!(missing.resolve(&leases).is_err());
    }

    #[test]
    fn run_shell_opens_the_resolved_endpoint() {
        let connector = ScriptedConnector::new(ScriptedSession::new(&[]));
        let mut leases = BTreeMap::new();
        leases.insert("42".to_string(), "build-042".to_string());
        let mut input = Cursor::new(b"exit\n".to_vec());
        let mut out = Vec::new();
        let mut err = Vec::new();

        run_shell(
            &ShellTarget::Lease("42".to_string()),
            &ConfigLeases::new(leases),
            &connector,
            &build_bootstrap(),
            &mut input,
            &mut out,
            &mut err,
        )
        .expect("shell");

        assert_eq!(connector.opened()[0].0, "build-042");
    }
}

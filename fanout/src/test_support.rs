//! Scripted collaborators for tests: transports, sessions, connectors and
//! inventories that return predetermined results without touching the network.

use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Cursor, Write};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::core::hosts::InventoryHost;
use crate::error::TransportError;
use crate::io::inventory::Inventory;
use crate::io::process::CommandOutput;
use crate::io::session::{Connector, ProcessSession, Session};
use crate::io::transport::{ExecRequest, Transport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What one scripted `exec` call does.
#[derive(Debug, Clone)]
pub struct Step {
    exit_code: i32,
    stdout: String,
    stderr: String,
    duration: Duration,
    unreachable: bool,
}

impl Step {
    /// Exit immediately with `code` and no output.
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            unreachable: false,
        }
    }

    /// Fail with a transport error, as if the host could not be reached.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::exit(0)
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_string();
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_string();
        self
    }

    /// Pretend the command runs for `duration` (subject to the request timeout).
    pub fn lasting(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Transport that plays back [`Step`]s queued per endpoint.
///
/// Endpoints without a queued step exit 0 immediately. Every request, its
/// launch time and the peak number of simultaneous calls are recorded.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    requests: Mutex<Vec<ExecRequest>>,
    launches: Mutex<Vec<Instant>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, endpoint: &str, step: Step) -> Self {
        self.steps
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(endpoint.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        lock(&self.requests).clone()
    }

    /// Launch instants in ascending order.
    pub fn launch_times(&self) -> Vec<Instant> {
        let mut launches = lock(&self.launches).clone();
        launches.sort();
        launches
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn exec(&self, request: &ExecRequest) -> Result<CommandOutput> {
        lock(&self.launches).push(Instant::now());
        lock(&self.requests).push(request.clone());
        let step = lock(&self.steps)
            .get_mut(&request.endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Step::exit(0));

        if step.unreachable {
            return Err(TransportError {
                endpoint: request.endpoint.clone(),
                message: "connection refused".to_string(),
            }
            .into());
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let timed_out = request
            .timeout
            .is_some_and(|timeout| timeout < step.duration);
        let sleep_for = match request.timeout {
            Some(timeout) => timeout.min(step.duration),
            None => step.duration,
        };
        thread::sleep(sleep_for);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if timed_out {
            return Ok(CommandOutput {
                timed_out: true,
                ..CommandOutput::default()
            });
        }
        Ok(CommandOutput {
            exit_code: Some(step.exit_code),
            stdout: step.stdout.into_bytes(),
            stderr: step.stderr.into_bytes(),
            ..CommandOutput::default()
        })
    }
}

/// Fixed inventory that counts how often it was queried.
#[derive(Debug, Default)]
pub struct StaticInventory {
    hosts: Vec<InventoryHost>,
    calls: AtomicUsize,
}

impl StaticInventory {
    pub fn new(hosts: &[&str]) -> Self {
        Self {
            hosts: hosts
                .iter()
                .map(|host| InventoryHost {
                    host: (*host).to_string(),
                    pool: None,
                })
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Inventory for StaticInventory {
    fn list_hosts(&self) -> Result<Vec<InventoryHost>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hosts.clone())
    }
}

/// Shared view of every byte written to a [`ScriptedSession`].
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<u8>>>);

impl SentLog {
    pub fn bytes(&self) -> Vec<u8> {
        lock(&self.0).clone()
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.bytes())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

struct SentWriter {
    log: SentLog,
    fail: bool,
}

impl Write for SentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "session gone"));
        }
        lock(&self.log.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory session: reads come from a fixed list of reply lines, writes are
/// captured in a [`SentLog`]. Reading past the last line is end of stream.
pub struct ScriptedSession {
    replies: Cursor<Vec<u8>>,
    writer: SentWriter,
    closed: Arc<Mutex<bool>>,
}

impl ScriptedSession {
    pub fn new(replies: &[&str]) -> Self {
        let mut script = String::new();
        for reply in replies {
            script.push_str(reply);
            script.push('\n');
        }
        Self {
            replies: Cursor::new(script.into_bytes()),
            writer: SentWriter {
                log: SentLog::default(),
                fail: false,
            },
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Every write fails with a broken pipe.
    pub fn failing_writes(mut self) -> Self {
        self.writer.fail = true;
        self
    }

    pub fn sent(&self) -> SentLog {
        self.writer.log.clone()
    }

    /// Flag set once `close` has been called.
    pub fn closed_flag(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.closed)
    }
}

impl Session for ScriptedSession {
    fn writer(&mut self) -> &mut dyn Write {
        &mut self.writer
    }

    fn reader(&mut self) -> &mut dyn BufRead {
        &mut self.replies
    }

    fn close(&mut self) -> Result<()> {
        *lock(&self.closed) = true;
        Ok(())
    }
}

/// Connector that hands out one prepared [`ScriptedSession`].
pub struct ScriptedConnector {
    session: Mutex<Option<ScriptedSession>>,
    opened: Mutex<Vec<(String, String)>>,
}

impl ScriptedConnector {
    pub fn new(session: ScriptedSession) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// `(endpoint, command)` of every `open` call.
    pub fn opened(&self) -> Vec<(String, String)> {
        lock(&self.opened).clone()
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, endpoint: &str, command: &str) -> Result<Box<dyn Session>> {
        lock(&self.opened).push((endpoint.to_string(), command.to_string()));
        let session = lock(&self.session)
            .take()
            .ok_or_else(|| anyhow!("scripted session already opened"))?;
        Ok(Box::new(session))
    }
}

/// Connector that runs the command in a local `sh`, ignoring the endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

impl LocalConnector {
    /// Whether `program` is on `PATH`.
    pub fn has_program(program: &str) -> bool {
        Command::new("sh")
            .arg("-c")
            .arg(format!("command -v {program}"))
            .output()
            .is_ok_and(|output| output.status.success())
    }
}

impl Connector for LocalConnector {
    fn open(&self, _endpoint: &str, command: &str) -> Result<Box<dyn Session>> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        Ok(Box::new(ProcessSession::spawn(cmd)?))
    }
}

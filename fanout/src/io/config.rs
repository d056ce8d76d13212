//! Fanout configuration, stored by default at `.fanout/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::agent::bootstrap::DEFAULT_INTERPRETER;

pub const DEFAULT_CONFIG_PATH: &str = ".fanout/config.toml";

/// Fanout configuration (TOML).
///
/// Every field is optional in the file; missing fields fall back to
/// [`FanoutConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FanoutConfig {
    /// Truncate each leaf's captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub ssh: SshConfig,

    pub agent: AgentConfig,

    pub inventory: InventoryConfig,

    /// Values used when the corresponding `remote` flag is absent.
    pub defaults: RunDefaults,

    /// Lease id to connectable endpoint, used by `fanout shell --lease`.
    pub leases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshConfig {
    /// Client binary to invoke.
    pub program: String,
    /// Arguments placed before the endpoint (e.g. `["-o", "BatchMode=yes"]`).
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            options: vec!["-o".to_string(), "StrictHostKeyChecking=no".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Interpreter started on the remote host to run the agent program.
    pub interpreter: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InventoryConfig {
    /// Command whose stdout is a JSON array of `{"host": ..., "pool": ...}`.
    pub command: Vec<String>,
    /// Give up on the inventory command after this many seconds.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunDefaults {
    pub limit: Option<usize>,
    pub throttle_secs: Option<f64>,
    /// Per-host command timeout.
    pub timeout_secs: Option<f64>,
    /// Bound on the whole fan-out.
    pub deadline_secs: Option<f64>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            output_limit_bytes: 1_000_000,
            ssh: SshConfig::default(),
            agent: AgentConfig::default(),
            inventory: InventoryConfig::default(),
            defaults: RunDefaults::default(),
            leases: BTreeMap::new(),
        }
    }
}

impl FanoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.ssh.program.trim().is_empty() {
            return Err(anyhow!("ssh.program must not be empty"));
        }
        if self.agent.interpreter.trim().is_empty() {
            return Err(anyhow!("agent.interpreter must not be empty"));
        }
        if !self.inventory.command.is_empty() && self.inventory.command[0].trim().is_empty() {
            return Err(anyhow!("inventory.command must start with a program"));
        }
        if self.defaults.limit == Some(0) {
            return Err(anyhow!("defaults.limit must be > 0"));
        }
        if let Some(throttle) = self.defaults.throttle_secs
            && !(throttle.is_finite() && throttle >= 0.0)
        {
            return Err(anyhow!("defaults.throttle_secs must be >= 0"));
        }
        if let Some(timeout) = self.defaults.timeout_secs
            && !(timeout.is_finite() && timeout > 0.0)
        {
            return Err(anyhow!("defaults.timeout_secs must be > 0"));
        }
        if let Some(deadline) = self.defaults.deadline_secs
            && !(deadline.is_finite() && deadline > 0.0)
        {
            return Err(anyhow!("defaults.deadline_secs must be > 0"));
        }
        for (lease, endpoint) in &self.leases {
            if endpoint.trim().is_empty() {
                return Err(anyhow!("lease {lease} has an empty endpoint"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FanoutConfig::default()`.
pub fn load_config(path: &Path) -> Result<FanoutConfig> {
    if !path.exists() {
        let cfg = FanoutConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FanoutConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FanoutConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

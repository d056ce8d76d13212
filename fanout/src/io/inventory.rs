//! External host inventory lookup, used to resolve `--pools`.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument};

use crate::core::hosts::InventoryHost;
use crate::io::config::InventoryConfig;
use crate::io::process::run_command;

const DEFAULT_INVENTORY_TIMEOUT: Duration = Duration::from_secs(60);
const INVENTORY_OUTPUT_LIMIT_BYTES: usize = 16 * 1024 * 1024;

pub trait Inventory {
    /// Every known host, in inventory order.
    fn list_hosts(&self) -> Result<Vec<InventoryHost>>;
}

/// Inventory produced by running a configured command that prints a JSON
/// array of `{"host": ..., "pool": ...}` records.
#[derive(Debug, Clone)]
pub struct CommandInventory {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandInventory {
    pub fn new(config: &InventoryConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_INVENTORY_TIMEOUT),
        }
    }
}

impl Inventory for CommandInventory {
    #[instrument(skip_all, fields(program = ?self.command.first()))]
    fn list_hosts(&self) -> Result<Vec<InventoryHost>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("inventory.command is not configured; it is required for --pools"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = run_command(cmd, None, Some(self.timeout), INVENTORY_OUTPUT_LIMIT_BYTES)
            .context("run inventory command")?;
        if output.timed_out {
            bail!("inventory command timed out after {:?}", self.timeout);
        }
        if output.exit_code != Some(0) {
            bail!(
                "inventory command failed with status {:?}: {}",
                output.exit_code,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if output.stdout_truncated > 0 {
            bail!("inventory output exceeded {INVENTORY_OUTPUT_LIMIT_BYTES} bytes");
        }

        let hosts = parse_inventory(&output.stdout)?;
        debug!(count = hosts.len(), "loaded inventory");
        Ok(hosts)
    }
}

pub fn parse_inventory(raw: &[u8]) -> Result<Vec<InventoryHost>> {
    serde_json::from_slice(raw).context("parse inventory json")
}

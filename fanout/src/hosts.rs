//! Host list resolution for `fanout remote` and `fanout hosts`.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::hosts::{expand_spec, match_pools, split_tokens};
use crate::io::inventory::Inventory;

/// Expand `spec` and then append the hosts of every pool in `pools`.
///
/// The inventory is only queried when `pools` names at least one prefix.
#[instrument(skip_all, fields(spec = %spec, pools = %pools))]
pub fn expand(spec: &str, pools: &str, inventory: &dyn Inventory) -> Result<Vec<String>> {
    let mut hosts = expand_spec(spec)?;
    if !split_tokens(pools).is_empty() {
        let records = inventory.list_hosts().context("fetch host inventory")?;
        debug!(records = records.len(), "inventory loaded");
        hosts.extend(match_pools(pools, &records)?);
    }
    debug!(hosts = hosts.len(), "host list resolved");
    Ok(hosts)
}

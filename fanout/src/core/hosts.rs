//! Host specification expansion.
//!
//! A spec is a comma/whitespace separated list of tokens. Each token is either
//! a literal host or a template with exactly one numeric range such as
//! `web-001-012`, which expands to `web-001` through `web-012`. Range bounds
//! are ASCII digits only. Host names never start with `-`, so they cannot be
//! mistaken for `ssh` options.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+-[0-9]+").unwrap());
static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,\s]+").unwrap());

/// Largest number of hosts a single range may expand to.
pub const MAX_RANGE_HOSTS: u64 = 100_000;

/// One record of the external host inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryHost {
    pub host: String,
    #[serde(default)]
    pub pool: Option<String>,
}

/// Split a spec on commas and whitespace, dropping empty tokens.
pub fn split_tokens(spec: &str) -> Vec<&str> {
    SEPARATOR_RE
        .split(spec)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Expand every token of `spec` in order.
pub fn expand_spec(spec: &str) -> Result<Vec<String>, ValidationError> {
    let mut hosts = Vec::new();
    for token in split_tokens(spec) {
        hosts.extend(expand_token(token)?);
    }
    Ok(hosts)
}

/// Expand a single token. Tokens without a range marker are returned verbatim.
pub fn expand_token(token: &str) -> Result<Vec<String>, ValidationError> {
    check_host_name(token)?;
    let mut markers = RANGE_RE.find_iter(token);
    let Some(marker) = markers.next() else {
        return Ok(vec![token.to_string()]);
    };
    if markers.next().is_some() {
        return Err(ValidationError::new(format!(
            "host specification \"{token}\" is ambiguous: it contains more than one range"
        )));
    }

    let range = marker.as_str();
    let (min_raw, max_raw) = range
        .split_once('-')
        .ok_or_else(|| ValidationError::new(format!("host range \"{range}\" is malformed")))?;
    let width = min_raw.len();
    let min = parse_bound(range, min_raw)?;
    let max = parse_bound(range, max_raw)?;

    if min > max {
        return Err(ValidationError::new(format!(
            "host range \"{range}\" is invalid: minimum is larger than maximum"
        )));
    }
    if max.to_string().len() > width {
        return Err(ValidationError::new(format!(
            "host range \"{range}\" is invalid: range start does not have enough \
             leading zeroes to contain the entire range"
        )));
    }

    if max - min >= MAX_RANGE_HOSTS {
        return Err(ValidationError::new(format!(
            "host range \"{range}\" is invalid: it expands to more than {MAX_RANGE_HOSTS} hosts"
        )));
    }

    let prefix = &token[..marker.start()];
    let suffix = &token[marker.end()..];
    Ok((min..=max)
        .map(|value| format!("{prefix}{value:0width$}{suffix}"))
        .collect())
}

fn check_host_name(host: &str) -> Result<(), ValidationError> {
    if host.starts_with('-') {
        return Err(ValidationError::new(format!(
            "host \"{host}\" is invalid: host names must not start with '-'"
        )));
    }
    Ok(())
}

fn parse_bound(range: &str, raw: &str) -> Result<u64, ValidationError> {
    raw.parse::<u64>().map_err(|_| {
        ValidationError::new(format!(
            "host range \"{range}\" is invalid: \"{raw}\" is out of range"
        ))
    })
}

/// Resolve pool prefixes against the inventory.
///
/// A host belongs to pool `p` when its name is `p` immediately followed by a
/// digit. Results are grouped by prefix in the order given, and keep
/// inventory order within a group. Repeated prefixes are only expanded once.
pub fn match_pools(
    pools: &str,
    inventory: &[InventoryHost],
) -> Result<Vec<String>, ValidationError> {
    let mut prefixes: Vec<&str> = Vec::new();
    for prefix in split_tokens(pools) {
        if !prefixes.contains(&prefix) {
            prefixes.push(prefix);
        }
    }

    let mut hosts = Vec::new();
    for prefix in prefixes {
        let matched: Vec<String> = inventory
            .iter()
            .filter(|record| in_pool(&record.host, prefix))
            .map(|record| record.host.clone())
            .collect();
        if matched.is_empty() {
            return Err(ValidationError::new(format!(
                "pool \"{prefix}\" matched no hosts; use real pools which contain actual hosts"
            )));
        }
        for host in &matched {
            check_host_name(host)?;
        }
        hosts.extend(matched);
    }
    Ok(hosts)
}

fn in_pool(host: &str, prefix: &str) -> bool {
    host.strip_prefix(prefix)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|ch| ch.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(hosts: &[&str]) -> Vec<InventoryHost> {
        hosts
            .iter()
            .map(|host| InventoryHost {
                host: host.to_string(),
                pool: None,
            })
            .collect()
    }

    #[test]
    fn expands_zero_padded_range() {
        let hosts = expand_spec("web-001-003").expect("expand");
        assert_eq!(hosts, vec!["web-001", "web-002", "web-003"]);
    }

    #[test]
    fn keeps_literal_hosts_and_token_order() {
        let hosts = expand_spec("db.example.com, web-1-2  cache").expect("expand");
        assert_eq!(hosts, vec!["db.example.com", "web-1", "web-2", "cache"]);
    }

    #[test]
    fn substitutes_range_in_the_middle_of_a_token() {
        let hosts = expand_spec("node08-10.internal").expect("expand");
        assert_eq!(
            hosts,
            vec!["node08.internal", "node09.internal", "node10.internal"]
        );
    }

    #[test]
    fn rejects_two_ranges_in_one_token() {
        let err = expand_spec("a-1-2-b-3-4").unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn rejects_range_wider_than_padding() {
        let err = expand_spec("x-01-100").unwrap_err();
        assert!(err.to_string().contains("leading zeroes"));
    }

    #[test]
    fn rejects_descending_range() {
        let err = expand_spec("x-5-1").unwrap_err();
        assert!(err.to_string().contains("minimum is larger"));
    }

    #[test]
    fn non_ascii_digits_are_not_a_range() {
        let hosts = expand_spec("web-\u{0661}-\u{0662}").expect("expand");
        assert_eq!(hosts, vec!["web-\u{0661}-\u{0662}"]);
    }

    #[test]
    fn rejects_ranges_above_the_host_cap() {
        let err = expand_spec("h-0000000000-9999999999").unwrap_err();
        assert!(err.to_string().contains("more than 100000 hosts"));
        let hosts = expand_spec("h-000001-100000").expect("expand");
        assert_eq!(hosts.len(), 100_000);
    }

    #[test]
    fn rejects_hosts_that_look_like_options() {
        let err = expand_spec("web-1, -oProxyCommand=nc").unwrap_err();
        assert!(err.to_string().contains("must not start with '-'"));
        assert!(expand_spec("-1-3").is_err());
    }

    #[test]
    fn empty_spec_expands_to_nothing() {
        assert!(expand_spec(" , ").expect("expand").is_empty());
    }

    #[test]
    fn pool_matches_require_digit_after_prefix() {
        let records = inventory(&["web1", "web-2", "web3", "webby4", "db1"]);
        let hosts = match_pools("web", &records).expect("pools");
        assert_eq!(hosts, vec!["web1", "web3"]);
    }

    #[test]
    fn pools_are_grouped_in_prefix_order() {
        let records = inventory(&["web1", "db1", "web2", "db2"]);
        let hosts = match_pools("db, web db", &records).expect("pools");
        assert_eq!(hosts, vec!["db1", "db2", "web1", "web2"]);
    }

    #[test]
    fn pool_hosts_that_look_like_options_are_rejected() {
        let records = inventory(&["web1", "-web2"]);
        assert_eq!(match_pools("web", &records).expect("pools"), vec!["web1"]);
        let err = match_pools("-web", &records).unwrap_err();
        assert!(err.to_string().contains("must not start with '-'"));
    }

    #[test]
    fn unmatched_pool_is_rejected() {
        let records = inventory(&["db-1"]);
        let err = match_pools("web", &records).unwrap_err();
        assert!(err.to_string().contains("matched no hosts"));
    }
}

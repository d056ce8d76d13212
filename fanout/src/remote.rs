//! Orchestration for `fanout remote`: run one command on many hosts.
//!
//! The plan has a fixed shape: a root composite holding one `ssh` composite,
//! which carries the launch policy and holds one leaf per host. Everything that
//! can be wrong with the invocation (arguments, numbers, host spec, pools) is
//! rejected before the first connection is made.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::action::{CompositeAction, ExecContext, LeafAction};
use crate::core::command::render_command;
use crate::core::hosts::split_tokens;
use crate::core::report::PlanReport;
use crate::error::{UsageError, ValidationError};
use crate::hosts::expand;
use crate::io::config::{FanoutConfig, RunDefaults};
use crate::io::inventory::Inventory;
use crate::io::transport::Transport;
use crate::plan::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Arguments of one `fanout remote` invocation, as given on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteOptions {
    pub hosts: Option<String>,
    pub pools: Option<String>,
    pub limit: Option<usize>,
    pub throttle_secs: Option<f64>,
    pub timeout_secs: Option<f64>,
    pub deadline_secs: Option<f64>,
    pub show_output: bool,
    pub format: ReportFormat,
    /// Remote command as argv words.
    pub command: Vec<String>,
}

/// Launch policy and timeouts after defaults and validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSettings {
    pub limit: Option<usize>,
    pub throttle: Duration,
    /// Per-host command timeout.
    pub timeout: Option<Duration>,
    /// Bound on the whole fan-out.
    pub deadline: Option<Duration>,
}

impl RemoteOptions {
    /// Exactly one of `--hosts`/`--pools` and a command are required.
    pub fn check_usage(&self) -> Result<(), UsageError> {
        let has_hosts = given(self.hosts.as_deref());
        let has_pools = given(self.pools.as_deref());
        match (has_hosts, has_pools) {
            (false, false) => {
                return Err(UsageError("one of --hosts or --pools is required".to_string()));
            }
            (true, true) => {
                return Err(UsageError(
                    "--hosts and --pools cannot be used together".to_string(),
                ));
            }
            _ => {}
        }
        if self.command.is_empty() {
            return Err(UsageError(
                "a command is required after `--`".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge flags over config defaults and validate the numbers.
    pub fn settings(&self, defaults: &RunDefaults) -> Result<RunSettings, ValidationError> {
        let limit = self.limit.or(defaults.limit);
        if limit == Some(0) {
            return Err(ValidationError::new(
                "concurrency limit must be a positive integer",
            ));
        }
        let throttle = self
            .throttle_secs
            .or(defaults.throttle_secs)
            .map(|secs| seconds("throttle", secs))
            .transpose()?
            .unwrap_or(Duration::ZERO);
        let timeout = self
            .timeout_secs
            .or(defaults.timeout_secs)
            .map(|secs| positive_seconds("timeout", secs))
            .transpose()?;
        let deadline = self
            .deadline_secs
            .or(defaults.deadline_secs)
            .map(|secs| positive_seconds("deadline", secs))
            .transpose()?;
        Ok(RunSettings {
            limit,
            throttle,
            timeout,
            deadline,
        })
    }
}

fn given(value: Option<&str>) -> bool {
    value.is_some_and(|value| !split_tokens(value).is_empty())
}

fn seconds(name: &str, secs: f64) -> Result<Duration, ValidationError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ValidationError::new(format!(
            "{name} must be a non-negative number of seconds, got {secs}"
        ))
    })
}

fn positive_seconds(name: &str, secs: f64) -> Result<Duration, ValidationError> {
    let duration = seconds(name, secs)?;
    if duration.is_zero() {
        return Err(ValidationError::new(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(duration)
}

/// Build `plan -> ssh -> one leaf per host`.
pub fn build_plan(
    hosts: &[String],
    command: &str,
    settings: &RunSettings,
) -> Result<Plan, ValidationError> {
    if hosts.is_empty() {
        return Err(ValidationError::new("host list is empty"));
    }
    let mut ssh = CompositeAction::new("ssh").with_throttle(settings.throttle);
    if let Some(limit) = settings.limit {
        ssh = ssh.with_limit(limit)?;
    }
    if let Some(deadline) = settings.deadline {
        ssh = ssh.with_timeout(deadline)?;
    }
    for host in hosts {
        let mut leaf = LeafAction::new(host.clone(), host.clone(), command);
        if let Some(timeout) = settings.timeout {
            leaf = leaf.with_timeout(timeout);
        }
        ssh.add(leaf);
    }
    let mut root = CompositeAction::new("plan");
    root.add(ssh);
    Ok(Plan::new(root))
}

/// Resolve hosts, run the command everywhere and write the report to `out`.
///
/// Returns the report; per-host failures are data, not errors. Errors are
/// returned only for problems found before anything ran (or for an
/// unwritable `out`).
#[instrument(skip_all)]
pub fn run_remote(
    opts: &RemoteOptions,
    config: &FanoutConfig,
    transport: &dyn Transport,
    inventory: &dyn Inventory,
    out: &mut dyn Write,
) -> Result<PlanReport> {
    opts.check_usage()?;
    let settings = opts.settings(&config.defaults)?;
    let hosts = expand(
        opts.hosts.as_deref().unwrap_or_default(),
        opts.pools.as_deref().unwrap_or_default(),
        inventory,
    )?;
    let command = render_command(&opts.command);
    debug!(command = %command, ?settings, "remote command prepared");

    let mut plan = build_plan(&hosts, &command, &settings)?;
    info!(hosts = hosts.len(), "running remote command");
    let ctx = ExecContext {
        transport,
        output_limit_bytes: config.output_limit_bytes,
    };
    let report = plan.execute(&ctx);

    match opts.format {
        ReportFormat::Text => report
            .write_text(out, opts.show_output)
            .context("write report")?,
        ReportFormat::Json => {
            let json = report.to_json().context("serialize report")?;
            writeln!(out, "{json}").context("write report")?;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::exit_codes;
    use crate::test_support::{ScriptedTransport, StaticInventory, Step};

    fn opts(hosts: &str, command: &[&str]) -> RemoteOptions {
        RemoteOptions {
            hosts: Some(hosts.to_string()),
            command: command.iter().map(|word| (*word).to_string()).collect(),
            ..RemoteOptions::default()
        }
    }

    fn run(
        opts: &RemoteOptions,
        transport: &ScriptedTransport,
        inventory: &StaticInventory,
    ) -> (Result<PlanReport>, String) {
        let mut out = Vec::new();
        let result = run_remote(opts, &FanoutConfig::default(), transport, inventory, &mut out);
        (result, String::from_utf8(out).expect("utf8"))
    }

    #[test]
    fn requires_exactly_one_host_source() {
        let mut both = opts("web-1", &["uptime"]);
        both.pools = Some("db".to_string());
        assert!(both.check_usage().unwrap_err().0.contains("together"));

        let mut neither = opts(" ", &["uptime"]);
        neither.hosts = Some(" , ".to_string());
        assert!(neither.check_usage().unwrap_err().0.contains("required"));
    }

    #[test]
    fn requires_a_command() {
        let err = opts("web-1", &[]).check_usage().unwrap_err();
        assert!(err.to_string().starts_with("usage: "));
    }

    #[test]
    fn flags_override_config_defaults() {
        let defaults = RunDefaults {
            limit: Some(8),
            throttle_secs: Some(0.5),
            timeout_secs: Some(30.0),
            deadline_secs: None,
        };
        let mut opts = opts("web-1", &["uptime"]);
        opts.limit = Some(2);
        opts.deadline_secs = Some(60.0);

        let settings = opts.settings(&defaults).expect("settings");
        assert_eq!(
            settings,
            RunSettings {
                limit: Some(2),
                throttle: Duration::from_millis(500),
                timeout: Some(Duration::from_secs(30)),
                deadline: Some(Duration::from_secs(60)),
            }
        );
    }

    #[test]
    fn rejects_bad_numbers() {
        let defaults = RunDefaults::default();
        let mut bad = opts("web-1", &["uptime"]);
        bad.limit = Some(0);
        assert!(bad.settings(&defaults).is_err());

        let mut bad = opts("web-1", &["uptime"]);
        bad.throttle_secs = Some(-1.0);
        assert!(
            bad.settings(&defaults)
                .unwrap_err()
                .to_string()
                .contains("throttle")
        );

        let mut bad = opts("web-1", &["uptime"]);
        bad.timeout_secs = Some(0.0);
        assert!(
            bad.settings(&defaults)
                .unwrap_err()
                .to_string()
                .contains("greater than zero")
        );
    }

    #[test]
    fn plan_nests_one_leaf_per_host_under_ssh() {
        let hosts = vec!["web-1".to_string(), "web-2".to_string()];
        let settings = RunSettings {
            limit: Some(1),
            throttle: Duration::from_millis(10),
            timeout: Some(Duration::from_secs(5)),
            deadline: Some(Duration::from_secs(60)),
        };
        let plan = build_plan(&hosts, "uptime", &settings).expect("plan");

        let Action::Composite(root) = plan.root() else {
            panic!("root should be a composite");
        };
        let [Action::Composite(ssh)] = root.children() else {
            panic!("root should hold the ssh composite");
        };
        assert_eq!(ssh.label(), "ssh");
        assert_eq!(ssh.policy().limit.map(|limit| limit.get()), Some(1));
        assert_eq!(ssh.state().timeout, Some(Duration::from_secs(60)));
        let leaves = plan.root().leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[1].endpoint(), "web-2");
        assert_eq!(leaves[1].command(), "uptime");
        assert_eq!(leaves[1].state().timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn empty_host_list_is_rejected() {
        let err = build_plan(&[], "uptime", &RunSettings::default())
            .err()
            .expect("empty plan");
        assert_eq!(err.to_string(), "host list is empty");
    }

    #[test]
    fn failures_are_listed_and_banner_is_withheld() {
        let transport = ScriptedTransport::new()
            .with("web-2", Step::exit(5))
            .with("web-3", Step::unreachable());
        let inventory = StaticInventory::default();
        let (report, out) = run(&opts("web-1-3", &["uptime"]), &transport, &inventory);

        let report = report.expect("report");
        assert!(!report.complete);
        assert_eq!(report.results.len(), 3);
        assert_eq!(
            out,
            format!(
                "[web-2] Command failure (5).\n[web-3] Command failure ({}).\n",
                exit_codes::TRANSPORT_FAILURE
            )
        );
    }

    #[test]
    fn success_prints_the_banner_only() {
        let transport = ScriptedTransport::new();
        let inventory = StaticInventory::default();
        let (report, out) = run(&opts("web-1-2", &["uptime"]), &transport, &inventory);
        assert!(report.expect("report").complete);
        assert!(out.starts_with("COMPLETE Everything went according to plan"));
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn command_words_are_quoted_for_the_remote_shell() {
        let transport = ScriptedTransport::new();
        let inventory = StaticInventory::default();
        let (report, _) = run(
            &opts("web-1", &["echo", "a b", "it's"]),
            &transport,
            &inventory,
        );
        report.expect("report");
        assert_eq!(
            transport.requests()[0].command,
            "echo 'a b' 'it'\"'\"'s'"
        );
    }

    #[test]
    fn pools_resolve_through_the_inventory() {
        let transport = ScriptedTransport::new();
        let inventory = StaticInventory::new(&["db1", "web1", "web2"]);
        let opts = RemoteOptions {
            pools: Some("web".to_string()),
            command: vec!["uptime".to_string()],
            ..RemoteOptions::default()
        };
        let (report, _) = run(&opts, &transport, &inventory);
        let labels: Vec<_> = report
            .expect("report")
            .results
            .into_iter()
            .map(|result| result.label)
            .collect();
        assert_eq!(labels, vec!["web1", "web2"]);
    }

    #[test]
    fn invalid_spec_aborts_before_any_connection() {
        let transport = ScriptedTransport::new();
        let inventory = StaticInventory::default();
        let (report, out) = run(&opts("x-01-100", &["uptime"]), &transport, &inventory);
        assert!(report.unwrap_err().downcast_ref::<ValidationError>().is_some());
        assert!(transport.requests().is_empty());
        assert!(out.is_empty());
    }

    #[test]
    fn json_format_writes_machine_readable_report() {
        let transport = ScriptedTransport::new().with("web-1", Step::exit(2));
        let inventory = StaticInventory::default();
        let mut opts = opts("web-1", &["uptime"]);
        opts.format = ReportFormat::Json;
        let (report, out) = run(&opts, &transport, &inventory);
        report.expect("report");

        let json: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert_eq!(json["complete"], false);
        assert_eq!(json["results"][0]["label"], "web-1");
        assert_eq!(json["results"][0]["exit_code"], 2);
    }
}

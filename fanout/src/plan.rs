//! One invocation's action tree and its report.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::action::{Action, CompositeAction, ExecContext, LeafAction};
use crate::core::report::{LeafResult, PlanReport};

/// Root composite for one run.
#[derive(Debug, Clone)]
pub struct Plan {
    root: Action,
    started_wall: Option<DateTime<Utc>>,
}

impl Plan {
    pub fn new(root: CompositeAction) -> Self {
        Self {
            root: Action::Composite(root),
            started_wall: None,
        }
    }

    pub fn root(&self) -> &Action {
        &self.root
    }

    /// Run the whole tree to completion and summarize it.
    ///
    /// Individual failures never abort the run; they show up as failing
    /// results. Executing a plan a second time does not re-run anything and
    /// reports the first run again.
    #[instrument(skip_all, fields(plan = %self.root.label()))]
    pub fn execute(&mut self, ctx: &ExecContext<'_>) -> PlanReport {
        self.started_wall.get_or_insert_with(Utc::now);
        self.root.run(ctx, None);
        let report = self.report();
        info!(
            hosts = report.results.len(),
            failures = report.failures().count(),
            duration_ms = report.duration_ms,
            "plan finished"
        );
        report
    }

    /// Results in plan order. Leaves that never ran are left out.
    pub fn report(&self) -> PlanReport {
        let results = self
            .root
            .leaves()
            .into_iter()
            .filter_map(leaf_result)
            .collect();
        let started_at = self
            .started_wall
            .map(|start| start.to_rfc3339())
            .unwrap_or_default();
        PlanReport::new(started_at, self.duration_ms(), results)
    }

    fn duration_ms(&self) -> u64 {
        let state = match &self.root {
            Action::Composite(composite) => composite.state(),
            Action::Leaf(leaf) => leaf.state(),
        };
        state
            .elapsed()
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

fn leaf_result(leaf: &LeafAction) -> Option<LeafResult> {
    Some(LeafResult {
        label: leaf.label().to_string(),
        exit_code: leaf.exit_code()?,
        elapsed_ms: leaf
            .state()
            .elapsed()
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0),
        timed_out: leaf.timed_out(),
        stdout: leaf.stdout().to_string(),
        stderr: leaf.stderr().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, Step};

    fn ctx(transport: &ScriptedTransport) -> ExecContext<'_> {
        ExecContext {
            transport,
            output_limit_bytes: 1000,
        }
    }

    fn plan_for(hosts: &[&str]) -> Plan {
        let mut ssh = CompositeAction::new("ssh");
        for host in hosts {
            ssh.add(LeafAction::new(*host, *host, "uptime"));
        }
        let mut root = CompositeAction::new("plan");
        root.add(ssh);
        Plan::new(root)
    }

    fn scripted() -> ScriptedTransport {
        ScriptedTransport::new()
            .with("web-2", Step::exit(3))
            .with("web-2", Step::exit(3))
    }

    #[test]
    fn report_lists_every_leaf_in_plan_order() {
        let transport = scripted();
        let mut plan = plan_for(&["web-1", "web-2", "web-3"]);

        let report = plan.execute(&ctx(&transport));

        assert_eq!(
            report.outcome_summary(),
            vec![
                ("web-1".to_string(), true),
                ("web-2".to_string(), false),
                ("web-3".to_string(), true),
            ]
        );
        assert!(!report.complete);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.started_at.is_empty());
    }

    #[test]
    fn all_zero_exit_codes_make_the_plan_complete() {
        let transport = ScriptedTransport::new();
        let mut plan = plan_for(&["web-1", "web-2"]);
        assert!(plan.execute(&ctx(&transport)).complete);
        assert!(plan.root().succeeded());
    }

    #[test]
    fn identical_plans_aggregate_identically() {
        let first = plan_for(&["web-1", "web-2", "web-3"])
            .execute(&ctx(&scripted()))
            .outcome_summary();
        let second = plan_for(&["web-1", "web-2", "web-3"])
            .execute(&ctx(&scripted()))
            .outcome_summary();
        assert_eq!(first, second);
    }

    #[test]
    fn executing_twice_does_not_rerun_leaves() {
        let transport = ScriptedTransport::new();
        let mut plan = plan_for(&["web-1"]);
        let first = plan.execute(&ctx(&transport));
        let second = plan.execute(&ctx(&transport));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(first, second);
    }
}

//! Ordered group of child actions with its own launch policy.

use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use super::scheduler::{LaunchPolicy, run_bounded};
use super::{Action, ActionState, ExecContext};
use crate::error::ValidationError;

#[derive(Debug, Clone)]
pub struct CompositeAction {
    state: ActionState,
    policy: LaunchPolicy,
    children: Vec<Action>,
}

impl CompositeAction {
    /// Unbounded concurrency, no throttle, no timeout.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            state: ActionState::new(label.into()),
            policy: LaunchPolicy::default(),
            children: Vec::new(),
        }
    }

    /// Run at most `limit` children at once. Zero is rejected.
    pub fn with_limit(mut self, limit: usize) -> Result<Self, ValidationError> {
        self.policy = LaunchPolicy::new(Some(limit), self.policy.throttle)?;
        Ok(self)
    }

    /// Wait at least `throttle` between consecutive child launches.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.policy.throttle = throttle;
        self
    }

    /// Bound the whole subtree's wall time. Zero is rejected.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ValidationError> {
        if timeout.is_zero() {
            return Err(ValidationError::new("timeout must be greater than zero"));
        }
        self.state.timeout = Some(timeout);
        Ok(self)
    }

    pub fn add(&mut self, action: impl Into<Action>) {
        self.children.push(action.into());
    }

    pub fn label(&self) -> &str {
        &self.state.label
    }

    pub fn state(&self) -> &ActionState {
        &self.state
    }

    pub fn policy(&self) -> &LaunchPolicy {
        &self.policy
    }

    pub fn children(&self) -> &[Action] {
        &self.children
    }

    /// Run every child under this composite's policy and wait for all of them.
    ///
    /// A failing child never stops its siblings. When the timeout (or an
    /// enclosing `deadline`) elapses, running leaves are killed and children
    /// not yet launched are failed without running.
    #[instrument(skip_all, fields(label = %self.state.label))]
    pub(crate) fn run(&mut self, ctx: &ExecContext<'_>, deadline: Option<Instant>) {
        if self.state.started_at.is_some() {
            warn!("composite already ran, not running it again");
            return;
        }
        let started = Instant::now();
        self.state.started_at = Some(started);
        let own_deadline = self.state.timeout.map(|timeout| started + timeout);
        let deadline = match (deadline, own_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        info!(
            children = self.children.len(),
            limit = ?self.policy.limit,
            throttle_ms = self.policy.throttle.as_millis() as u64,
            "composite started"
        );
        run_bounded(
            &mut self.children,
            &self.policy,
            deadline,
            |child| child.run(ctx, deadline),
            |child| {
                warn!(child = child.label(), "deadline elapsed before launch");
                child.abandon();
            },
        );
        self.state.ended_at = Some(Instant::now());
        info!(
            elapsed_ms = self.state.elapsed().map(|e| e.as_millis() as u64),
            "composite finished"
        );
    }

    pub(crate) fn abandon(&mut self) {
        let now = Instant::now();
        self.state.started_at.get_or_insert(now);
        for child in &mut self.children {
            child.abandon();
        }
        self.state.ended_at.get_or_insert(now);
    }
}

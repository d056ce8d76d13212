//! The action tree: leaves run one command, composites run children.
//!
//! Nodes are plain data until run. Running happens in place (`&mut self`), so
//! every node's result lives in its own storage and concurrently running
//! siblings never alias each other.

mod composite;
mod leaf;
pub mod scheduler;

use std::time::{Duration, Instant};

pub use composite::CompositeAction;
pub use leaf::LeafAction;

use crate::io::transport::Transport;

/// Shared, read-only collaborators for one run.
#[derive(Clone, Copy)]
pub struct ExecContext<'a> {
    pub transport: &'a dyn Transport,
    pub output_limit_bytes: usize,
}

/// Attributes common to every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionState {
    pub label: String,
    pub timeout: Option<Duration>,
    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,
}

impl ActionState {
    fn new(label: String) -> Self {
        Self {
            label,
            timeout: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Leaf(LeafAction),
    Composite(CompositeAction),
}

impl Action {
    pub fn label(&self) -> &str {
        match self {
            Action::Leaf(leaf) => leaf.label(),
            Action::Composite(composite) => composite.label(),
        }
    }

    pub(crate) fn run(&mut self, ctx: &ExecContext<'_>, deadline: Option<Instant>) {
        match self {
            Action::Leaf(leaf) => leaf.run(ctx, deadline),
            Action::Composite(composite) => composite.run(ctx, deadline),
        }
    }

    pub(crate) fn abandon(&mut self) {
        match self {
            Action::Leaf(leaf) => leaf.abandon(),
            Action::Composite(composite) => composite.abandon(),
        }
    }

    /// Every leaf under this node, depth-first in child order.
    pub fn leaves(&self) -> Vec<&LeafAction> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    /// True when every leaf has run and exited 0.
    pub fn succeeded(&self) -> bool {
        self.leaves()
            .iter()
            .all(|leaf| leaf.exit_code() == Some(0))
    }
}

fn collect_leaves<'a>(action: &'a Action, out: &mut Vec<&'a LeafAction>) {
    match action {
        Action::Leaf(leaf) => out.push(leaf),
        Action::Composite(composite) => {
            for child in composite.children() {
                collect_leaves(child, out);
            }
        }
    }
}

impl From<LeafAction> for Action {
    fn from(leaf: LeafAction) -> Self {
        Action::Leaf(leaf)
    }
}

impl From<CompositeAction> for Action {
    fn from(composite: CompositeAction) -> Self {
        Action::Composite(composite)
    }
}

//! Run shell commands across many hosts over SSH, or drive one host
//! interactively through a piped-in agent.
//!
//! The architecture keeps decisions apart from side effects:
//!
//! - **[`core`]**: Pure logic (host spec expansion, command quoting, report
//!   aggregation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (processes, the `ssh` client,
//!   config, inventory, leases). Each sits behind a trait so tests can script it.
//! - **[`action`]**: The action tree and its bounded-concurrency scheduler.
//! - **[`agent`]**: Agent bootstrap and the line-JSON protocol spoken with it.
//!
//! Orchestration modules ([`remote`], [`interactive`], [`hosts`], [`plan`])
//! wire these together to implement CLI commands.

pub mod action;
pub mod agent;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod hosts;
pub mod interactive;
pub mod io;
pub mod logging;
pub mod plan;
pub mod remote;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

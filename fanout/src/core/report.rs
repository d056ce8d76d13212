//! Aggregated results for one plan run.
//!
//! Results are listed in plan order (the order leaves were added), never in
//! completion order, so identical plans produce identical reports.

use std::io::{self, Write};

use serde::Serialize;

/// Terminal state of one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeafResult {
    pub label: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    #[serde(skip)]
    pub stdout: String,
    #[serde(skip)]
    pub stderr: String,
}

impl LeafResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    /// RFC 3339 wall-clock time the plan started.
    pub started_at: String,
    pub duration_ms: u64,
    pub complete: bool,
    pub results: Vec<LeafResult>,
}

impl PlanReport {
    pub fn new(started_at: String, duration_ms: u64, results: Vec<LeafResult>) -> Self {
        // A run that targeted nothing is not a success.
        let complete = !results.is_empty() && results.iter().all(LeafResult::succeeded);
        Self {
            started_at,
            duration_ms,
            complete,
            results,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &LeafResult> {
        self.results.iter().filter(|result| !result.succeeded())
    }

    /// Pass/fail per label, in plan order.
    pub fn outcome_summary(&self) -> Vec<(String, bool)> {
        self.results
            .iter()
            .map(|result| (result.label.clone(), result.succeeded()))
            .collect()
    }

    /// Write the human-readable report: optional per-host output, one line per
    /// failing host, then the success banner if everything passed.
    pub fn write_text<W: Write + ?Sized>(&self, out: &mut W, show_output: bool) -> io::Result<()> {
        if show_output {
            for result in &self.results {
                write_prefixed(out, &result.label, &result.stdout)?;
                write_prefixed(out, &format!("{}:stderr", result.label), &result.stderr)?;
            }
        }

        if self.results.is_empty() {
            writeln!(out, "NO HOSTS 0 hosts were targeted; nothing ran.")?;
            return Ok(());
        }

        for failure in self.failures() {
            if failure.timed_out {
                writeln!(
                    out,
                    "[{}] Command failure ({}, timed out).",
                    failure.label, failure.exit_code
                )?;
            } else {
                writeln!(
                    out,
                    "[{}] Command failure ({}).",
                    failure.label, failure.exit_code
                )?;
            }
        }

        if self.complete {
            writeln!(
                out,
                "COMPLETE Everything went according to plan (in {}ms).",
                self.duration_ms
            )?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn write_prefixed<W: Write + ?Sized>(out: &mut W, label: &str, text: &str) -> io::Result<()> {
    for line in text.lines() {
        writeln!(out, "[{label}] {line}")?;
    }
    Ok(())
}

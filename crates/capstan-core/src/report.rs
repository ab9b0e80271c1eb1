//! Run outcomes and the aggregated run report.

use crate::ids::{InstanceId, RunId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terminal state of one job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// The job's run-condition evaluated false; it was never dispatched.
    Skipped,
    /// An upstream dependency did not succeed; the job was never dispatched.
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Whether the outcome counts toward the overall pipeline verdict.
    /// Skipped and cancelled jobs never ran, so they carry no verdict.
    pub fn is_counted(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Failure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
    /// Either the step's ref condition ruled it out, or an earlier step in
    /// the same job failed.
    Skipped,
}

/// A captured, already-redacted output line from a step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
    pub exit_code: Option<i32>,
    /// Output lines with all known secret values masked before storage.
    pub lines: Vec<OutputLine>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Record for a step that never ran.
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Skipped,
            exit_code: None,
            lines: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub outcome: Outcome,
    pub steps: Vec<StepRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Record for a job that reached a terminal state without running.
    pub fn undispatched(outcome: Outcome) -> Self {
        Self {
            outcome,
            steps: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Read-only aggregation of every instance's outcome for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline_name: String,
    pub jobs: BTreeMap<InstanceId, JobRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    /// Overall verdict: success iff every counted (non-skipped,
    /// non-cancelled) job succeeded.
    pub fn overall(&self) -> Outcome {
        let all_ok = self
            .jobs
            .values()
            .filter(|j| j.outcome.is_counted())
            .all(|j| j.outcome.is_success());
        if all_ok {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    /// Process-exit-code equivalent of the overall verdict.
    pub fn exit_code(&self) -> i32 {
        match self.overall() {
            Outcome::Success => 0,
            _ => 1,
        }
    }

    pub fn outcome_of(&self, id: &InstanceId) -> Option<Outcome> {
        self.jobs.get(id).map(|j| j.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report(outcomes: &[(&str, Outcome)]) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: RunId::new(),
            pipeline_name: "p".to_string(),
            jobs: outcomes
                .iter()
                .map(|(name, o)| {
                    (InstanceId::new(*name, vec![]), JobRecord::undispatched(*o))
                })
                .collect(),
            started_at: now,
            completed_at: now,
        }
    }

    #[test]
    fn all_success_is_success() {
        let r = report(&[("a", Outcome::Success), ("b", Outcome::Success)]);
        assert_eq!(r.overall(), Outcome::Success);
        assert_eq!(r.exit_code(), 0);
    }

    #[test]
    fn one_failure_fails_the_run() {
        let r = report(&[("a", Outcome::Success), ("b", Outcome::Failure)]);
        assert_eq!(r.overall(), Outcome::Failure);
        assert_eq!(r.exit_code(), 1);
    }

    #[test]
    fn skipped_and_cancelled_do_not_fail_the_run() {
        let r = report(&[
            ("a", Outcome::Success),
            ("b", Outcome::Skipped),
            ("c", Outcome::Cancelled),
        ]);
        assert_eq!(r.overall(), Outcome::Success);
    }

    #[test]
    fn report_serializes_with_string_keyed_jobs() {
        let r = report(&[("a", Outcome::Success)]);
        let json = serde_json::to_value(&r).unwrap();
        assert!(json["jobs"]["a"]["outcome"].is_string());
    }
}

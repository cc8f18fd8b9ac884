//! Result artifact of one gate invocation.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::gate::GateError;
use crate::model::StatusKind;

/// Per-resource gate state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Still waiting.
    Pending,
    /// Became operational.
    Satisfied,
    /// Deadline passed first.
    TimedOut,
    /// Gate was cancelled first.
    Cancelled,
}

/// Overall result of a gate invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    /// Every required resource became operational.
    Satisfied,
    /// At least one required resource timed out (fail closed).
    TimedOut,
    /// The caller aborted the gate.
    Cancelled,
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Satisfied => "satisfied",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
        })
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        // Rounded up: a non-zero wait never serializes as 0.
        let ms = d.as_nanos().div_ceil(1_000_000);
        s.serialize_u64(u64::try_from(ms).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Wait outcome for one required resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatingMetrics {
    name: String,
    initial_status: StatusKind,
    final_status: StatusKind,
    state: GateState,
    #[serde(rename = "gated_time_elapsed_ms", with = "duration_ms")]
    gated_time_elapsed: Duration,
    timed_out: bool,
    started_at_ms: i64,
    completed_at_ms: Option<i64>,
}

impl GatingMetrics {
    pub(crate) fn start(name: &str, status: StatusKind, started_at_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            initial_status: status,
            final_status: status,
            state: GateState::Pending,
            gated_time_elapsed: Duration::ZERO,
            timed_out: false,
            started_at_ms,
            completed_at_ms: None,
        }
    }

    pub(crate) fn observe(&mut self, status: StatusKind) {
        self.final_status = status;
    }

    pub(crate) fn finish(&mut self, state: GateState, elapsed: Duration, completed_at_ms: i64) {
        self.state = state;
        self.gated_time_elapsed = elapsed;
        self.timed_out = state == GateState::TimedOut;
        self.completed_at_ms = Some(completed_at_ms);
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Status at the first check.
    pub fn initial_status(&self) -> StatusKind {
        self.initial_status
    }

    /// Status at resolution, timeout or cancellation.
    pub fn final_status(&self) -> StatusKind {
        self.final_status
    }

    /// Terminal state.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Time spent blocked on this resource. Zero only when it was operational
    /// at the first check.
    pub fn gated_time_elapsed(&self) -> Duration {
        self.gated_time_elapsed
    }

    /// True when the deadline passed before the resource recovered.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Gate start, epoch millis.
    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    /// Resolution time, epoch millis.
    pub fn completed_at_ms(&self) -> Option<i64> {
        self.completed_at_ms
    }
}

/// Read-only accumulation of all per-resource metrics of one gate call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatingReport {
    gate_id: Ulid,
    outcome: GateOutcome,
    started_at_ms: i64,
    completed_at_ms: i64,
    metrics: BTreeMap<String, GatingMetrics>,
}

impl GatingReport {
    pub(crate) fn new(
        gate_id: Ulid,
        outcome: GateOutcome,
        started_at_ms: i64,
        completed_at_ms: i64,
        metrics: BTreeMap<String, GatingMetrics>,
    ) -> Self {
        Self {
            gate_id,
            outcome,
            started_at_ms,
            completed_at_ms,
            metrics,
        }
    }

    /// Unique id of this gate invocation.
    pub fn gate_id(&self) -> Ulid {
        self.gate_id
    }

    /// Overall result.
    pub fn outcome(&self) -> GateOutcome {
        self.outcome
    }

    /// True when every resource became operational.
    pub fn is_satisfied(&self) -> bool {
        self.outcome == GateOutcome::Satisfied
    }

    /// Gate start, epoch millis.
    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    /// Gate end, epoch millis.
    pub fn completed_at_ms(&self) -> i64 {
        self.completed_at_ms
    }

    /// Metrics keyed by resource name.
    pub fn gating_metrics_map(&self) -> &BTreeMap<String, GatingMetrics> {
        &self.metrics
    }

    /// Metrics for one resource, if it was required.
    pub fn metrics(&self, name: &str) -> Option<&GatingMetrics> {
        self.metrics.get(name)
    }

    fn names_in(&self, state: GateState) -> Vec<String> {
        self.metrics
            .values()
            .filter(|m| m.state == state)
            .map(|m| m.name.clone())
            .collect()
    }

    /// Converts the outcome into a `Result` for callers that fail the build.
    pub fn check(&self) -> Result<(), GateError> {
        match self.outcome {
            GateOutcome::Satisfied => Ok(()),
            GateOutcome::TimedOut => Err(GateError::TimedOut {
                resources: self.names_in(GateState::TimedOut),
            }),
            GateOutcome::Cancelled => Err(GateError::Cancelled {
                pending: self.names_in(GateState::Cancelled),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(name: &str, state: GateState, elapsed_ms: u64) -> GatingMetrics {
        let mut m = GatingMetrics::start(name, StatusKind::MajorOutage, 1_000);
        m.observe(StatusKind::Operational);
        m.finish(state, Duration::from_millis(elapsed_ms), 2_000);
        m
    }

    #[test]
    fn finish_marks_timeouts() {
        let m = metrics("brew", GateState::TimedOut, 500);
        assert!(m.timed_out());
        assert_eq!(m.initial_status(), StatusKind::MajorOutage);
        assert_eq!(m.final_status(), StatusKind::Operational);
        assert_eq!(m.completed_at_ms(), Some(2_000));

        let m = metrics("brew", GateState::Satisfied, 500);
        assert!(!m.timed_out());
    }

    #[test]
    fn check_names_failed_resources() {
        let mut map = BTreeMap::new();
        map.insert("brew".into(), metrics("brew", GateState::Satisfied, 0));
        map.insert("umb".into(), metrics("umb", GateState::TimedOut, 30_000));
        let report = GatingReport::new(Ulid::new(), GateOutcome::TimedOut, 0, 1, map);

        match report.check() {
            Err(GateError::TimedOut { resources }) => assert_eq!(resources, vec!["umb"]),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!report.is_satisfied());
    }

    #[test]
    fn report_serializes_elapsed_as_millis() {
        let mut map = BTreeMap::new();
        map.insert("brew".into(), metrics("brew", GateState::Satisfied, 1_500));
        let report = GatingReport::new(Ulid::new(), GateOutcome::Satisfied, 0, 1, map);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "satisfied");
        assert_eq!(json["metrics"]["brew"]["gated_time_elapsed_ms"], 1_500);
        assert_eq!(json["metrics"]["brew"]["final_status"], "OPERATIONAL");

        let back: GatingReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}

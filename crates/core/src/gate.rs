//! The gating wait loop.
//!
//! Each cycle reads the registry once for every still-pending resource, then
//! waits for the poll interval, the deadline or cancellation, whichever comes
//! first. Cancellation wakes the wait immediately.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GateOptions;
use crate::registry::ResourceRegistry;
use crate::report::{GateOutcome, GateState, GatingMetrics, GatingReport};
use crate::util::{new_ulid, now_ms};

/// Failed gate, derived from a [`GatingReport`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// `max_wait` elapsed with these resources still not operational.
    #[error("gate timed out waiting for: {}", resources.join(", "))]
    TimedOut {
        /// Resources that timed out.
        resources: Vec<String>,
    },
    /// The gate was cancelled.
    #[error("gate cancelled while waiting for: {}", pending.join(", "))]
    Cancelled {
        /// Resources still pending at cancellation.
        pending: Vec<String>,
    },
}

/// Smallest gated time recorded for a resource not operational at the first
/// check.
const MIN_BLOCKED_TIME: Duration = Duration::from_millis(1);

/// Destination for human-readable progress lines (the caller's build log).
pub trait GateLog: Send + Sync {
    /// Writes one line.
    fn line(&self, line: &str);
}

/// Writes progress lines as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl GateLog for TracingLog {
    fn line(&self, line: &str) {
        info!("{line}");
    }
}

/// Collects progress lines in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl GateLog for MemoryLog {
    fn line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/// Blocks callers until their required resources are operational.
///
/// Cheap to clone; concurrent gates share the registry read-only.
#[derive(Clone)]
pub struct GatingEngine {
    registry: Arc<ResourceRegistry>,
}

impl GatingEngine {
    /// Engine reading from `registry`.
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    /// The registry gates are evaluated against.
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Waits until every name in `required` is operational, `options.max_wait`
    /// elapses, or `cancel` fires.
    ///
    /// Always returns a report; use [`GatingReport::check`] to turn a timeout
    /// or cancellation into an error. Duplicate names are gated once.
    pub async fn gate<I, S>(
        &self,
        required: I,
        options: &GateOptions,
        cancel: &CancellationToken,
        log: &dyn GateLog,
    ) -> GatingReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let gate_id = new_ulid();
        let started = Instant::now();
        let started_at_ms = now_ms();
        let poll_interval = options.effective_poll_interval();
        // An unrepresentable deadline is as good as none.
        let deadline = options.max_wait.and_then(|w| started.checked_add(w));

        let mut pending: Vec<String> = Vec::new();
        for name in required {
            let name = name.as_ref();
            if !pending.iter().any(|p| p == name) {
                pending.push(name.to_string());
            }
        }

        info!(
            %gate_id,
            resources = ?pending,
            max_wait_secs = options.max_wait.map(|w| w.as_secs()),
            "gate started"
        );
        if !pending.is_empty() {
            log.line(&format!("Gating on resources: {}", pending.join(", ")));
        }

        let mut metrics: BTreeMap<String, GatingMetrics> = BTreeMap::new();
        let mut first_cycle = true;

        let outcome = loop {
            let statuses = self.registry.get_resources(&pending);
            let now = Instant::now();
            let elapsed = now.duration_since(started);

            pending.retain(|name| {
                let status = statuses.get(name).map(|r| r.status).unwrap_or_default();
                let m = metrics
                    .entry(name.clone())
                    .or_insert_with(|| GatingMetrics::start(name, status, started_at_ms));
                m.observe(status);

                if status.is_operational() {
                    let waited = if first_cycle {
                        Duration::ZERO
                    } else {
                        elapsed.max(MIN_BLOCKED_TIME)
                    };
                    m.finish(GateState::Satisfied, waited, now_ms());
                    debug!(%gate_id, resource = %name, waited_ms = waited.as_millis() as u64, "resource satisfied");
                    log.line(&format!("Resource {name} status is {status}"));
                    false
                } else {
                    log.line(&format!(
                        "Resource {name} status is {status}, waiting ({}s elapsed)",
                        elapsed.as_secs()
                    ));
                    true
                }
            });
            first_cycle = false;

            if pending.is_empty() {
                break GateOutcome::Satisfied;
            }
            if cancel.is_cancelled() {
                break GateOutcome::Cancelled;
            }

            let next_poll = now.checked_add(poll_interval);
            let wake = match (deadline, next_poll) {
                (Some(d), _) if now >= d => break GateOutcome::TimedOut,
                (Some(d), Some(p)) => Some(p.min(d)),
                (Some(d), None) => Some(d),
                (None, p) => p,
            };

            match wake {
                Some(wake) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sleep_until(wake) => {}
                    }
                }
                None => cancel.cancelled().await,
            }
        };

        let elapsed = started.elapsed();
        let blocked = elapsed.max(MIN_BLOCKED_TIME);
        let completed_at_ms = now_ms();
        for name in &pending {
            let Some(m) = metrics.get_mut(name) else {
                continue;
            };
            let status = m.final_status();
            match outcome {
                GateOutcome::TimedOut => {
                    m.finish(GateState::TimedOut, blocked, completed_at_ms);
                    log.line(&format!(
                        "Resource {name} did not become operational within {}s, last status {status}",
                        elapsed.as_secs()
                    ));
                }
                GateOutcome::Cancelled => {
                    m.finish(GateState::Cancelled, blocked, completed_at_ms);
                    log.line(&format!(
                        "Gating cancelled, resource {name} last status {status}"
                    ));
                }
                GateOutcome::Satisfied => {}
            }
        }

        match outcome {
            GateOutcome::Satisfied => {
                info!(%gate_id, elapsed_ms = elapsed.as_millis() as u64, "gate satisfied")
            }
            _ => warn!(%gate_id, %outcome, pending = ?pending, "gate failed"),
        }

        GatingReport::new(gate_id, outcome, started_at_ms, completed_at_ms, metrics)
    }
}

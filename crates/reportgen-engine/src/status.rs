//! Status registry: one watch channel per report run.
//!
//! Writers are the run's own task; readers poll with [`StatusRegistry::get`]
//! or await the terminal state with [`StatusRegistry::wait`].
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reportgen_core::{ArtifactRef, ReportError, ReportId, Result};
use reportgen_delivery::DeliveryOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::state::ReportState;

/// Identifier handed back by `generate`, used for polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportHandle {
    pub id: ReportId,
}

impl fmt::Display for ReportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: ReportState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStatus {
    pub id: ReportId,
    pub state: ReportState,
    pub error: Option<ReportError>,
    pub artifact: Option<ArtifactRef>,
    /// Present only when the request declared a sink.
    pub delivery: Option<DeliveryOutcome>,
    pub warnings: Vec<String>,
    pub history: Vec<StateChange>,
}

impl ReportStatus {
    fn received(id: ReportId) -> Self {
        Self {
            id,
            state: ReportState::Received,
            error: None,
            artifact: None,
            delivery: None,
            warnings: Vec::new(),
            history: vec![StateChange {
                state: ReportState::Received,
                at: Utc::now(),
            }],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Time of the terminal state change, if the run has finished.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        if !self.is_terminal() {
            return None;
        }
        self.history.last().map(|c| c.at)
    }

    /// Whether the run ever entered `state`.
    pub fn visited(&self, state: ReportState) -> bool {
        self.history.iter().any(|c| c.state == state)
    }
}

#[derive(Default)]
pub struct StatusRegistry {
    runs: DashMap<ReportId, watch::Sender<ReportStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ReportId) {
        let (tx, _rx) = watch::channel(ReportStatus::received(id));
        self.runs.insert(id, tx);
    }

    pub fn get(&self, id: &ReportId) -> Result<ReportStatus> {
        self.runs
            .get(id)
            .map(|tx| tx.borrow().clone())
            .ok_or_else(|| unknown(id))
    }

    /// Resolve once the run reaches `Completed` or `Failed`.
    pub async fn wait(&self, id: &ReportId) -> Result<ReportStatus> {
        let mut rx = self
            .runs
            .get(id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| unknown(id))?;
        let status = rx
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| ReportError::config(format!("report {} was dropped", id)))?;
        Ok(status.clone())
    }

    /// Apply a guarded state change. An illegal move is logged and ignored;
    /// returns whether the state changed.
    pub fn transition(&self, id: &ReportId, next: ReportState) -> bool {
        self.update(id, |status| {
            if !status.state.can_transition_to(next) {
                warn!(
                    report_id = %id,
                    from = %status.state,
                    to = %next,
                    "illegal state transition ignored"
                );
                return false;
            }
            debug!(report_id = %id, from = %status.state, to = %next, "state transition");
            status.state = next;
            status.history.push(StateChange {
                state: next,
                at: Utc::now(),
            });
            true
        })
    }

    /// Move to `Failed` carrying `error`.
    pub fn fail(&self, id: &ReportId, error: ReportError) -> bool {
        self.update(id, |status| {
            if !status.state.can_transition_to(ReportState::Failed) {
                warn!(report_id = %id, state = %status.state, error = %error, "failure after terminal state ignored");
                return false;
            }
            status.state = ReportState::Failed;
            status.error = Some(error);
            status.history.push(StateChange {
                state: ReportState::Failed,
                at: Utc::now(),
            });
            true
        })
    }

    pub fn set_artifact(&self, id: &ReportId, artifact: ArtifactRef) {
        self.update(id, |status| status.artifact = Some(artifact));
    }

    pub fn set_delivery(&self, id: &ReportId, outcome: DeliveryOutcome) {
        self.update(id, |status| status.delivery = Some(outcome));
    }

    pub fn add_warnings(&self, id: &ReportId, warnings: impl IntoIterator<Item = String>) {
        self.update(id, |status| status.warnings.extend(warnings));
    }

    /// Remove a finished run and return its last status. Active runs stay.
    pub fn forget(&self, id: &ReportId) -> Option<ReportStatus> {
        self.runs
            .remove_if(id, |_, tx| tx.borrow().is_terminal())
            .map(|(_, tx)| tx.borrow().clone())
    }

    /// Remove every run that finished at least `older_than` ago.
    pub fn evict_finished(&self, older_than: Duration) -> Vec<ReportStatus> {
        let Ok(window) = chrono::Duration::from_std(older_than) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - window;
        let expired: Vec<ReportId> = self
            .runs
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .borrow()
                    .finished_at()
                    .is_some_and(|at| at <= cutoff)
            })
            .map(|entry| *entry.key())
            .collect();
        expired.iter().filter_map(|id| self.forget(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn update<R: Default>(&self, id: &ReportId, f: impl FnOnce(&mut ReportStatus) -> R) -> R {
        let Some(tx) = self.runs.get(id) else {
            warn!(report_id = %id, "update for unregistered report");
            return R::default();
        };
        let mut out = None;
        tx.send_modify(|status| out = Some(f(status)));
        out.unwrap_or_default()
    }
}

fn unknown(id: &ReportId) -> ReportError {
    ReportError::config(format!("unknown report id {}", id))
}

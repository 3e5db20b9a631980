//! Hooks for watching a run as it progresses.

use super::machine::PipelineState;
use super::run::RunStatus;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Receives state entries and reasoning lines as they happen.
pub trait RunObserver: Send + Sync {
    fn on_state(&self, _run_id: Uuid, _state: PipelineState) {}

    fn on_reasoning(&self, _run_id: Uuid, _state: PipelineState, _entry: &str) {}

    fn on_finished(&self, _run_id: Uuid, _status: RunStatus) {}
}

/// Emits everything through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_state(&self, run_id: Uuid, state: PipelineState) {
        tracing::debug!(%run_id, state = state.as_str(), "Entering state");
    }

    fn on_reasoning(&self, run_id: Uuid, state: PipelineState, entry: &str) {
        tracing::info!(%run_id, state = state.as_str(), "{entry}");
    }

    fn on_finished(&self, run_id: Uuid, status: RunStatus) {
        tracing::info!(%run_id, %status, "Run finished");
    }
}

/// Collects reasoning lines in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    entries: Mutex<Vec<(PipelineState, String)>>,
}

impl RecordingObserver {
    pub fn entries(&self) -> Vec<(PipelineState, String)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RunObserver for RecordingObserver {
    fn on_reasoning(&self, _run_id: Uuid, state: PipelineState, entry: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((state, entry.to_owned()));
    }
}

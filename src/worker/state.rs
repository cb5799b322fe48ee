//! Model lifecycle state machine.
//!
//! ```text
//! Uninitialized ──init──▶ Loading ──ok──▶ Ready
//!                            │
//!                          fails
//!                            ▼
//!                      Failed(reason) ──init──▶ Loading
//! ```
//!
//! `init` while Loading or Ready is a no-op, which makes model acquisition
//! single-flight.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

impl WorkerState {
    /// Apply an `init` request. Returns `true` when a new load must start.
    pub fn begin_init(&mut self) -> bool {
        match self {
            WorkerState::Uninitialized | WorkerState::Failed(_) => {
                *self = WorkerState::Loading;
                true
            }
            WorkerState::Loading | WorkerState::Ready => false,
        }
    }

    /// Record a successful load. Ignored unless a load was in flight.
    pub fn finish_load(&mut self) -> bool {
        if matches!(self, WorkerState::Loading) {
            *self = WorkerState::Ready;
            true
        } else {
            false
        }
    }

    /// Record a failed load. Ignored unless a load was in flight.
    pub fn fail_load(&mut self, reason: impl Into<String>) -> bool {
        if matches!(self, WorkerState::Loading) {
            *self = WorkerState::Failed(reason.into());
            true
        } else {
            false
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, WorkerState::Ready)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, WorkerState::Loading)
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            WorkerState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Short label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            WorkerState::Uninitialized => "idle",
            WorkerState::Loading => "loading",
            WorkerState::Ready => "ready",
            WorkerState::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_from_uninitialized_starts_load() {
        let mut state = WorkerState::default();
        assert!(state.begin_init());
        assert_eq!(state, WorkerState::Loading);
    }

    #[test]
    fn test_init_is_single_flight() {
        let mut state = WorkerState::Loading;
        assert!(!state.begin_init());
        assert_eq!(state, WorkerState::Loading);

        let mut ready = WorkerState::Ready;
        assert!(!ready.begin_init());
        assert!(ready.is_ready());
    }

    #[test]
    fn test_failed_load_can_be_retried() {
        let mut state = WorkerState::Uninitialized;
        state.begin_init();
        assert!(state.fail_load("network down"));
        assert_eq!(state.failure(), Some("network down"));
        assert_eq!(state.label(), "failed");

        assert!(state.begin_init());
        assert!(state.is_loading());
        assert!(state.finish_load());
        assert!(state.is_ready());
    }

    #[test]
    fn test_load_outcomes_ignored_outside_loading() {
        let mut state = WorkerState::Uninitialized;
        assert!(!state.finish_load());
        assert!(!state.fail_load("late"));
        assert_eq!(state, WorkerState::Uninitialized);

        let mut ready = WorkerState::Ready;
        assert!(!ready.fail_load("late"));
        assert!(ready.is_ready());
    }
}

// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe access
// using Arc<RwLock<T>> and emits change events for front-end updates.

use crate::models::{AppState, BuildStep};
use camino::Utf8PathBuf;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Kinds of long-running operation guarded by the state manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Build,
    Sanitize,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Build => f.write_str("build"),
            OperationKind::Sanitize => f.write_str("sanitize batch"),
        }
    }
}

/// A second operation of the same kind was requested while one is in flight.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("A {0} is already running")]
pub struct OperationInProgress(pub OperationKind);

/// Change events emitted when state is modified
///
/// These events are emitted to notify interested parties (primarily the front end)
/// about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A build run has started
    BuildStarted {
        total_steps: usize,
    },

    /// A build step has started
    StepStarted {
        index: usize,
        total: usize,
        step: Option<BuildStep>,
    },

    /// Build progress has moved
    ProgressUpdated {
        percent: f32,
    },

    /// A build run has finished
    BuildFinished {
        success: bool,
        dist_dir: Option<Utf8PathBuf>,
    },

    /// A sanitize batch has started
    SanitizeStarted {
        total_files: usize,
    },

    /// One file of the sanitize batch has been processed
    FileSanitized {
        path: Utf8PathBuf,
        success: bool,
    },

    /// A sanitize batch has finished
    SanitizeFinished {
        succeeded: usize,
        failed: usize,
    },

    /// Current operation has changed
    OperationChanged {
        operation: String,
    },
}

/// Thread-safe state manager with event emission
///
/// This is the central state management component that:
/// - Provides thread-safe access to [`AppState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Rejects a second build or sanitize batch while one is in flight
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// # Related Types
///
/// - [`crate::models::AppState`]: The underlying state structure
/// - [`StateChange`]: Event types emitted on state mutations
/// - [`crate::ui::controller::Controller`]: Drives the state from worker events
pub struct StateManager {
    state: Arc<RwLock<AppState>>,

    /// Multiple subscribers can listen for state changes
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    /// Get a cloned snapshot of the current state
    pub fn snapshot(&self) -> AppState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let busy = state_manager.read(|state| state.is_busy());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = self.detect_changes(&old_state, &state);
        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Like [`update`](Self::update), but the closure may refuse the change.
    ///
    /// The check and the mutation happen under one write lock. On `Err` the
    /// closure must leave the state untouched.
    pub fn try_update<F, E>(&self, update_fn: F) -> Result<Vec<StateChange>, E>
    where
        F: FnOnce(&mut AppState) -> Result<(), E>,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old_state = state.clone();

        update_fn(&mut state)?;

        let changes = self.detect_changes(&old_state, &state);
        for change in &changes {
            let _ = self.state_tx.send(change.clone());
        }

        Ok(changes)
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(&self, old: &AppState, new: &AppState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.is_building != new.is_building {
            if new.is_building {
                changes.push(StateChange::BuildStarted {
                    total_steps: new.total_steps,
                });
            } else {
                changes.push(StateChange::BuildFinished {
                    success: new.last_build_succeeded.unwrap_or(false),
                    dist_dir: new.dist_dir.clone(),
                });
            }
        }

        if new.current_step > 0
            && (old.current_step != new.current_step || old.current_mode != new.current_mode)
        {
            changes.push(StateChange::StepStarted {
                index: new.current_step,
                total: new.total_steps,
                step: new.current_mode,
            });
        }

        if old.build_progress != new.build_progress {
            changes.push(StateChange::ProgressUpdated {
                percent: new.build_progress,
            });
        }

        if old.is_sanitizing != new.is_sanitizing {
            if new.is_sanitizing {
                changes.push(StateChange::SanitizeStarted {
                    total_files: new.sanitize_total,
                });
            } else {
                changes.push(StateChange::SanitizeFinished {
                    succeeded: new.sanitized_files.len(),
                    failed: new.failed_files.len(),
                });
            }
        }

        if old.current_operation != new.current_operation {
            changes.push(StateChange::OperationChanged {
                operation: new.current_operation.clone(),
            });
        }

        changes
    }

    // Convenience methods for common state updates

    /// Mark a build as running.
    ///
    /// # Errors
    /// [`OperationInProgress`] if a build is already running; nothing changes.
    pub fn try_start_build(&self, total_steps: usize) -> Result<Vec<StateChange>, OperationInProgress> {
        self.try_update(|state| {
            if state.is_building {
                return Err(OperationInProgress(OperationKind::Build));
            }
            state.reset_build_state();
            state.is_building = true;
            state.total_steps = total_steps;
            state.current_operation = "Cleaning previous build artifacts...".to_string();
            Ok(())
        })
    }

    /// Record that step `index` of `total` has started
    pub fn start_build_step(&self, index: usize, total: usize, step: BuildStep) -> Vec<StateChange> {
        self.update(|state| {
            state.current_step = index;
            state.total_steps = total;
            state.current_mode = Some(step);
            state.current_operation = format!("Step {}/{}: {}", index, total, step);
        })
    }

    /// Raise build progress; lower values are ignored
    pub fn set_build_progress(&self, percent: f32) -> Vec<StateChange> {
        self.update(|state| state.raise_progress(percent))
    }

    pub fn finish_build(&self, success: bool, dist_dir: Option<Utf8PathBuf>) -> Vec<StateChange> {
        self.update(|state| {
            state.is_building = false;
            state.last_build_succeeded = Some(success);
            state.dist_dir = dist_dir;
            state.current_mode = None;
            state.current_operation = if success {
                "Build finished".to_string()
            } else {
                "Build failed".to_string()
            };
        })
    }

    /// Mark a sanitize batch of `total_files` as running.
    ///
    /// # Errors
    /// [`OperationInProgress`] if a batch is already running; nothing changes.
    pub fn try_start_sanitize(&self, total_files: usize) -> Result<Vec<StateChange>, OperationInProgress> {
        self.try_update(|state| {
            if state.is_sanitizing {
                return Err(OperationInProgress(OperationKind::Sanitize));
            }
            state.reset_sanitize_state();
            state.is_sanitizing = true;
            state.sanitize_total = total_files;
            Ok(())
        })
    }

    /// Record the result of sanitizing one file
    pub fn add_file_result(
        &self,
        path: Utf8PathBuf,
        success: bool,
        comments_removed: usize,
        blank_lines_removed: usize,
    ) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.add_file_result(path.clone(), success);
            state.total_comments_removed += comments_removed;
            state.total_blank_lines_removed += blank_lines_removed;
        });

        let file_event = StateChange::FileSanitized { path, success };
        let _ = self.state_tx.send(file_event.clone());
        changes.push(file_event);

        changes
    }

    pub fn finish_sanitize(&self) -> Vec<StateChange> {
        self.update(|state| state.is_sanitizing = false)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across threads
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_manager() {
        let manager = StateManager::new();
        let state = manager.snapshot();

        assert!(!state.is_building);
        assert!(!state.is_sanitizing);
        assert_eq!(state.build_progress, 0.0);
    }

    #[test]
    fn test_start_build_emits_events() {
        let manager = StateManager::new();

        let changes = manager.try_start_build(2).unwrap();

        assert!(matches!(changes[0], StateChange::BuildStarted { total_steps: 2 }));
        assert!(matches!(changes[1], StateChange::OperationChanged { .. }));
        assert!(manager.read(|s| s.is_building));
    }

    #[test]
    fn test_second_build_rejected() {
        let manager = StateManager::new();
        manager.try_start_build(1).unwrap();
        manager.set_build_progress(12.5);

        let err = manager.try_start_build(2).unwrap_err();
        assert_eq!(err, OperationInProgress(OperationKind::Build));
        assert_eq!(err.to_string(), "A build is already running");

        let state = manager.snapshot();
        assert_eq!(state.total_steps, 1);
        assert_eq!(state.build_progress, 12.5);
    }

    #[test]
    fn test_build_and_sanitize_may_overlap() {
        let manager = StateManager::new();
        manager.try_start_build(1).unwrap();
        assert!(manager.try_start_sanitize(3).is_ok());
        assert_eq!(
            manager.try_start_sanitize(1).unwrap_err(),
            OperationInProgress(OperationKind::Sanitize)
        );
    }

    #[test]
    fn test_build_can_restart_after_finish() {
        let manager = StateManager::new();
        manager.try_start_build(1).unwrap();
        manager.finish_build(false, None);
        assert!(manager.try_start_build(1).is_ok());
    }

    #[test]
    fn test_step_and_progress_events() {
        let manager = StateManager::new();
        manager.try_start_build(2).unwrap();

        let changes = manager.start_build_step(1, 2, BuildStep::OneDir);
        assert_eq!(
            changes[0],
            StateChange::StepStarted {
                index: 1,
                total: 2,
                step: Some(BuildStep::OneDir)
            }
        );

        let changes = manager.set_build_progress(0.1);
        assert_eq!(changes, vec![StateChange::ProgressUpdated { percent: 0.1 }]);

        // Lower values never move progress backwards
        assert!(manager.set_build_progress(0.05).is_empty());
    }

    #[test]
    fn test_finish_build() {
        let manager = StateManager::new();
        manager.try_start_build(1).unwrap();

        let changes = manager.finish_build(true, Some("/proj/dist".into()));
        assert!(changes.contains(&StateChange::BuildFinished {
            success: true,
            dist_dir: Some("/proj/dist".into())
        }));

        let state = manager.snapshot();
        assert!(!state.is_building);
        assert_eq!(state.last_build_succeeded, Some(true));
    }

    #[test]
    fn test_sanitize_lifecycle() {
        let manager = StateManager::new();
        manager.try_start_sanitize(2).unwrap();

        let changes = manager.add_file_result("a.py".into(), true, 3, 1);
        assert!(changes.iter().any(|c| matches!(c, StateChange::FileSanitized { success: true, .. })));
        manager.add_file_result("b.py".into(), false, 0, 0);

        let changes = manager.finish_sanitize();
        assert_eq!(changes, vec![StateChange::SanitizeFinished { succeeded: 1, failed: 1 }]);

        let state = manager.snapshot();
        assert_eq!(state.total_comments_removed, 3);
        assert_eq!(state.sanitized_files.len(), 1);
        assert_eq!(state.failed_files.len(), 1);
    }

    #[test]
    fn test_subscribe_to_changes() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager.try_start_sanitize(4).unwrap();

        let event = rx.try_recv();
        assert!(matches!(event, Ok(StateChange::SanitizeStarted { total_files: 4 })));
    }

    #[test]
    fn test_clone_shares_state() {
        let manager1 = StateManager::new();
        let manager2 = manager1.clone();

        manager1.set_build_progress(10.0);

        assert_eq!(manager2.snapshot().build_progress, 10.0);
    }
}

use crate::models::BuildStep;
use camino::Utf8PathBuf;

/// Single source of truth for runtime state shared with the front end.
///
/// Wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`]; never
/// mutate it directly, use [`StateManager::update`](crate::state::StateManager::update).
#[derive(Clone, Debug, Default)]
pub struct AppState {
    // Build runtime state
    pub is_building: bool,
    pub current_step: usize,
    pub total_steps: usize,
    pub current_mode: Option<BuildStep>,
    pub current_operation: String,

    // Liveness indicator, 0.0..=100.0
    pub build_progress: f32,

    // Build results
    pub last_build_succeeded: Option<bool>,
    pub dist_dir: Option<Utf8PathBuf>,

    // Sanitize runtime state
    pub is_sanitizing: bool,
    pub sanitize_total: usize,
    pub sanitized_files: Vec<Utf8PathBuf>,
    pub failed_files: Vec<Utf8PathBuf>,

    // Aggregate sanitize statistics
    pub total_comments_removed: usize,
    pub total_blank_lines_removed: usize,
}

impl AppState {
    pub fn is_busy(&self) -> bool {
        self.is_building || self.is_sanitizing
    }

    /// Reset all build-related state to initial values.
    pub fn reset_build_state(&mut self) {
        self.is_building = false;
        self.current_step = 0;
        self.total_steps = 0;
        self.current_mode = None;
        self.current_operation.clear();
        self.build_progress = 0.0;
        self.last_build_succeeded = None;
        self.dist_dir = None;
    }

    /// Reset all sanitize-related state to initial values.
    pub fn reset_sanitize_state(&mut self) {
        self.is_sanitizing = false;
        self.sanitize_total = 0;
        self.sanitized_files.clear();
        self.failed_files.clear();
        self.total_comments_removed = 0;
        self.total_blank_lines_removed = 0;
    }

    /// Record the outcome of one sanitize job.
    pub fn add_file_result(&mut self, path: Utf8PathBuf, success: bool) {
        if success {
            self.sanitized_files.push(path);
        } else {
            self.failed_files.push(path);
        }
    }

    /// Raise build progress. Never lowers it.
    pub fn raise_progress(&mut self, percent: f32) {
        if percent > self.build_progress {
            self.build_progress = percent.min(100.0);
        }
    }
}

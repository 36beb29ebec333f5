//! Data models for pypack.
//!
//! - [`BuildConfig`]: one packaging request (script, name, icon policy, resources, mode)
//! - [`BuildMode`] / [`BuildStep`]: requested mode and the concrete bundler invocations it expands to
//! - [`SanitizeJob`]: one comment-stripping request and its `_clean` output path
//! - [`AppState`]: runtime state shared with the front end through [`StateManager`](crate::state::StateManager)
//! - [`UserConfig`]: persisted settings loaded from `pypack.yaml`
//!
//! Requests are owned by the caller and only borrowed by the services for
//! the duration of one operation.

pub mod app_state;
pub mod build;
pub mod config;
pub mod sanitize;

pub use app_state::AppState;
pub use build::{
    BuildConfig, BuildMode, BuildStep, ConfigError, IconPolicy, ResourceKind, ResourceMapping,
};
pub use config::{DEFAULT_ICON_FILE, UserConfig};
pub use sanitize::{CLEAN_SUFFIX, SanitizeJob, SanitizeOptions};

use crate::models::BuildMode;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// File name of the built-in icon looked up next to the executable.
pub const DEFAULT_ICON_FILE: &str = "default.ico";

/// User configuration from `pypack.yaml`.
///
/// Every field can be overridden with a `PYPACK_<FIELD>` environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Interpreter used to launch `-m PyInstaller`
    pub interpreter: String,

    /// Icon used for the `default` icon policy. Empty means `default.ico` next to the executable.
    pub default_icon: String,

    pub build_mode: BuildMode,
    pub console: bool,
    pub compression: bool,
    pub collapse_blank_lines: bool,

    /// Encoding label used to decode the bundler's console output
    pub tool_output_encoding: String,

    /// How often the front end drains the worker channel
    pub poll_interval_ms: u64,

    pub log_dir: String,
    pub debug_mode: bool,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            default_icon: String::new(),
            build_mode: BuildMode::SingleDir,
            console: false,
            compression: false,
            collapse_blank_lines: true,
            tool_output_encoding: default_tool_output_encoding().to_string(),
            poll_interval_ms: 100,
            log_dir: "logs".to_string(),
            debug_mode: false,
        }
    }
}

fn default_tool_output_encoding() -> &'static str {
    if cfg!(windows) { "gbk" } else { "utf-8" }
}

impl UserConfig {
    /// Resolve the icon used by the `default` icon policy.
    pub fn default_icon_path(&self) -> Option<Utf8PathBuf> {
        if !self.default_icon.trim().is_empty() {
            return Some(Utf8PathBuf::from(self.default_icon.trim()));
        }

        let exe = std::env::current_exe().ok()?;
        let exe = Utf8PathBuf::try_from(exe).ok()?;
        exe.parent().map(|dir| dir.join(DEFAULT_ICON_FILE))
    }
}

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Packaging mode requested by the user.
///
/// A mode expands into one or more [`BuildStep`]s. `Both` always builds the
/// folder variant first because it is the easier one to debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    SingleFile,
    #[default]
    SingleDir,
    Both,
}

impl BuildMode {
    /// Ordered build steps for this mode.
    pub fn steps(self) -> &'static [BuildStep] {
        match self {
            BuildMode::SingleFile => &[BuildStep::OneFile],
            BuildMode::SingleDir => &[BuildStep::OneDir],
            BuildMode::Both => &[BuildStep::OneDir, BuildStep::OneFile],
        }
    }
}

/// One concrete invocation of the bundler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    OneFile,
    OneDir,
}

impl BuildStep {
    /// The bundler flag selecting this artifact form.
    pub fn flag(self) -> &'static str {
        match self {
            BuildStep::OneFile => "--onefile",
            BuildStep::OneDir => "--onedir",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::OneFile => f.write_str("onefile"),
            BuildStep::OneDir => f.write_str("onedir"),
        }
    }
}

/// Which icon, if any, is embedded into the executable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IconPolicy {
    /// The icon shipped next to the application, when present.
    #[default]
    Default,
    Custom(Utf8PathBuf),
    None,
}

/// Declared kind of an extra resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    File,
    Directory,
}

/// An extra file or folder embedded into the build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMapping {
    pub source: Utf8PathBuf,
    pub is_dir: bool,
}

/// Errors raised while validating a [`BuildConfig`] before anything runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No entry script selected")]
    MissingScript,

    #[error("Entry script not found: {0}")]
    ScriptNotFound(Utf8PathBuf),

    #[error("Entry script is not a file: {0}")]
    ScriptNotAFile(Utf8PathBuf),

    #[error("Output name is empty")]
    EmptyOutputName,

    #[error("Output name must not contain path separators: {0}")]
    InvalidOutputName(String),

    #[error("Python interpreter not configured")]
    MissingInterpreter,

    #[error("Failed to resolve {path}: {source}")]
    Unresolvable {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

/// Everything needed to run one packaging request.
///
/// Owned by the caller; the orchestrator only borrows it for the duration of a run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub interpreter: String,
    pub script: Utf8PathBuf,
    pub output_name: String,
    pub icon: IconPolicy,
    pub console: bool,
    pub compression: bool,
    pub mode: BuildMode,
    resources: IndexMap<Utf8PathBuf, ResourceKind>,
}

impl BuildConfig {
    pub fn new(
        interpreter: impl Into<String>,
        script: impl Into<Utf8PathBuf>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            output_name: output_name.into(),
            icon: IconPolicy::default(),
            console: false,
            compression: false,
            mode: BuildMode::default(),
            resources: IndexMap::new(),
        }
    }

    /// Add a resource. Adding a path that is already present keeps the first entry.
    ///
    /// Returns `false` when the path was already registered.
    pub fn add_resource(&mut self, source: impl Into<Utf8PathBuf>, kind: ResourceKind) -> bool {
        let source = source.into();
        if self.resources.contains_key(&source) {
            return false;
        }
        self.resources.insert(source, kind);
        true
    }

    /// Resource mappings in insertion order.
    pub fn resources(&self) -> impl Iterator<Item = ResourceMapping> + '_ {
        self.resources.iter().map(|(source, kind)| ResourceMapping {
            source: source.clone(),
            is_dir: *kind == ResourceKind::Directory,
        })
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Check the request and make the script path absolute.
    ///
    /// Runs before cleanup or any subprocess launch.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::MissingInterpreter);
        }
        if self.script.as_str().is_empty() {
            return Err(ConfigError::MissingScript);
        }

        let name = self.output_name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyOutputName);
        }
        if name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidOutputName(name.to_string()));
        }
        self.output_name = name.to_string();

        if !self.script.exists() {
            return Err(ConfigError::ScriptNotFound(self.script));
        }
        if !self.script.is_file() {
            return Err(ConfigError::ScriptNotAFile(self.script));
        }

        let absolute =
            std::path::absolute(self.script.as_std_path()).map_err(|source| {
                ConfigError::Unresolvable {
                    path: self.script.clone(),
                    source,
                }
            })?;
        self.script = Utf8PathBuf::try_from(absolute)
            .map_err(|e| ConfigError::NonUtf8Path(e.into_path_buf().display().to_string()))?;

        Ok(self)
    }

    /// Directory containing the entry script. The spec file lands here.
    pub fn script_dir(&self) -> &Utf8Path {
        self.script.parent().unwrap_or_else(|| Utf8Path::new("."))
    }

    pub fn dist_dir(&self) -> Utf8PathBuf {
        self.script_dir().join("dist")
    }

    pub fn build_dir(&self) -> Utf8PathBuf {
        self.script_dir().join("build")
    }
}

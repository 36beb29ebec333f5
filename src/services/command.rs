//! Argument construction for PyInstaller invocations.
//!
//! Everything here is pure: filesystem questions (does the icon exist, is a
//! resource a folder) are answered by a [`PathProbe`], so the same builder
//! runs against the real disk in production and an in-memory table in tests.

use crate::models::{BuildConfig, BuildStep, IconPolicy};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// Python module launched with `-m`.
pub const BUNDLER_MODULE: &str = "PyInstaller";

/// The packaged programs use Tk, so its data files must always be collected.
pub const GUI_TOOLKIT_PACKAGE: &str = "tkinter";

/// Separator between source and destination in `--add-data`.
pub const DATA_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// What a path points at, as far as the builder cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
}

/// Answers existence questions for the builder.
pub trait PathProbe {
    fn kind(&self, path: &Utf8Path) -> Option<PathKind>;

    fn exists(&self, path: &Utf8Path) -> bool {
        self.kind(path).is_some()
    }
}

/// Probe backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl PathProbe for FsProbe {
    fn kind(&self, path: &Utf8Path) -> Option<PathKind> {
        match path.metadata() {
            Ok(meta) if meta.is_dir() => Some(PathKind::Directory),
            Ok(_) => Some(PathKind::File),
            Err(_) => None,
        }
    }
}

/// Icon actually passed to the bundler after resolving the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconChoice {
    Custom(Utf8PathBuf),
    Default(Utf8PathBuf),
    None,
}

impl IconChoice {
    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            IconChoice::Custom(path) | IconChoice::Default(path) => Some(path),
            IconChoice::None => None,
        }
    }
}

/// A fully built subprocess request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Maps a [`BuildConfig`] plus one [`BuildStep`] to PyInstaller arguments.
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    default_icon: Option<Utf8PathBuf>,
}

impl CommandBuilder {
    /// # Arguments
    /// * `default_icon` - Icon used for [`IconPolicy::Default`], if the application ships one
    pub fn new(default_icon: Option<Utf8PathBuf>) -> Self {
        Self { default_icon }
    }

    pub fn default_icon(&self) -> Option<&Utf8Path> {
        self.default_icon.as_deref()
    }

    /// Resolve the icon policy. Missing files silently resolve to no icon.
    pub fn resolve_icon(&self, policy: &IconPolicy, probe: &impl PathProbe) -> IconChoice {
        match policy {
            IconPolicy::Custom(path) if !path.as_str().is_empty() && probe.exists(path) => {
                IconChoice::Custom(path.clone())
            }
            IconPolicy::Default => match &self.default_icon {
                Some(path) if probe.exists(path) => IconChoice::Default(path.clone()),
                _ => IconChoice::None,
            },
            _ => IconChoice::None,
        }
    }

    /// Bundler arguments for one step, starting with the entry script.
    ///
    /// Missing icons and resources are skipped; pre-flight validation is the
    /// caller's job.
    pub fn build(
        &self,
        config: &BuildConfig,
        step: BuildStep,
        probe: &impl PathProbe,
    ) -> Vec<String> {
        let mut args = vec![
            config.script.to_string(),
            "--noconfirm".to_string(),
            "--clean".to_string(),
            format!("--name={}", config.output_name),
            format!("--distpath={}", config.dist_dir()),
            format!("--workpath={}", config.build_dir()),
            format!("--specpath={}", config.script_dir()),
            step.flag().to_string(),
            format!("--collect-all={}", GUI_TOOLKIT_PACKAGE),
        ];

        if !config.console {
            args.push("--noconsole".to_string());
        }
        if !config.compression {
            args.push("--noupx".to_string());
        }

        if let Some(icon) = self.resolve_icon(&config.icon, probe).path() {
            args.push(format!("--icon={}", icon));
        }

        for resource in config.resources() {
            let destination = match probe.kind(&resource.source) {
                Some(PathKind::File) => ".",
                Some(PathKind::Directory) => resource.source.file_name().unwrap_or("."),
                None => {
                    tracing::debug!("Skipping missing resource: {}", resource.source);
                    continue;
                }
            };
            args.push(format!(
                "--add-data={}{}{}",
                resource.source, DATA_SEPARATOR, destination
            ));
        }

        args
    }

    /// Full subprocess request: `<interpreter> -m PyInstaller <args...>`.
    pub fn invocation(
        &self,
        config: &BuildConfig,
        step: BuildStep,
        probe: &impl PathProbe,
    ) -> Invocation {
        let mut args = vec!["-m".to_string(), BUNDLER_MODULE.to_string()];
        args.extend(self.build(config, step, probe));
        Invocation {
            program: config.interpreter.clone(),
            args,
        }
    }
}

use camino::{Utf8Path, Utf8PathBuf};

/// Suffix inserted between the file stem and extension of a cleaned copy.
pub const CLEAN_SUFFIX: &str = "_clean";

/// Options applied to every file of a sanitize batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeOptions {
    pub collapse_blank_lines: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            collapse_blank_lines: true,
        }
    }
}

/// Request to strip comments from one source file into a sibling `_clean` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeJob {
    pub source: Utf8PathBuf,
    pub options: SanitizeOptions,
    /// Codec to read and write with, overriding BOM-less detection.
    pub encoding: Option<String>,
}

impl SanitizeJob {
    pub fn new(source: impl Into<Utf8PathBuf>, options: SanitizeOptions) -> Self {
        Self {
            source: source.into(),
            options,
            encoding: None,
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// `<dir>/<stem>_clean<ext>`, never equal to the source path.
    pub fn output_path(&self) -> Utf8PathBuf {
        clean_sibling(&self.source)
    }
}

fn clean_sibling(source: &Utf8Path) -> Utf8PathBuf {
    let stem = source.file_stem().unwrap_or_default();
    let file_name = match source.extension() {
        Some(ext) => format!("{stem}{CLEAN_SUFFIX}.{ext}"),
        None => format!("{stem}{CLEAN_SUFFIX}"),
    };
    match source.parent() {
        Some(parent) => parent.join(file_name),
        None => Utf8PathBuf::from(file_name),
    }
}

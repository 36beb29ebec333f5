//! Source encoding detection (PEP 263) and byte/text conversion.

use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use std::sync::LazyLock;
use thiserror::Error;

pub const DEFAULT_ENCODING: &str = "utf-8";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

static CODING_COOKIE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)^[ \t\x0c]*#.*?coding[:=][ \t]*([-\w.]+)").expect("Invalid coding cookie regex")
});

static BLANK_OR_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^[ \t\x0c]*(?:[#\r\n]|$)").expect("Invalid blank line regex"));

/// Codec names Python accepts that are not WHATWG labels.
const CODEC_ALIASES: &[(&str, &str)] = &[
    ("cp936", "gbk"),
    ("ms936", "gbk"),
    ("cp932", "shift_jis"),
    ("ms932", "shift_jis"),
    ("sjis", "shift_jis"),
    ("cp949", "euc-kr"),
    ("cp950", "big5"),
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("encoding problem: {0} with BOM")]
    BomMismatch(String),

    #[error("source is not valid {0}")]
    InvalidBytes(String),

    #[error("text cannot be represented in {0}")]
    Unencodable(String),
}

/// The encoding a source file is read and written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEncoding {
    name: String,
    encoding: &'static Encoding,
    bom: bool,
    ascii_only: bool,
}

impl SourceEncoding {
    pub fn utf8() -> Self {
        Self {
            name: DEFAULT_ENCODING.to_string(),
            encoding: UTF_8,
            bom: false,
            ascii_only: false,
        }
    }

    /// Normalized name, e.g. `utf-8`, `utf-8-sig`, `iso-8859-1`, `gbk`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode the whole file. The BOM, if any, is not part of the text.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let body = if self.bom {
            bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
        } else {
            bytes
        };

        if self.ascii_only && !body.is_ascii() {
            return Err(DecodeError::InvalidBytes(self.name.clone()));
        }

        self.encoding
            .decode_without_bom_handling_and_without_replacement(body)
            .map(|text| text.into_owned())
            .ok_or_else(|| DecodeError::InvalidBytes(self.name.clone()))
    }

    /// Encode text for writing, re-emitting the BOM when the source had one.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, DecodeError> {
        if self.ascii_only && !text.is_ascii() {
            return Err(DecodeError::Unencodable(self.name.clone()));
        }

        let (bytes, _, had_unmappable) = self.encoding.encode(text);
        if had_unmappable {
            return Err(DecodeError::Unencodable(self.name.clone()));
        }

        let mut out = Vec::with_capacity(bytes.len() + UTF8_BOM.len());
        if self.bom {
            out.extend_from_slice(UTF8_BOM);
        }
        out.extend_from_slice(&bytes);
        Ok(out)
    }
}

/// Map a declared codec name to its canonical spelling.
pub fn normalize_encoding_name(declared: &str) -> String {
    let lowered: String = declared
        .chars()
        .take(12)
        .collect::<String>()
        .to_ascii_lowercase()
        .replace('_', "-");

    if lowered == "utf-8" || lowered.starts_with("utf-8-") {
        return "utf-8".to_string();
    }
    if ["latin-1", "iso-8859-1", "iso-latin-1"]
        .iter()
        .any(|name| lowered == *name || lowered.starts_with(&format!("{name}-")))
    {
        return "iso-8859-1".to_string();
    }
    declared.to_string()
}

/// The codec named by a coding cookie on `line`, if there is one.
pub fn coding_cookie(line: &[u8]) -> Option<String> {
    CODING_COOKIE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// Work out how a source file is encoded.
///
/// A UTF-8 BOM means `utf-8-sig`. Otherwise the coding cookie on line 1 is
/// used, or on line 2 when line 1 is blank or a comment. No cookie means UTF-8.
pub fn detect_encoding(bytes: &[u8]) -> Result<SourceEncoding, DecodeError> {
    let bom = bytes.starts_with(UTF8_BOM);
    let body = if bom { &bytes[UTF8_BOM.len()..] } else { bytes };

    let mut lines = body.split_inclusive(|b| *b == b'\n');
    let declared = match lines.next() {
        Some(first) => match coding_cookie(first) {
            Some(name) => Some(name),
            None if BLANK_OR_COMMENT.is_match(first) => lines.next().and_then(coding_cookie),
            None => None,
        },
        None => None,
    };

    let Some(declared) = declared else {
        return Ok(if bom { utf8_sig() } else { SourceEncoding::utf8() });
    };

    let name = normalize_encoding_name(&declared);
    if bom {
        if name != "utf-8" {
            return Err(DecodeError::BomMismatch(declared));
        }
        return Ok(utf8_sig());
    }

    lookup(&name).ok_or(DecodeError::UnknownEncoding(declared))
}

/// Use `name` instead of any coding cookie.
///
/// A UTF-8 BOM is still honoured, and still rejects a non UTF-8 codec.
pub fn forced_encoding(bytes: &[u8], name: &str) -> Result<SourceEncoding, DecodeError> {
    let canonical = normalize_encoding_name(name.trim());
    if bytes.starts_with(UTF8_BOM) {
        if canonical != "utf-8" {
            return Err(DecodeError::BomMismatch(name.to_string()));
        }
        return Ok(utf8_sig());
    }
    lookup(&canonical).ok_or_else(|| DecodeError::UnknownEncoding(name.to_string()))
}

fn utf8_sig() -> SourceEncoding {
    SourceEncoding {
        name: "utf-8-sig".to_string(),
        encoding: UTF_8,
        bom: true,
        ascii_only: false,
    }
}

fn lookup(name: &str) -> Option<SourceEncoding> {
    let lowered = name.to_ascii_lowercase();

    if matches!(lowered.as_str(), "ascii" | "us-ascii" | "646") {
        return Some(SourceEncoding {
            name: "ascii".to_string(),
            encoding: UTF_8,
            bom: false,
            ascii_only: true,
        });
    }

    let label = CODEC_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map_or(lowered.as_str(), |(_, label)| *label);

    let encoding = Encoding::for_label(label.as_bytes())?;
    // Python refuses UTF-16/32 cookies, and encoding_rs cannot write UTF-16.
    if encoding.output_encoding() != encoding {
        return None;
    }

    Some(SourceEncoding {
        name: lowered,
        encoding,
        bom: false,
        ascii_only: false,
    })
}

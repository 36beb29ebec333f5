use super::tokenizer::{Token, TokenKind};
use std::collections::BTreeSet;

/// Source text with its comments removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stripped {
    pub text: String,
    pub comments_removed: usize,
    /// 0-based indices of output lines that begin inside a string literal.
    pub string_lines: BTreeSet<usize>,
}

/// Number of line breaks in `text`, counting `\r\n` once.
pub fn line_break_count(text: &str) -> usize {
    let bytes = text.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|&(i, b)| *b == b'\n' || (*b == b'\r' && bytes.get(i + 1) != Some(&b'\n')))
        .count()
}

/// Rebuild source text from `tokens` without their comments.
///
/// A line holding nothing but a comment disappears along with its line
/// break. A trailing comment takes the whitespace in front of it with it.
/// Everything else, including line terminators, is copied through unchanged.
pub fn strip_comments(tokens: &[Token<'_>]) -> Stripped {
    let mut out = Stripped::default();
    let mut line = 0usize;

    for segment in tokens.split_inclusive(|t| t.is_line_break()) {
        let comment_count = segment
            .iter()
            .filter(|t| t.kind == TokenKind::Comment)
            .count();

        if comment_count == 0 {
            for token in segment {
                emit(&mut out, &mut line, token);
            }
            continue;
        }

        out.comments_removed += comment_count;

        let comment_only = segment.iter().all(|t| {
            t.kind == TokenKind::Comment || t.is_horizontal_space() || t.is_line_break()
        });
        if comment_only {
            continue;
        }

        let mut kept: Vec<&Token<'_>> = Vec::with_capacity(segment.len());
        for token in segment {
            if token.kind == TokenKind::Comment {
                while kept.last().is_some_and(|t| t.is_horizontal_space()) {
                    kept.pop();
                }
                continue;
            }
            kept.push(token);
        }
        for token in kept {
            emit(&mut out, &mut line, token);
        }
    }

    out
}

fn emit(out: &mut Stripped, line: &mut usize, token: &Token<'_>) {
    out.text.push_str(token.text);
    let breaks = line_break_count(token.text);
    if token.kind == TokenKind::String {
        for _ in 0..breaks {
            *line += 1;
            out.string_lines.insert(*line);
        }
    } else {
        *line += breaks;
    }
}

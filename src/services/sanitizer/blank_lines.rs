use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollapseState {
    Normal,
    AfterBlank,
}

/// Iterator over the lines of a text, each slice keeping its terminator.
///
/// `\n`, `\r\n` and a lone `\r` all end a line.
pub struct PhysicalLines<'a> {
    rest: &'a str,
}

impl<'a> Iterator for PhysicalLines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let bytes = self.rest.as_bytes();
        let end = match bytes.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(i) if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') => i + 2,
            Some(i) => i + 1,
            None => bytes.len(),
        };
        let (line, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(line)
    }
}

pub fn physical_lines(text: &str) -> PhysicalLines<'_> {
    PhysicalLines { rest: text }
}

fn is_blank(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r'])
        .chars()
        .all(|c| matches!(c, ' ' | '\t' | '\x0c'))
}

/// Reduce every run of blank lines to a single blank line.
///
/// Lines whose index is in `protected` (the inside of multi-line string
/// literals) are always kept and reset the run.
///
/// # Returns
/// The collapsed text and the number of lines dropped.
pub fn collapse_blank_lines(text: &str, protected: &BTreeSet<usize>) -> (String, usize) {
    let mut result = String::with_capacity(text.len());
    let mut state = CollapseState::Normal;
    let mut dropped = 0;

    for (index, line) in physical_lines(text).enumerate() {
        if protected.contains(&index) {
            result.push_str(line);
            state = CollapseState::Normal;
            continue;
        }

        match (state, is_blank(line)) {
            (CollapseState::Normal, true) => {
                result.push_str(line);
                state = CollapseState::AfterBlank;
            }
            (CollapseState::AfterBlank, true) => dropped += 1,
            (_, false) => {
                result.push_str(line);
                state = CollapseState::Normal;
            }
        }
    }

    (result, dropped)
}

//! Conflict-marker scanner.
//!
//! Walks a merged file line by line and emits one [`ConflictBlock`] per
//! `<<<<<<<` ... `>>>>>>>` region. Side contents keep their line
//! terminators so a block can be spliced back byte for byte.

use crate::models::{ConflictBlock, MarkerStyle};

pub const CURRENT_MARKER: &str = "<<<<<<<";
pub const BASE_MARKER: &str = "|||||||";
pub const SEPARATOR: &str = "=======";
pub const INCOMING_MARKER: &str = ">>>>>>>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    InCurrent,
    InBase,
    InIncoming,
}

fn strip_terminator(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

fn is_marker(line: &str, marker: &str) -> bool {
    let line = strip_terminator(line);
    match line.strip_prefix(marker) {
        Some(rest) => rest.is_empty() || rest.starts_with(' '),
        None => false,
    }
}

pub fn is_current_marker(line: &str) -> bool {
    is_marker(line, CURRENT_MARKER)
}

pub fn is_incoming_marker(line: &str) -> bool {
    is_marker(line, INCOMING_MARKER)
}

fn is_separator(line: &str) -> bool {
    strip_terminator(line) == SEPARATOR
}

/// Parse every conflict block in `content`.
///
/// A block left open at end of input is dropped; a separator or closing
/// marker outside a block is ordinary content.
pub fn parse_conflict_blocks(file_path: &str, content: &str) -> Vec<ConflictBlock> {
    let mut blocks = Vec::new();
    let mut state = ScanState::Normal;

    let mut start_line = 0;
    let mut current = String::new();
    let mut base = String::new();
    let mut incoming = String::new();
    let mut saw_base = false;

    for (idx, line) in content.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        match state {
            ScanState::Normal => {
                if is_current_marker(line) {
                    state = ScanState::InCurrent;
                    start_line = line_no;
                    current.clear();
                    base.clear();
                    incoming.clear();
                    saw_base = false;
                }
            }
            ScanState::InCurrent => {
                if is_marker(line, BASE_MARKER) {
                    state = ScanState::InBase;
                    saw_base = true;
                } else if is_separator(line) {
                    state = ScanState::InIncoming;
                } else {
                    current.push_str(line);
                }
            }
            ScanState::InBase => {
                if is_separator(line) {
                    state = ScanState::InIncoming;
                } else {
                    base.push_str(line);
                }
            }
            ScanState::InIncoming => {
                if is_incoming_marker(line) {
                    blocks.push(ConflictBlock {
                        file_path: file_path.to_string(),
                        start_line,
                        end_line: line_no,
                        current_content: std::mem::take(&mut current),
                        incoming_content: std::mem::take(&mut incoming),
                        base_content: saw_base.then(|| std::mem::take(&mut base)),
                        marker_style: if saw_base {
                            MarkerStyle::Diff3
                        } else {
                            MarkerStyle::Merge
                        },
                    });
                    state = ScanState::Normal;
                } else {
                    incoming.push_str(line);
                }
            }
        }
    }

    blocks
}

/// 1-based line numbers of every opening, base or closing marker.
pub fn marker_lines(content: &str) -> Vec<usize> {
    content
        .split_inclusive('\n')
        .enumerate()
        .filter(|(_, l)| is_current_marker(l) || is_marker(l, BASE_MARKER) || is_incoming_marker(l))
        .map(|(i, _)| i + 1)
        .collect()
}

pub fn has_conflict_markers(content: &str) -> bool {
    !marker_lines(content).is_empty()
}

fn push_terminated(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
}

/// Wrap two sides in merge-style conflict markers.
///
/// Markers must start a line, so a non-empty side without a trailing
/// newline gets one. Parsing the result returns that side with `\n`
/// appended; line-terminated sides round-trip exactly.
pub fn wrap_conflict(current: &str, incoming: &str) -> String {
    let mut out = String::with_capacity(current.len() + incoming.len() + 48);
    out.push_str("<<<<<<< current\n");
    push_terminated(&mut out, current);
    out.push_str("=======\n");
    push_terminated(&mut out, incoming);
    out.push_str(">>>>>>> incoming\n");
    out
}

/// Wrap two sides and their common base in diff3-style conflict markers.
/// Unterminated sections are terminated as in [`wrap_conflict`].
pub fn wrap_conflict_with_base(current: &str, base: &str, incoming: &str) -> String {
    let mut out = String::with_capacity(current.len() + base.len() + incoming.len() + 64);
    out.push_str("<<<<<<< current\n");
    push_terminated(&mut out, current);
    out.push_str("||||||| base\n");
    push_terminated(&mut out, base);
    out.push_str("=======\n");
    push_terminated(&mut out, incoming);
    out.push_str(">>>>>>> incoming\n");
    out
}

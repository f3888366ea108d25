// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Document Writer: finds and edits the fenced output region
//! `` ```output:<execId> ... ``` `` inside the shared text (spec §4.2).
//!
//! The region is owned by the browser (it inserts the fences); this writer
//! only ever reads and edits the content strictly between them. Locating a
//! region is a string search over the current snapshot — the stable
//! mechanism across concurrent edits is the serialized logical position
//! handed out by [`createOutputPosition`](DocumentWriter::create_output_position).

use yrs::Assoc;

use crate::crdt::{LogicalPosition, SharedText};

const FENCE: &str = "```";

/// A located output region: byte offsets into the shared text's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBlock {
    pub marker_start: u32,
    pub content_start: u32,
    pub content_end: u32,
}

/// Edits the shared text's fenced output regions on behalf of a single
/// execution id at a time. Bound to a [`SharedText`] at construction so it
/// can be unit-tested against an in-memory fake.
pub struct DocumentWriter<T: SharedText> {
    text: T,
}

impl<T: SharedText> DocumentWriter<T> {
    pub fn new(text: T) -> Self {
        Self { text }
    }

    /// Locate the opening marker `` ```output:<execId> `` and the content
    /// span it delimits. Returns `None` if no such marker line is present.
    pub fn find_output_block(&self, exec_id: &str) -> Option<OutputBlock> {
        let snapshot = self.text.content();
        let marker = format!("{FENCE}output:{exec_id}");
        let marker_start = find_line_start(&snapshot, &marker)?;

        let after_marker_line = snapshot[marker_start..]
            .find('\n')
            .map(|rel| marker_start + rel + 1)
            .unwrap_or(snapshot.len());
        let content_start = after_marker_line;

        let content_end = find_closing_fence(&snapshot, content_start).unwrap_or(snapshot.len());

        Some(OutputBlock {
            marker_start: byte_to_char_index(&snapshot, marker_start),
            content_start: byte_to_char_index(&snapshot, content_start),
            content_end: byte_to_char_index(&snapshot, content_end),
        })
    }

    pub fn has_output_block(&self, exec_id: &str) -> bool {
        self.find_output_block(exec_id).is_some()
    }

    pub fn get_output_content(&self, exec_id: &str) -> Option<String> {
        let block = self.find_output_block(exec_id)?;
        let snapshot = self.text.content();
        Some(slice_chars(&snapshot, block.content_start, block.content_end))
    }

    /// Insert `content` at the end of the region's content span.
    pub fn append_output(&self, exec_id: &str, content: &str) -> bool {
        match self.find_output_block(exec_id) {
            Some(block) => {
                self.text.insert(block.content_end, content);
                true
            }
            None => {
                tracing::warn!(exec_id, "append_output: no output block found");
                false
            }
        }
    }

    /// Replace the region's entire content span with `content`, as a
    /// single logical edit: the delete and insert are issued back to back
    /// with no intervening read so no observer can see an empty region.
    pub fn replace_output(&self, exec_id: &str, content: &str) -> bool {
        match self.find_output_block(exec_id) {
            Some(block) => {
                let len = block.content_end - block.content_start;
                self.text.remove_range(block.content_start, len);
                self.text.insert(block.content_start, content);
                true
            }
            None => {
                tracing::warn!(exec_id, "replace_output: no output block found");
                false
            }
        }
    }

    /// A logical position anchored at the region's content start, stable
    /// under concurrent insertions elsewhere in the document.
    pub fn create_output_position(&self, exec_id: &str) -> Option<LogicalPosition> {
        let block = self.find_output_block(exec_id)?;
        self.text.sticky_index(block.content_start, Assoc::Before)
    }

    /// Resolve a previously created logical position to its current index,
    /// or `None` if the anchor has been removed from the document.
    pub fn get_absolute_position(&self, position: &LogicalPosition) -> Option<u32> {
        self.text.resolve(position)
    }
}

/// Find the start byte offset of a line whose content begins with `needle`.
fn find_line_start(haystack: &str, needle: &str) -> Option<usize> {
    let mut search_from = 0;
    loop {
        let rel = haystack[search_from..].find(needle)?;
        let at = search_from + rel;
        if at == 0 || haystack.as_bytes()[at - 1] == b'\n' {
            return Some(at);
        }
        search_from = at + needle.len();
    }
}

/// Find the byte offset of the closing fence: three backticks at the start
/// of a line, at or after `from`.
fn find_closing_fence(haystack: &str, from: usize) -> Option<usize> {
    let mut search_from = from;
    loop {
        let rel = haystack[search_from..].find(FENCE)?;
        let at = search_from + rel;
        if at == from || at == 0 || haystack.as_bytes()[at - 1] == b'\n' {
            return Some(at);
        }
        search_from = at + FENCE.len();
    }
}

/// `yrs` text indices are UTF-16-code-unit-free char counts; our snapshot
/// search works in bytes, so translate once here.
fn byte_to_char_index(s: &str, byte_offset: usize) -> u32 {
    s[..byte_offset].chars().count() as u32
}

fn slice_chars(s: &str, start: u32, end: u32) -> String {
    s.chars().skip(start as usize).take((end - start) as usize).collect()
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;

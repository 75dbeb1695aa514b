//! Turn a wholesale text replacement into positional edits.
//!
//! The editor only reports "the content is now X". We trim the common
//! prefix and suffix and describe the middle as one delete plus one insert.
//! That is minimal for any single contiguous change (a keystroke, a paste,
//! a cut) and correct for everything else.

use crate::op::TextEdit;

/// Compute edits that transform `old` into `new`.
///
/// Edits are to be applied in order. The delete (if any) comes first, and
/// the insert (if any) lands at the same index.
pub fn diff(old: &str, new: &str) -> Vec<TextEdit> {
    if old == new {
        return Vec::new();
    }

    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let prefix = old_chars
        .iter()
        .zip(new_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();

    // The suffix may not overlap the prefix on either side
    let max_suffix = (old_chars.len() - prefix).min(new_chars.len() - prefix);
    let suffix = old_chars
        .iter()
        .rev()
        .zip(new_chars.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let removed = old_chars.len() - prefix - suffix;
    let inserted: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();

    let mut edits = Vec::with_capacity(2);
    if removed > 0 {
        edits.push(TextEdit::Delete {
            index: prefix,
            len: removed,
        });
    }
    if !inserted.is_empty() {
        edits.push(TextEdit::Insert {
            index: prefix,
            text: inserted,
        });
    }
    edits
}

/// Apply positional edits to a linear string.
///
/// Out-of-range indices are clamped to the end of the text.
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    for edit in edits {
        match edit {
            TextEdit::Insert { index, text } => {
                let at = (*index).min(chars.len());
                chars.splice(at..at, text.chars());
            }
            TextEdit::Delete { index, len } => {
                let start = (*index).min(chars.len());
                let end = (start + len).min(chars.len());
                chars.drain(start..end);
            }
        }
    }
    chars.into_iter().collect()
}

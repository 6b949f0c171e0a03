//! Text normalization shared by extraction, detection and replacement.
//!
//! Block text handed to detectors and the live text re-read at replacement
//! time must go through the same function, otherwise span offsets point at
//! the wrong characters. All offsets in this crate are `char` (Unicode
//! scalar value) offsets, never byte offsets.

/// Whitespace as far as normalization is concerned. Covers the
/// non-breaking spaces Word likes to insert (U+00A0, U+202F, U+2007).
fn is_collapsible(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '\u{00A0}' | '\u{202F}' | '\u{2007}')
}

/// Normalize text: non-breaking spaces become regular spaces, every run of
/// whitespace collapses to a single space, leading and trailing whitespace
/// is dropped.
///
/// `normalize(normalize(x)) == normalize(x)` for every input.
pub fn normalize(raw: &str) -> String {
    NormalizedText::new(raw).into_text()
}

/// Normalized text plus the mapping back to the raw characters it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    text: String,
    /// For each normalized char: the raw char range `[start, end)` it stands for.
    /// A collapsed whitespace run maps to the whole run.
    origins: Vec<(usize, usize)>,
    raw_len: usize,
}

impl NormalizedText {
    pub fn new(raw: &str) -> Self {
        let chars: Vec<char> = raw.chars().collect();
        let mut text = String::with_capacity(raw.len());
        let mut origins = Vec::with_capacity(chars.len());

        let mut i = 0;
        while i < chars.len() {
            if is_collapsible(chars[i]) {
                let run_start = i;
                while i < chars.len() && is_collapsible(chars[i]) {
                    i += 1;
                }
                // Leading and trailing runs vanish.
                if !origins.is_empty() && i < chars.len() {
                    text.push(' ');
                    origins.push((run_start, i));
                }
            } else {
                text.push(chars[i]);
                origins.push((i, i + 1));
                i += 1;
            }
        }

        Self {
            text,
            origins,
            raw_len: chars.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Length in chars of the normalized text.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Length in chars of the raw text this was built from.
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Map a normalized `[start, end)` range onto the raw text.
    ///
    /// The raw range starts at the first raw char of `start` and ends after
    /// the last raw char of `end - 1`, so a span ending in a collapsed
    /// whitespace run swallows the whole run.
    pub fn raw_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if start >= end || end > self.origins.len() {
            return None;
        }
        Some((self.origins[start].0, self.origins[end - 1].1))
    }

    /// The normalized chars in `[start, end)`, if the range is in bounds.
    pub fn slice(&self, start: usize, end: usize) -> Option<&str> {
        slice_chars(&self.text, start, end)
    }

    /// Char offsets of every occurrence of `needle`, left to right,
    /// non-overlapping.
    pub fn find_all(&self, needle: &str) -> Vec<usize> {
        if needle.is_empty() {
            return Vec::new();
        }
        self.text
            .match_indices(needle)
            .map(|(byte, _)| byte_to_char(&self.text, byte))
            .collect()
    }
}

/// Number of chars in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Borrow the chars `[start, end)` of `text`. `None` when out of bounds or
/// inverted.
pub fn slice_chars(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }
    let mut indices = text.char_indices().map(|(b, _)| b).chain(std::iter::once(text.len()));
    let byte_start = indices.nth(start)?;
    let byte_end = if end == start {
        byte_start
    } else {
        indices.nth(end - start - 1)?
    };
    Some(&text[byte_start..byte_end])
}

/// Convert a byte offset (as returned by `regex` or `str::find`) into a
/// char offset.
pub fn byte_to_char(text: &str, byte: usize) -> usize {
    text[..byte.min(text.len())].chars().count()
}

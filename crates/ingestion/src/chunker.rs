//! Deterministic overlapping chunker
//!
//! A pure function of (text, chunk size, overlap): every character of the
//! input lands in at least one chunk, consecutive chunks overlap by
//! exactly the configured amount, and chunk ends prefer a sentence or
//! paragraph break within a small window before falling back to a hard
//! cut. Offsets are character positions.
//!
//! `Chunker::chunks` returns a lazy iterator; calling it again replays
//! the identical sequence, which is what makes re-ingestion idempotent.

/// Fraction of the chunk size searched backwards for a natural break
const BOUNDARY_WINDOW_DIVISOR: usize = 5;

/// One chunk cut from normalized text, before embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    /// Position within the document, starting at 0
    pub ordinal: i32,
    pub content: String,
    /// Character offsets into the source text
    pub start_pos: usize,
    pub end_pos: usize,
    /// Estimated tokens (chars / 4)
    pub token_count: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Overlap is clamped below the chunk size so the cursor always advances
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazily cut `text` into overlapping drafts
    pub fn chunks(&self, text: &str) -> ChunkIter {
        ChunkIter {
            chars: text.chars().collect(),
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            start: 0,
            ordinal: 0,
            done: text.is_empty(),
        }
    }
}

pub struct ChunkIter {
    chars: Vec<char>,
    chunk_size: usize,
    overlap: usize,
    start: usize,
    ordinal: i32,
    done: bool,
}

impl Iterator for ChunkIter {
    type Item = ChunkDraft;

    fn next(&mut self) -> Option<ChunkDraft> {
        if self.done {
            return None;
        }

        let total = self.chars.len();
        let start = self.start;
        let hard_end = (start + self.chunk_size).min(total);
        let end = if hard_end < total {
            self.snap_to_boundary(start, hard_end)
        } else {
            hard_end
        };

        let content: String = self.chars[start..end].iter().collect();
        let draft = ChunkDraft {
            ordinal: self.ordinal,
            token_count: (content.chars().count() / 4) as i32,
            content,
            start_pos: start,
            end_pos: end,
        };

        if end >= total {
            self.done = true;
        } else {
            // Exact configured overlap with the chunk just emitted
            self.start = end - self.overlap;
        }
        self.ordinal += 1;
        Some(draft)
    }
}

impl ChunkIter {
    /// Look backwards from the hard cut for a paragraph or sentence end.
    /// The snapped end never drops below `start + overlap + 1`, which
    /// keeps the next start strictly past the current one.
    fn snap_to_boundary(&self, start: usize, hard_end: usize) -> usize {
        let window = (self.chunk_size / BOUNDARY_WINDOW_DIVISOR).max(1);
        let min_end = (start + self.overlap + 1).max(hard_end.saturating_sub(window));
        if min_end >= hard_end {
            return hard_end;
        }

        // Paragraph/line break wins over a sentence end
        for end in (min_end..=hard_end).rev() {
            if self.chars[end - 1] == '\n' {
                return end;
            }
        }
        for end in (min_end..=hard_end).rev() {
            if end >= 2
                && matches!(self.chars[end - 2], '.' | '!' | '?')
                && self.chars[end - 1].is_whitespace()
            {
                return end;
            }
        }
        hard_end
    }
}

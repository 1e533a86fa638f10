//! Citation model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Human-readable source attribution attached to a retrieved passage or
/// a generated answer. `index` matches the `[n]` marker in answer text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub document_id: Uuid,
    pub title: String,
    /// Where in the document the passage came from, e.g. "p. 3" or "§5"
    pub locator: String,
    /// Short excerpt of the cited passage
    pub quote: String,
    pub score: f32,
}

impl Citation {
    /// Trim a passage down to a quotable excerpt
    pub fn excerpt(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_text_unchanged() {
        assert_eq!(Citation::excerpt("short", 80), "short");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let text = "répétition ".repeat(30);
        let cut = Citation::excerpt(&text, 40);
        assert!(cut.ends_with('…'));
        assert!(cut.chars().count() <= 41);
    }
}

//! Grapheme-aware splitting of entry text into overlapping windows.

use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_index: usize,
    pub text: String,
}

/// Split `text` into windows of at most `chunk_size` graphemes, each sharing
/// `overlap` graphemes with its predecessor.
///
/// Text that fits in one window comes back as a single chunk with index 0.
/// An `overlap` that is not smaller than `chunk_size` is clamped so the
/// window always advances.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let graphemes: Vec<&str> = text.graphemes(true).collect();

    if graphemes.len() <= chunk_size {
        return vec![Chunk {
            chunk_index: 0,
            text: text.to_string(),
        }];
    }

    let step = chunk_size - overlap.min(chunk_size - 1);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(graphemes.len());
        chunks.push(Chunk {
            chunk_index: chunks.len(),
            text: graphemes[start..end].concat(),
        });
        if end == graphemes.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Truncate to at most `max_chars` graphemes, appending `…` when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes.by_ref().take(max_chars).collect();
    if graphemes.next().is_some() {
        format!("{}…", head.trim_end())
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("Morning pages.", 500, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Morning pages.");
    }

    #[test]
    fn windows_overlap() {
        let chunks = split_text("abcdefghij", 4, 2);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "cdef", "efgh", "ghij"]);
        assert_eq!(chunks[3].chunk_index, 3);
    }

    #[test]
    fn last_window_may_be_short() {
        let chunks = split_text("abcdefg", 4, 1);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg"]);
    }

    #[test]
    fn graphemes_are_never_split() {
        // Family emoji is one grapheme made of several code points
        let text = "👨‍👩‍👧ab👨‍👩‍👧cd";
        let chunks = split_text(text, 3, 0);
        assert_eq!(chunks[0].text, "👨‍👩‍👧ab");
        assert_eq!(chunks[1].text, "👨‍👩‍👧cd");
    }

    #[test]
    fn oversized_overlap_still_advances() {
        let chunks = split_text("abcdef", 3, 5);
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn snippet_truncates_with_ellipsis() {
        assert_eq!(snippet("short", 200), "short");
        assert_eq!(snippet("abcdef", 3), "abc…");
    }
}

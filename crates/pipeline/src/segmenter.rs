//! Sentence segmentation for pipelined synthesis
//!
//! Reply text is fed to the synthesis adapter in sentence-sized segments so
//! the first output audio chunk can reach the client before the full reply
//! has been synthesized.

/// Maximum segment length in characters before a forced split. Long
/// unpunctuated output would otherwise stall the first audio chunk.
const MAX_SEGMENT_CHARS: usize = 160;

/// Split reply text into sentence-sized segments
///
/// Splits after `.`, `!`, `?` and newlines; over-long remainders are split
/// at the last word boundary before the cap. Empty segments are dropped.
pub fn segment_sentences(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch == '\n' {
            flush(&mut segments, &mut current);
            continue;
        }
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            flush(&mut segments, &mut current);
        } else if current.chars().count() >= MAX_SEGMENT_CHARS {
            // Back up to the last space so words stay intact.
            if let Some(pos) = current.rfind(' ') {
                let rest = current.split_off(pos + 1);
                flush(&mut segments, &mut current);
                current = rest;
            } else {
                flush(&mut segments, &mut current);
            }
        }
    }
    flush(&mut segments, &mut current);

    segments
}

fn flush(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_sentence_punctuation() {
        let segments = segment_sentences("Hallo! Wie geht es dir? Mir geht es gut.");
        assert_eq!(segments, vec!["Hallo!", "Wie geht es dir?", "Mir geht es gut."]);
    }

    #[test]
    fn test_single_sentence() {
        let segments = segment_sentences("Der Himmel ist blau.");
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_trailing_fragment_kept() {
        let segments = segment_sentences("Erster Satz. Und noch ein Rest ohne Punkt");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1], "Und noch ein Rest ohne Punkt");
    }

    #[test]
    fn test_long_text_forced_split() {
        let long = "wort ".repeat(100);
        let segments = segment_sentences(&long);
        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(segment.chars().count() <= MAX_SEGMENT_CHARS);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(segment_sentences("").is_empty());
        assert!(segment_sentences("   \n  ").is_empty());
    }
}

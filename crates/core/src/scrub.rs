//! PII scrubber
//!
//! Pure text transform that redacts identifying substrings from a transcript
//! before it is forwarded to any generation service. The scrubber reduces
//! risk, it does not guarantee zero leakage: unmatched or ambiguous content
//! passes through unchanged, and the pattern set below carries a documented
//! false-negative risk (spelled-out numbers, unusual address forms, names
//! without a self-identifying phrase are not caught).
//!
//! Properties:
//! - deterministic, no I/O, never panics on arbitrary input
//! - idempotent: `scrub(scrub(x)) == scrub(x)` (placeholders never re-match)
//! - worst case returns the input unchanged with zero matches removed

use once_cell::sync::Lazy;
use regex::Regex;

/// Result of scrubbing a transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubOutcome {
    /// Cleaned text with matches replaced by type placeholders
    pub text: String,
    /// Number of substrings redacted
    pub matches_removed: usize,
}

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[\w.\-]+@[\w.\-]+\.\w+\b").unwrap());

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());

// German street address: "<name>straße 5", "Am Marktplatz 12b", etc.
static STREET_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b[\p{L}\-]+(?:straße|strasse|str\.|weg|platz|gasse|allee|ring)\s+\d+[a-z]?\b",
    )
    .unwrap()
});

// Separated phone forms ("0171 2345678"); unbroken digit runs fall through
// to the ID pattern below.
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3,5}[\s\-/]\d{3,8}\b").unwrap());

// Long digit runs resembling IDs (Ausweis, account numbers, ...)
static ID_SEQUENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{6,}\b").unwrap());

// Full names directly after a self-identifying phrase. The phrase itself is
// kept so the generated reply can still acknowledge the introduction. Case
// folding covers the phrase only; the name capture stays case-sensitive so
// "ich bin müde" is not treated as an introduction.
static SELF_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b((?i:ich heiße|ich heisse|mein name ist|ich bin|my name is))\s+(\p{Lu}[\p{L}\-]+(?:\s+\p{Lu}[\p{L}\-]+)?)",
    )
    .unwrap()
});

/// Scrub PII from a transcript
///
/// Replacement order matters: URLs and addresses are redacted before the
/// bare digit patterns so their digits are not double-counted.
pub fn scrub(text: &str) -> ScrubOutcome {
    let mut removed = 0usize;
    let mut out = text.to_string();

    for (pattern, placeholder) in [
        (&*URL, "[URL ENTFERNT]"),
        (&*EMAIL, "[E-MAIL ENTFERNT]"),
        (&*STREET_ADDRESS, "[ADRESSE ENTFERNT]"),
        (&*PHONE, "[TELEFON ENTFERNT]"),
        (&*ID_SEQUENCE, "[NUMMER ENTFERNT]"),
    ] {
        let matches = pattern.find_iter(&out).count();
        if matches > 0 {
            out = pattern.replace_all(&out, placeholder).into_owned();
            removed += matches;
        }
    }

    let name_matches = SELF_NAME.find_iter(&out).count();
    if name_matches > 0 {
        out = SELF_NAME
            .replace_all(&out, "$1 [NAME ENTFERNT]")
            .into_owned();
        removed += name_matches;
    }

    ScrubOutcome {
        text: out,
        matches_removed: removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_redacted() {
        let out = scrub("schreib mir an max.mustermann@example.de bitte");
        assert_eq!(out.text, "schreib mir an [E-MAIL ENTFERNT] bitte");
        assert_eq!(out.matches_removed, 1);
    }

    #[test]
    fn test_phone_redacted() {
        let out = scrub("meine nummer ist 0171 2345678");
        assert!(out.text.contains("[TELEFON ENTFERNT]"));
        assert!(!out.text.contains("2345678"));
    }

    #[test]
    fn test_url_redacted() {
        let out = scrub("schau mal auf https://example.com/seite?x=1");
        assert_eq!(out.text, "schau mal auf [URL ENTFERNT]");
    }

    #[test]
    fn test_address_and_name_redacted() {
        // Scenario from the product requirements: name and address of a
        // six-year-old must be gone before generation sees the text.
        let out = scrub("Ich heiße Max und wohne in der Bahnhofstraße 5");
        assert!(out.text.contains("[NAME ENTFERNT]"), "{}", out.text);
        assert!(out.text.contains("[ADRESSE ENTFERNT]"), "{}", out.text);
        assert!(!out.text.contains("Max"));
        assert!(!out.text.contains("Bahnhofstraße"));
        assert_eq!(out.matches_removed, 2);
    }

    #[test]
    fn test_lowercase_after_self_phrase_untouched() {
        // "ich bin" introduces a name only when a capitalized word follows.
        for input in [
            "ich bin müde",
            "ich bin hungrig",
            "ich bin sechs Jahre alt",
            "mein name ist geheim",
        ] {
            let out = scrub(input);
            assert_eq!(out.text, input);
            assert_eq!(out.matches_removed, 0);
        }
    }

    #[test]
    fn test_capitalized_phrase_still_redacts_name() {
        let out = scrub("Mein Name ist Erika Musterfrau");
        assert_eq!(out.text, "Mein Name ist [NAME ENTFERNT]");
        assert_eq!(out.matches_removed, 1);
    }

    #[test]
    fn test_id_sequence_redacted() {
        let out = scrub("die nummer auf der karte ist 123456789012");
        assert!(out.text.contains("[NUMMER ENTFERNT]"));
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "Ich heiße Max und wohne in der Bahnhofstraße 5",
            "mail@example.com und 0171 2345678 und https://a.de",
            "nichts persönliches hier",
            "",
            "ümläute sind ökay",
        ];
        for input in inputs {
            let once = scrub(input);
            let twice = scrub(&once.text);
            assert_eq!(once.text, twice.text, "not idempotent for {input:?}");
            assert_eq!(twice.matches_removed, 0);
        }
    }

    #[test]
    fn test_clean_text_untouched() {
        let out = scrub("Warum ist der Himmel blau?");
        assert_eq!(out.text, "Warum ist der Himmel blau?");
        assert_eq!(out.matches_removed, 0);
    }

    #[test]
    fn test_never_panics_on_arbitrary_input() {
        for input in ["\u{0}\u{1}", "🦀🦀🦀", "a]b[c(d", "\\b\\d{3}"] {
            let _ = scrub(input);
        }
    }
}

use regex::Regex;
use std::sync::OnceLock;

fn trailing_space_re() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)[ \t]+$").expect("static trailing-space pattern"))
}

fn blank_run_re() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n{3,}").expect("static blank-run pattern"))
}

/// Collapses every whitespace run to a single space and trims both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalizes raw text pulled out of a PDF.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCleaner;

impl TextCleaner {
    pub fn new() -> Self {
        Self
    }

    /// Full cleaning pass: line endings, trailing blanks, blank-line runs,
    /// hyphenated line wraps, then a final whitespace collapse.
    pub fn clean(&self, raw: &str) -> String {
        normalize_whitespace(&self.clean_paragraphs(raw))
    }

    /// Same as [`TextCleaner::clean`] without the final collapse, so blank-line
    /// paragraph boundaries survive for the chunker.
    pub fn clean_paragraphs(&self, raw: &str) -> String {
        let unified = raw.replace("\r\n", "\n").replace('\u{000C}', "\n");
        let stripped = trailing_space_re().replace_all(&unified, "");
        let paragraphs = blank_run_re().replace_all(&stripped, "\n\n");
        paragraphs.replace("-\n", "").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn empty_input_stays_empty() {
        let cleaner = TextCleaner::new();
        assert_eq!(cleaner.clean(""), "");
        assert_eq!(cleaner.clean_paragraphs("  \n\n "), "");
    }

    #[test]
    fn hyphenated_line_wraps_are_joined() {
        let cleaner = TextCleaner::new();
        assert_eq!(cleaner.clean("simpli-\nfy the radi-\ncal"), "simplify the radical");
    }

    #[test]
    fn trailing_blanks_do_not_block_hyphen_join() {
        let cleaner = TextCleaner::new();
        assert_eq!(cleaner.clean("expo- \t\r\nnent"), "exponent");
    }

    #[test]
    fn form_feeds_and_crlf_become_newlines() {
        let cleaner = TextCleaner::new();
        let cleaned = cleaner.clean_paragraphs("page one\r\n\u{000C}page two");
        assert_eq!(cleaned, "page one\n\npage two");
    }

    #[test]
    fn blank_line_runs_collapse_to_one_paragraph_break() {
        let cleaner = TextCleaner::new();
        let cleaned = cleaner.clean_paragraphs("first\n\n\n\n\nsecond\n\n\nthird");
        assert_eq!(cleaned, "first\n\nsecond\n\nthird");
        assert_eq!(cleaner.clean("first\n\n\n\n\nsecond"), "first second");
    }
}

//! Markdown stripping for plain-text output.
//!
//! Streaming answers arrive in pieces, so the filter remembers whether it is
//! inside a fenced code block between calls.

use regex::{Regex, RegexSet};

/// Line shapes that are dropped outright.
const LINE_PATTERNS: [&str; 6] = [
    r"^#{1,6}\s",         // heading
    r"^\s*[-+*]\s+",      // bullet list
    r"^\d+\.\s+",         // numbered list
    r"^>\s+",             // block quote
    r"^!\[.*?\]\(.*?\)",  // image
    r"^\[.*?\]\(.*?\)",   // link
];

const FENCE: &str = "```";

/// Stateful Markdown-to-text filter.
#[derive(Debug)]
pub struct MarkdownFilter {
    line_patterns: RegexSet,
    inline_code: Regex,
    in_code_block: bool,
}

impl MarkdownFilter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            line_patterns: RegexSet::new(LINE_PATTERNS)?,
            inline_code: Regex::new(r"`[^`]*`")?,
            in_code_block: false,
        })
    }

    /// Filter one piece of text.  Returns the surviving lines joined with
    /// `\n`; the result is empty when nothing survives.
    pub fn apply(&mut self, text: &str) -> String {
        let mut kept = Vec::new();

        for line in text.split('\n') {
            let line = line.trim();

            if line.starts_with(FENCE) {
                self.in_code_block = !self.in_code_block;
                continue;
            }
            if self.in_code_block || self.line_patterns.is_match(line) {
                continue;
            }

            let stripped = self.inline_code.replace_all(line, "");
            let stripped = stripped.trim();
            if !stripped.is_empty() {
                kept.push(stripped.to_owned());
            }
        }

        kept.join("\n")
    }
}

/// Feeds streamed increments to a [`MarkdownFilter`] one whole line at a
/// time, so line patterns never see a fragment.
#[derive(Debug)]
pub struct LineFilter {
    filter: MarkdownFilter,
    pending: String,
}

impl LineFilter {
    pub fn new(filter: MarkdownFilter) -> Self {
        Self {
            filter,
            pending: String::new(),
        }
    }

    /// Buffer `delta` and filter every line it completed.
    pub fn push(&mut self, delta: &str) -> String {
        self.pending.push_str(delta);
        let Some(end) = self.pending.rfind('\n') else {
            return String::new();
        };
        let complete: String = self.pending.drain(..=end).collect();
        self.filter.apply(&complete)
    }

    /// Filter the unterminated tail once the stream has ended.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        self.filter.apply(&rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> MarkdownFilter {
        MarkdownFilter::new().unwrap()
    }

    #[test]
    fn drops_structural_lines() {
        let text = "# Title\n- item\n* other\n1. first\n> quoted\n![img](a.png)\n[link](b)\nplain text";
        assert_eq!(filter().apply(text), "plain text");
    }

    #[test]
    fn removes_inline_code_and_trims() {
        assert_eq!(filter().apply("  run `cargo` now  \n\n"), "run  now");
        assert_eq!(filter().apply("`only code`"), "");
    }

    #[test]
    fn code_fence_state_spans_calls() {
        let mut f = filter();
        assert_eq!(f.apply("before\n```rust"), "before");
        assert_eq!(f.apply("let x = 1;"), "");
        assert_eq!(f.apply("```\nafter"), "after");
    }

    #[test]
    fn keeps_text_that_only_looks_similar() {
        let mut f = filter();
        assert_eq!(f.apply("#hashtag"), "#hashtag");
        assert_eq!(f.apply("3.14 is pi"), "3.14 is pi");
    }

    #[test]
    fn line_filter_joins_fragments_before_filtering() {
        let mut lines = LineFilter::new(filter());
        assert_eq!(lines.push("Hel"), "");
        assert_eq!(lines.push("lo wor"), "");
        assert_eq!(lines.push("ld\n- item\nnext"), "Hello world");
        assert_eq!(lines.push(" 1. line\n"), "next 1. line");
        assert_eq!(lines.finish(), "");
    }

    #[test]
    fn line_filter_flushes_tail_and_tracks_fences() {
        let mut lines = LineFilter::new(filter());
        assert_eq!(lines.push("``"), "");
        assert_eq!(lines.push("`\ncode\n```\nte"), "");
        assert_eq!(lines.finish(), "te");
    }
}

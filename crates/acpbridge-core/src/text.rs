//! Text helpers for rendering file contents and titles.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?m)^`{3,}").expect("static regex is valid"));

/// Result of [`extract_lines_with_byte_limit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLines {
    pub content: String,
    pub was_limited: bool,
    pub lines_read: usize,
}

/// Take whole lines from `text` while the total stays within `limit` bytes.
///
/// The first line is always included even when it alone exceeds the limit.
/// Empty input reports one line read, and a trailing newline is followed by
/// one more (empty) line.
pub fn extract_lines_with_byte_limit(text: &str, limit: usize) -> ExtractedLines {
    if text.is_empty() {
        return ExtractedLines {
            content: String::new(),
            was_limited: false,
            lines_read: 1,
        };
    }

    let mut lines_read = 0;
    let mut end = 0;
    let mut was_limited = false;

    loop {
        match text[end..].find('\n') {
            Some(offset) => {
                let next_end = end + offset + 1;
                if lines_read > 0 && next_end > limit {
                    was_limited = true;
                    break;
                }
                lines_read += 1;
                end = next_end;
            }
            None => {
                // Text after the final newline counts as a line, even when empty.
                if lines_read > 0 && text.len() > limit {
                    was_limited = true;
                    break;
                }
                lines_read += 1;
                end = text.len();
                break;
            }
        }
    }

    ExtractedLines {
        content: text[..end].to_string(),
        was_limited,
        lines_read,
    }
}

/// Wrap `text` in a code fence longer than any fence it contains.
pub fn markdown_escape(text: &str) -> String {
    let longest = FENCE_RUN
        .find_iter(text)
        .map(|m| m.as_str().len())
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    let trailing = if text.ends_with('\n') { "" } else { "\n" };
    format!("{fence}\n{text}{trailing}{fence}")
}

/// Collapse whitespace runs to single spaces and cap the result at
/// `max_chars` characters, ending truncated titles with `…`.
pub fn sanitize_title(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    if max_chars <= 1 {
        return collapsed.chars().take(max_chars).collect();
    }
    let mut out: String = collapsed.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str, limit: usize) -> (String, bool, usize) {
        let r = extract_lines_with_byte_limit(text, limit);
        (r.content, r.was_limited, r.lines_read)
    }

    #[test]
    fn empty_input_reads_one_line() {
        assert_eq!(extract("", 10), (String::new(), false, 1));
    }

    #[test]
    fn everything_fits() {
        assert_eq!(extract("a\nb\nc", 100), ("a\nb\nc".into(), false, 3));
        assert_eq!(extract("a\nb\n", 100), ("a\nb\n".into(), false, 3));
    }

    #[test]
    fn limit_between_lines_keeps_complete_lines() {
        assert_eq!(
            extract("line1\nline2\nline3\n", 12),
            ("line1\nline2\n".into(), true, 2)
        );
        assert_eq!(extract("line1\nline2\nline3", 14), ("line1\nline2\n".into(), true, 2));
    }

    #[test]
    fn first_line_always_included() {
        assert_eq!(extract("a very long first line\nnext", 5), ("a very long first line\n".into(), true, 1));
        assert_eq!(extract("oversized", 3), ("oversized".into(), false, 1));
    }

    #[test]
    fn escape_uses_plain_fence() {
        assert_eq!(markdown_escape("hello"), "```\nhello\n```");
        assert_eq!(markdown_escape("hello\n"), "```\nhello\n```");
    }

    #[test]
    fn escape_outgrows_embedded_fences() {
        let text = "```rust\nfn x() {}\n```";
        assert_eq!(markdown_escape(text), format!("````\n{text}\n````"));
        let text = "`````\ninner\n`````\n";
        assert_eq!(markdown_escape(text), format!("``````\n{text}``````"));
    }

    #[test]
    fn titles_are_collapsed_and_truncated() {
        assert_eq!(sanitize_title("  fix\n the   bug ", 50), "fix the bug");
        assert_eq!(sanitize_title("abcdefghij", 5), "abcd…");
        assert_eq!(sanitize_title("日本語のタイトル", 4), "日本語…");
        assert_eq!(sanitize_title("abc", 1), "a");
    }
}

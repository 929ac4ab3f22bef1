//! Unified diff engine.
//!
//! [`compute_hunks`] builds a longest-common-subsequence edit script over the
//! lines of two texts and groups the changes into hunks with three lines of
//! context. [`parse_diff`] reads unified diff text back into [`DiffPatch`]
//! values so edit results can be turned into structured diff content.

use std::fmt::Write as _;

/// Context lines kept around each change.
pub const CONTEXT_LINES: usize = 3;

/// One line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Added(String),
    Removed(String),
}

impl DiffLine {
    const fn prefix(&self) -> char {
        match self {
            Self::Context(_) => ' ',
            Self::Added(_) => '+',
            Self::Removed(_) => '-',
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Context(s) | Self::Added(s) | Self::Removed(s) => s,
        }
    }
}

/// A contiguous region of changes.
///
/// Starts are 1-based as rendered in the `@@` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Lines present before the change (context and removed).
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, DiffLine::Added(_)))
            .map(DiffLine::text)
            .collect()
    }

    /// Lines present after the change (context and added).
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, DiffLine::Removed(_)))
            .map(DiffLine::text)
            .collect()
    }

    /// Whether the hunk adds or removes anything.
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|l| !matches!(l, DiffLine::Context(_)))
    }
}

/// A parsed patch for a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPatch {
    pub old_file: String,
    pub new_file: String,
    pub hunks: Vec<DiffHunk>,
}

impl DiffPatch {
    /// File name the patch applies to, preferring the new name.
    pub fn file_name(&self) -> &str {
        if self.new_file.is_empty() {
            &self.old_file
        } else {
            &self.new_file
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Insert,
    Delete,
}

#[derive(Debug, Clone, Copy)]
struct Edit<'a> {
    op: Op,
    line: &'a str,
    old_index: usize,
    new_index: usize,
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').collect()
    }
}

/// Minimal edit script from a longest-common-subsequence table.
fn edit_script<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Edit<'a>> {
    let (m, n) = (old.len(), new.len());
    let width = n + 1;
    let mut lcs = vec![0usize; (m + 1) * width];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            lcs[i * width + j] = if old[i] == new[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(m + n);
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if old[i] == new[j] {
            ops.push(Edit { op: Op::Equal, line: old[i], old_index: i, new_index: j });
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            ops.push(Edit { op: Op::Delete, line: old[i], old_index: i, new_index: j });
            i += 1;
        } else {
            ops.push(Edit { op: Op::Insert, line: new[j], old_index: i, new_index: j });
            j += 1;
        }
    }
    for (k, line) in old.iter().enumerate().skip(i) {
        ops.push(Edit { op: Op::Delete, line: *line, old_index: k, new_index: j });
    }
    for (k, line) in new.iter().enumerate().skip(j) {
        ops.push(Edit { op: Op::Insert, line: *line, old_index: m, new_index: k });
    }
    ops
}

fn build_hunk(ops: &[Edit<'_>]) -> DiffHunk {
    let mut hunk = DiffHunk::default();
    if let Some(first) = ops.first() {
        hunk.old_start = first.old_index + 1;
        hunk.new_start = first.new_index + 1;
    }
    for edit in ops {
        let line = edit.line.to_string();
        match edit.op {
            Op::Equal => {
                hunk.old_count += 1;
                hunk.new_count += 1;
                hunk.lines.push(DiffLine::Context(line));
            }
            Op::Delete => {
                hunk.old_count += 1;
                hunk.lines.push(DiffLine::Removed(line));
            }
            Op::Insert => {
                hunk.new_count += 1;
                hunk.lines.push(DiffLine::Added(line));
            }
        }
    }
    // An empty side points at the line before the change.
    if hunk.old_count == 0 {
        hunk.old_start -= 1;
    }
    if hunk.new_count == 0 {
        hunk.new_start -= 1;
    }
    hunk
}

/// Compute the hunks that turn `old` into `new`.
///
/// Changes separated by at most `2 * CONTEXT_LINES` unchanged lines share a hunk.
pub fn compute_hunks(old: &str, new: &str) -> Vec<DiffHunk> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let ops = edit_script(&old_lines, &new_lines);

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, e)| e.op != Op::Equal)
        .map(|(i, _)| i)
        .collect();

    let mut hunks = Vec::new();
    let mut idx = 0;
    while idx < changes.len() {
        let first = changes[idx];
        let mut last = first;
        idx += 1;
        while idx < changes.len() && changes[idx] - last - 1 <= 2 * CONTEXT_LINES {
            last = changes[idx];
            idx += 1;
        }
        let begin = first.saturating_sub(CONTEXT_LINES);
        let end = (last + CONTEXT_LINES).min(ops.len() - 1);
        hunks.push(build_hunk(&ops[begin..=end]));
    }
    hunks
}

fn render_hunks(out: &mut String, hunks: &[DiffHunk]) {
    for hunk in hunks {
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
        );
        for line in &hunk.lines {
            out.push(line.prefix());
            out.push_str(line.text());
            out.push('\n');
        }
    }
}

/// Render the hunks between `old` and `new`. Identical inputs yield an empty string.
pub fn compute_diff(old: &str, new: &str) -> String {
    let mut out = String::new();
    render_hunks(&mut out, &compute_hunks(old, new));
    out
}

/// Render a complete patch with `--- a/` and `+++ b/` headers for `path`.
///
/// Returns an empty string when nothing changed.
pub fn create_unified_diff(path: &str, old: &str, new: &str) -> String {
    let hunks = compute_hunks(old, new);
    if hunks.is_empty() {
        return String::new();
    }
    let mut out = format!("--- a/{path}\n+++ b/{path}\n");
    render_hunks(&mut out, &hunks);
    out
}

/// Range numbers from a `@@ -a,b +c,d @@` header.
///
/// Missing counts default to 1. Returns `None` if the header has no `+` range.
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    fn range(part: &str) -> Option<(usize, usize)> {
        let (start, count) = match part.split_once(',') {
            Some((s, c)) => (s, Some(c)),
            None => (part, None),
        };
        let start = start.parse().ok()?;
        let count = match count {
            Some(c) => c.parse().ok()?,
            None => 1,
        };
        Some((start, count))
    }

    let body = line.strip_prefix("@@")?.trim_start();
    let mut parts = body.split_whitespace();
    let old = parts.next()?.strip_prefix('-').and_then(range);
    let new = parts.next()?.strip_prefix('+').and_then(range)?;
    let (old_start, old_count) = old.unwrap_or((0, 0));
    Some((old_start, old_count, new.0, new.1))
}

/// Leading digits after the first `+`, defaulting to 1 when absent or zero.
fn new_start_fallback(line: &str) -> usize {
    line.split_once('+')
        .map(|(_, rest)| {
            rest.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
        })
        .and_then(|digits| digits.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

struct OpenHunk {
    hunk: DiffHunk,
    /// Remaining (old, new) line budget, when the header declared one.
    remaining: Option<(usize, usize)>,
}

impl OpenHunk {
    fn is_full(&self) -> bool {
        matches!(self.remaining, Some((0, 0)))
    }

    fn push(&mut self, line: DiffLine) {
        if let Some((old, new)) = self.remaining.as_mut() {
            match line {
                DiffLine::Context(_) => {
                    *old = old.saturating_sub(1);
                    *new = new.saturating_sub(1);
                }
                DiffLine::Removed(_) => *old = old.saturating_sub(1),
                DiffLine::Added(_) => *new = new.saturating_sub(1),
            }
        }
        self.hunk.lines.push(line);
    }
}

#[derive(Default)]
struct PatchBuilder {
    patches: Vec<DiffPatch>,
    current: Option<DiffPatch>,
    hunk: Option<OpenHunk>,
}

impl PatchBuilder {
    fn close_hunk(&mut self) {
        if let Some(open) = self.hunk.take() {
            self.current.get_or_insert_with(DiffPatch::default).hunks.push(open.hunk);
        }
    }

    fn close_patch(&mut self) {
        self.close_hunk();
        if let Some(patch) = self.current.take() {
            self.patches.push(patch);
        }
    }

    fn feed(&mut self, line: &str) {
        let in_bounded_hunk = self
            .hunk
            .as_ref()
            .is_some_and(|h| h.remaining.is_some() && !h.is_full());

        if !in_bounded_hunk {
            if let Some(name) = line.strip_prefix("--- ") {
                self.close_patch();
                self.current = Some(DiffPatch {
                    old_file: name.to_string(),
                    ..DiffPatch::default()
                });
                return;
            }
            if let Some(name) = line.strip_prefix("+++ ")
                && self.hunk.is_none()
                && let Some(patch) = self.current.as_mut()
            {
                patch.new_file = name.to_string();
                return;
            }
            if line.starts_with("@@") {
                self.close_hunk();
                let hunk = match parse_hunk_header(line) {
                    Some((old_start, old_count, new_start, new_count)) => OpenHunk {
                        hunk: DiffHunk {
                            old_start,
                            old_count,
                            new_start: if new_start == 0 { 1 } else { new_start },
                            new_count,
                            lines: Vec::new(),
                        },
                        remaining: Some((old_count, new_count)),
                    },
                    None => OpenHunk {
                        hunk: DiffHunk {
                            new_start: new_start_fallback(line),
                            ..DiffHunk::default()
                        },
                        remaining: None,
                    },
                };
                self.hunk = Some(hunk);
                return;
            }
        }

        let Some(open) = self.hunk.as_mut() else {
            return;
        };
        if open.is_full() {
            return;
        }
        if let Some(rest) = line.strip_prefix('+') {
            open.push(DiffLine::Added(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix('-') {
            open.push(DiffLine::Removed(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            open.push(DiffLine::Context(rest.to_string()));
        } else if line.is_empty() && open.remaining.is_some() {
            // Some tools strip the single space from blank context lines.
            open.push(DiffLine::Context(String::new()));
        }
    }
}

/// Parse unified diff text into patches.
///
/// Accepts several patches and several hunks per patch. Hunks that appear
/// without a `---` header are collected into a patch with empty file names.
/// Lines outside any hunk are ignored.
pub fn parse_diff(text: &str) -> Vec<DiffPatch> {
    let mut builder = PatchBuilder::default();
    for line in text.split('\n') {
        builder.feed(line.strip_suffix('\r').unwrap_or(line));
    }
    builder.close_patch();
    builder.patches
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Rebuild the new text from the old one using parsed hunks.
    fn apply(old: &str, patch: &DiffPatch) -> String {
        let old_lines = split_lines(old);
        let mut out: Vec<String> = Vec::new();
        let mut cursor = 0;
        for hunk in &patch.hunks {
            let start = if hunk.old_count == 0 { hunk.old_start } else { hunk.old_start - 1 };
            out.extend(old_lines[cursor..start].iter().map(ToString::to_string));
            out.extend(hunk.new_lines().into_iter().map(str::to_string));
            cursor = start + hunk.old_count;
        }
        out.extend(old_lines[cursor..].iter().map(ToString::to_string));
        out.join("\n")
    }

    fn round_trip(old: &str, new: &str) {
        let patches = parse_diff(&compute_diff(old, new));
        if old == new {
            assert!(patches.is_empty());
            return;
        }
        assert_eq!(patches.len(), 1);
        assert_eq!(apply(old, &patches[0]), new);
        let removed: Vec<&str> = patches[0]
            .hunks
            .iter()
            .flat_map(DiffHunk::old_lines)
            .collect();
        for line in removed {
            assert!(old.split('\n').any(|l| l == line));
        }
    }

    #[test]
    fn identical_texts_produce_empty_diff() {
        assert_eq!(compute_diff("a\nb\nc", "a\nb\nc"), "");
        assert_eq!(compute_diff("", ""), "");
        assert_eq!(create_unified_diff("f.txt", "x", "x"), "");
    }

    #[test]
    fn inserted_line_has_no_removals() {
        let diff = compute_diff("line1\nline3", "line1\nline2\nline3");
        assert_eq!(diff, "@@ -1,2 +1,3 @@\n line1\n+line2\n line3\n");
        let patches = parse_diff(&diff);
        let hunk = &patches[0].hunks[0];
        assert!(hunk.lines.contains(&DiffLine::Added("line2".into())));
        assert!(!hunk.lines.iter().any(|l| matches!(l, DiffLine::Removed(_))));
    }

    #[test]
    fn unified_diff_has_file_headers() {
        let diff = create_unified_diff("src/main.rs", "a\nb", "a\nc");
        assert!(diff.starts_with("--- a/src/main.rs\n+++ b/src/main.rs\n@@ -1,2 +1,2 @@\n"));
        assert!(diff.contains("-b\n+c\n"));
    }

    #[test]
    fn distant_changes_split_into_hunks() {
        let old: Vec<String> = (1..=30).map(|i| format!("l{i}")).collect();
        let mut new = old.clone();
        new[1] = "changed2".into();
        new[25] = "changed26".into();
        let hunks = compute_hunks(&old.join("\n"), &new.join("\n"));
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].old_start, 1);
        assert_eq!(hunks[1].new_start, 23);
        assert_eq!(hunks[1].old_count, 7);
    }

    #[test]
    fn nearby_changes_share_a_hunk() {
        let old = "a\nb\nc\nd\ne\nf\ng\nh\ni";
        let new = "A\nb\nc\nd\ne\nf\ng\nH\ni";
        assert_eq!(compute_hunks(old, new).len(), 1);
    }

    #[test]
    fn round_trips_recover_both_sides() {
        round_trip("a\nb\nc", "x\ny\nz");
        round_trip("", "new\nfile");
        round_trip("gone\nfile", "");
        round_trip("same\nsame", "same\nsame");
        round_trip(
            "fn main() {\n    println!(\"hi\");\n}\n",
            "fn main() {\n    let x = 1;\n    println!(\"{x}\");\n}\n",
        );
        let long_old: String = (0..40).map(|i| format!("row {i}\n")).collect();
        let long_new = long_old.replace("row 3\n", "row three\n").replace("row 30\n", "");
        round_trip(&long_old, &long_new);
    }

    #[test]
    fn parses_multiple_patches_and_hunks() {
        let text = "--- a/one.txt\n+++ b/one.txt\n@@ -1,1 +1,1 @@\n-a\n+b\n@@ -10,2 +10,2 @@\n x\n-y\n+z\n--- a/two.txt\n+++ b/two.txt\n@@ -3 +3 @@\n-old\n+new\n";
        let patches = parse_diff(text);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].file_name(), "b/one.txt");
        assert_eq!(patches[0].hunks.len(), 2);
        assert_eq!(patches[0].hunks[1].new_start, 10);
        assert_eq!(patches[1].hunks[0].new_start, 3);
        assert_eq!(patches[1].hunks[0].old_lines(), vec!["old"]);
    }

    #[test]
    fn removed_line_that_looks_like_header_stays_in_hunk() {
        let text = "--- a/f\n+++ b/f\n@@ -1,2 +1,1 @@\n--- not a header\n keep\n";
        let patches = parse_diff(text);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].hunks[0].old_lines(), vec!["-- not a header", "keep"]);
    }

    #[test]
    fn unparsable_header_defaults_new_start() {
        let patches = parse_diff("--- a/f\n+++ b/f\n@@ garbage @@\n+x\n");
        assert_eq!(patches[0].hunks[0].new_start, 1);
        let patches = parse_diff("--- a/f\n+++ b/f\n@@ -0,0 +0,0 @@\n");
        assert_eq!(patches[0].hunks[0].new_start, 1);
    }

    #[test]
    fn ignores_lines_outside_hunks() {
        let patches = parse_diff("diff --git a/f b/f\nindex 123..456\n--- a/f\n+++ b/f\n");
        assert_eq!(patches.len(), 1);
        assert!(patches[0].hunks.is_empty());
    }
}

//! Permission rule matching engine.
//!
//! Rules come from the `permissions` section of the settings files and use the
//! grammar `Tool`, `Tool(argument)` or `Tool(prefix:*)`. Only the bridge's own
//! `mcp__acp__` tools are evaluated; every other tool falls through to "ask".
//! Deny rules are checked first, then allow, then ask.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::settings::PermissionSettings;

/// Namespace of the tools served by the bridge itself.
pub const ACP_TOOL_PREFIX: &str = "mcp__acp__";
pub const ACP_READ: &str = "mcp__acp__Read";
pub const ACP_EDIT: &str = "mcp__acp__Edit";
pub const ACP_WRITE: &str = "mcp__acp__Write";
pub const ACP_BASH: &str = "mcp__acp__Bash";
pub const ACP_BASH_OUTPUT: &str = "mcp__acp__BashOutput";
pub const ACP_KILL_SHELL: &str = "mcp__acp__KillShell";

/// Tools covered by an `Edit` rule.
const FILE_EDITING_TOOLS: &[&str] = &[ACP_EDIT, ACP_WRITE];
/// Tools covered by a `Read` rule.
const FILE_READING_TOOLS: &[&str] = &[ACP_READ];

/// Operators that let a command chain another one after an allowed prefix.
const SHELL_OPERATORS: &[&str] = &["&&", "||", ";", "|", "$(", "`", "\n"];

static RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)(?:\((.+)\))?$").expect("static regex is valid"));

/// A rule string split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    pub tool_name: String,
    pub argument: Option<String>,
    /// `true` for `prefix:*` rules; `argument` then holds the prefix.
    pub is_wildcard: bool,
}

/// Parse a rule such as `Read`, `Read(./.env)` or `Bash(npm run:*)`.
///
/// Never fails: strings outside the grammar become a tool name with no argument.
pub fn parse_rule(rule: &str) -> ParsedRule {
    let Some(caps) = RULE_RE.captures(rule) else {
        return ParsedRule {
            tool_name: rule.to_string(),
            argument: None,
            is_wildcard: false,
        };
    };
    let tool_name = caps[1].to_string();
    match caps.get(2).map(|m| m.as_str()) {
        Some(arg) => match arg.strip_suffix(":*") {
            Some(prefix) => ParsedRule {
                tool_name,
                argument: Some(prefix.to_string()),
                is_wildcard: true,
            },
            None => ParsedRule {
                tool_name,
                argument: Some(arg.to_string()),
                is_wildcard: false,
            },
        },
        None => ParsedRule {
            tool_name,
            argument: None,
            is_wildcard: false,
        },
    }
}

fn contains_shell_operator(s: &str) -> bool {
    SHELL_OPERATORS.iter().any(|op| s.contains(op))
}

/// Make `path` absolute against `cwd`, expand a leading `~/` and resolve
/// `.` and `..` lexically. Separators are always `/`.
pub fn normalize_path(path: &str, cwd: &Path) -> String {
    let joined: PathBuf = if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        }
    } else if let Some(rest) = path.strip_prefix("./") {
        cwd.join(rest)
    } else if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        cwd.join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    let out = cleaned.to_string_lossy().into_owned();
    if cfg!(windows) {
        out.replace('\\', "/")
    } else {
        out
    }
}

/// Compile a path glob into an anchored regex.
///
/// `*` and `?` stay within one path segment, `**` crosses segments wherever it
/// appears, `[...]`/`[!...]` are character classes and `{a,b}` alternates
/// (nesting allowed). A backslash escapes the next character.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push_str(".*");
                i += 1;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                out.push_str(&regex::escape(chars[i].encode_utf8(&mut [0; 4])));
            }
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) => {
                    let body = &chars[i + 1..i + 1 + len];
                    out.push('[');
                    let body = match body.first() {
                        Some('!' | '^') => {
                            out.push('^');
                            &body[1..]
                        }
                        _ => body,
                    };
                    for &c in body {
                        if c == '-' {
                            out.push('-');
                        } else {
                            out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
                        }
                    }
                    out.push(']');
                    i += len + 1;
                }
                None => out.push_str(r"\["),
            },
            '{' => {
                depth += 1;
                out.push_str("(?:");
            }
            ',' if depth > 0 => out.push('|'),
            '}' if depth > 0 => {
                depth -= 1;
                out.push(')');
            }
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out)
}

/// `None` when the pattern cannot be compiled.
fn matches_glob(pattern: &str, path: &str, cwd: &Path) -> Option<bool> {
    let pattern = normalize_path(pattern, cwd);
    let path = normalize_path(path, cwd);
    match glob_to_regex(&pattern) {
        Ok(re) => Some(re.is_match(&path)),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid permission glob");
            None
        }
    }
}

/// The argument of `tool_name` that rules are matched against.
fn rule_argument<'a>(tool_name: &str, input: &'a Value) -> Option<&'a str> {
    let key = match tool_name {
        ACP_READ | ACP_EDIT | ACP_WRITE => "file_path",
        ACP_BASH => "command",
        _ => return None,
    };
    Some(input.get(key).and_then(Value::as_str).unwrap_or(""))
}

/// Whether `rule` covers this invocation of `tool_name`.
///
/// A path rule whose glob does not compile never matches here;
/// [`check_permission`] treats such a deny rule as matching.
pub fn rule_matches(rule: &ParsedRule, tool_name: &str, input: &Value, cwd: &Path) -> bool {
    evaluate_rule(rule, tool_name, input, cwd).unwrap_or(false)
}

fn evaluate_rule(rule: &ParsedRule, tool_name: &str, input: &Value, cwd: &Path) -> Option<bool> {
    let applies = match rule.tool_name.as_str() {
        "Bash" => tool_name == ACP_BASH,
        "Edit" => FILE_EDITING_TOOLS.contains(&tool_name),
        "Read" => FILE_READING_TOOLS.contains(&tool_name),
        _ => false,
    };
    if !applies {
        return Some(false);
    }

    // `Tool(:*)` leaves an empty prefix, which covers every call.
    let Some(expected) = rule.argument.as_deref().filter(|a| !a.is_empty()) else {
        return Some(true);
    };
    let Some(actual) = rule_argument(tool_name, input) else {
        return Some(true);
    };
    if actual.is_empty() {
        return Some(false);
    }

    if tool_name == ACP_BASH {
        if rule.is_wildcard {
            // Only the remainder is scanned; the prefix itself is trusted.
            return Some(
                actual
                    .strip_prefix(expected)
                    .is_some_and(|rest| !contains_shell_operator(rest)),
            );
        }
        return Some(actual == expected);
    }

    matches_glob(expected, actual, cwd)
}

/// Outcome of a rule check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
    #[default]
    Ask,
}

/// Decision plus the rule text that produced it, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionCheck {
    pub decision: PermissionDecision,
    pub rule: Option<String>,
}

impl PermissionCheck {
    fn matched(decision: PermissionDecision, rule: &str) -> Self {
        Self {
            decision,
            rule: Some(rule.to_string()),
        }
    }
}

/// Evaluate `tool_name` with `input` against merged permission rules.
///
/// Rules are re-parsed on each call so settings changes take effect immediately.
pub fn check_permission(
    permissions: &PermissionSettings,
    tool_name: &str,
    input: &Value,
    cwd: &Path,
) -> PermissionCheck {
    if !tool_name.starts_with(ACP_TOOL_PREFIX) {
        return PermissionCheck::default();
    }

    let lists = [
        (&permissions.deny, PermissionDecision::Deny),
        (&permissions.allow, PermissionDecision::Allow),
        (&permissions.ask, PermissionDecision::Ask),
    ];
    for (rules, decision) in lists {
        let hit = rules.iter().find(|r| {
            // A deny rule that cannot be evaluated still denies.
            evaluate_rule(&parse_rule(r), tool_name, input, cwd)
                .unwrap_or(decision == PermissionDecision::Deny)
        });
        if let Some(rule) = hit {
            return PermissionCheck::matched(decision, rule);
        }
    }
    PermissionCheck::default()
}

//! Shared utilities for CVR.

const MASK: &str = "***";

/// Environment variable name suffixes whose values are never logged.
const SENSITIVE_SUFFIXES: &[&str] = &[
    "TOKEN",
    "SECRET",
    "PASSWORD",
    "PASS",
    "API_KEY",
    "PRIVATE_KEY",
    "ACCESS_KEY_ID",
    "SECRET_ACCESS_KEY",
    "DATABASE_URL",
];

/// Flags whose argument (`--flag value` or `--flag=value`) is never logged.
const SENSITIVE_FLAGS: &[&str] = &["--token", "--password", "--api-key", "--secret"];

/// Byte length of the shell word at the start of `s`, honoring quotes and
/// backslash escapes.
fn word_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
        } else if c == '"' || c == '\'' {
            in_quote = Some(c);
        } else if c.is_whitespace() {
            break;
        }
        end += char_len;
    }
    end
}

fn is_sensitive_name(name: &str) -> bool {
    if SENSITIVE_FLAGS.contains(&name) {
        return true;
    }
    let is_env_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    is_env_name && SENSITIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Mask credentials in a command line before it is logged.
///
/// Values of `NAME=value` assignments whose name looks like a credential
/// (`GITHUB_TOKEN`, `DB_PASSWORD`, ...) and arguments of `--token`-style
/// flags are replaced with `***`. Whitespace is preserved.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let mut out = String::with_capacity(cmd.len());
    let mut rest = cmd;
    let mut mask_next = false;

    while !rest.is_empty() {
        let trimmed = rest.trim_start();
        out.push_str(&rest[..rest.len() - trimmed.len()]);
        rest = trimmed;
        if rest.is_empty() {
            break;
        }

        let end = word_end(rest);
        let word = &rest[..end];
        if mask_next {
            out.push_str(MASK);
            mask_next = false;
        } else if let Some((name, _)) = word.split_once('=')
            && is_sensitive_name(name)
        {
            out.push_str(name);
            out.push('=');
            out.push_str(MASK);
        } else if SENSITIVE_FLAGS.contains(&word) {
            out.push_str(word);
            mask_next = true;
        } else {
            out.push_str(word);
        }
        rest = &rest[end..];
    }

    out
}

/// Truncate to at most `max` characters, marking the cut with `…`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push('…');
    out
}

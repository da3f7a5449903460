//! Quoting helpers for command lines executed through a remote shell.

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Escapes `value` for interpolation inside a double-quoted shell string.
///
/// Backslash, `$`, both quote characters, `!`, `#`, `%` and backtick are
/// prefixed with a backslash; a tab becomes the two characters `\t`. The
/// remote init scripts rely on exactly this set.
#[must_use]
pub fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' | '$' | '"' | '\'' | '!' | '#' | '%' | '`' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Quotes a single shell word (paths, container names) when needed.
#[must_use]
pub fn quote(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

//! Host-set resolution for compact range expressions.
//!
//! Operators name the machines of a fleet with expressions such as
//! `mach[1-4]` or `val[0,2,5-7]-eu;seed`. [`resolve`] expands an expression
//! into an ordered list of [`HostName`]s, refusing duplicates and runaway
//! ranges. The function is pure: it performs no I/O.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

/// Largest permitted distance between the bounds of a numeric range.
pub const MAX_RANGE_SPAN: u64 = 1000;

const SEGMENT_SEPARATOR: char = ';';
const TOKEN_SEPARATOR: char = ',';
const RANGE_SEPARATOR: char = '-';

/// Name of a provisioning target as understood by the machine tool.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HostName(String);

impl HostName {
    /// Wraps an already validated host name.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the host name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl AsRef<str> for HostName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors raised while expanding a host range expression.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostRangeError {
    /// Raised when a segment does not follow the range grammar.
    #[error("invalid host range segment '{segment}': {reason}")]
    Parse {
        /// Segment that failed to parse.
        segment: String,
        /// Description of the problem.
        reason: String,
    },
    /// Raised when the expansion names the same host twice.
    #[error("duplicate host {host}")]
    Duplicate {
        /// Host that appeared more than once.
        host: String,
    },
}

/// Expands a host range expression into an ordered, duplicate-free list.
///
/// Segments are separated by `;`. Each segment is either a literal host name
/// or a template `prefix[list]suffix`, where `list` is a comma-separated list
/// of literal tokens and inclusive numeric ranges `start-end`. Hosts appear
/// in the order they were written; ranges expand in ascending order.
///
/// An empty expression resolves to an empty list.
///
/// # Errors
///
/// Returns [`HostRangeError::Parse`] for malformed segments or invalid
/// ranges, and [`HostRangeError::Duplicate`] when a host would be listed
/// twice.
pub fn resolve(expression: &str) -> Result<Vec<HostName>, HostRangeError> {
    if expression.is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = BTreeSet::new();
    let mut hosts = Vec::new();
    for segment in expression.split(SEGMENT_SEPARATOR) {
        for host in expand_segment(segment)? {
            if !seen.insert(host.clone()) {
                return Err(HostRangeError::Duplicate { host });
            }
            hosts.push(HostName(host));
        }
    }
    Ok(hosts)
}

fn expand_segment(segment: &str) -> Result<Vec<String>, HostRangeError> {
    let Some((prefix, rest)) = segment.split_once('[') else {
        if segment.contains(']') {
            return Err(parse_error(segment, "closing bracket without opening bracket"));
        }
        require_name_chars(segment, segment, "host name")?;
        return Ok(vec![segment.to_owned()]);
    };

    let Some((list, suffix)) = rest.split_once(']') else {
        return Err(parse_error(segment, "opening bracket is never closed"));
    };
    if list.contains('[') || suffix.contains('[') || suffix.contains(']') {
        return Err(parse_error(segment, "only one bracketed range is allowed"));
    }
    if list.is_empty() {
        return Err(parse_error(segment, "bracketed range is empty"));
    }
    if !prefix.is_empty() {
        require_name_chars(segment, prefix, "prefix")?;
    }
    if !suffix.is_empty() {
        require_name_chars(segment, suffix, "suffix")?;
    }

    let mut hosts = Vec::new();
    for token in expand_list(segment, list)? {
        hosts.push(format!("{prefix}{token}{suffix}"));
    }
    Ok(hosts)
}

fn expand_list(segment: &str, list: &str) -> Result<Vec<String>, HostRangeError> {
    let mut tokens = Vec::new();
    for token in list.split(TOKEN_SEPARATOR) {
        let Some((start, end)) = token.split_once(RANGE_SEPARATOR) else {
            require_name_chars(segment, token, "range token")?;
            tokens.push(token.to_owned());
            continue;
        };
        let start_num = parse_bound(segment, start)?;
        let end_num = parse_bound(segment, end)?;
        if start_num > end_num || end_num - start_num > MAX_RANGE_SPAN {
            return Err(parse_error(
                segment,
                &format!("invalid range {start_num}-{end_num}"),
            ));
        }
        tokens.extend((start_num..=end_num).map(|value| value.to_string()));
    }
    Ok(tokens)
}

fn parse_bound(segment: &str, bound: &str) -> Result<u64, HostRangeError> {
    if bound.is_empty() || !bound.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(parse_error(
            segment,
            &format!("range bound '{bound}' is not a non-negative integer"),
        ));
    }
    bound
        .parse::<u64>()
        .map_err(|err| parse_error(segment, &format!("range bound '{bound}': {err}")))
}

fn require_name_chars(segment: &str, value: &str, what: &str) -> Result<(), HostRangeError> {
    if value.is_empty() {
        return Err(parse_error(segment, &format!("{what} must not be empty")));
    }
    if let Some(bad) = value.chars().find(|ch| !is_name_char(*ch)) {
        return Err(parse_error(
            segment,
            &format!("{what} contains unsupported character '{bad}'"),
        ));
    }
    Ok(())
}

const fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

fn parse_error(segment: &str, reason: &str) -> HostRangeError {
    HostRangeError::Parse {
        segment: segment.to_owned(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests;

//! Control-port reply grammar.
//!
//! A reply is one or more lines of the form `<code><sep><text>`:
//!
//! ```text
//! 250-ServiceID=abcdefghijklmnop        mid-reply line
//! 250+onions/detached=                  data line, followed by a dot-terminated block
//! 250 OK                                final line
//! ```
//!
//! Lines may end in CRLF or LF. Every line of a reply carries the same code.

use crate::error::{Error, Result};

/// Success.
pub const STATUS_OK: u16 = 250;

/// ADD_ONION: the daemon already hosts a service with this key.
pub const STATUS_ONION_COLLISION: u16 = 550;

/// How a reply line continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind {
    /// `-`: more lines follow.
    Mid,
    /// `+`: a dot-terminated data block follows, then more lines.
    Data,
    /// ` `: last line of the reply.
    End,
}

/// One parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReplyLine {
    pub code: u16,
    pub kind: LineKind,
    pub text: String,
}

/// Strip the line terminator (CRLF or LF).
pub(crate) fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Parse a single `<code><sep><text>` line (terminator already removed).
pub(crate) fn parse_line(line: &str) -> Result<ReplyLine> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(Error::Protocol(format!("malformed reply line: {:?}", line)));
    }

    let code = line[..3]
        .parse::<u16>()
        .map_err(|_| Error::Protocol(format!("malformed status code: {:?}", line)))?;

    let kind = match bytes.get(3) {
        Some(b'-') => LineKind::Mid,
        Some(b'+') => LineKind::Data,
        Some(b' ') => LineKind::End,
        // A bare code is a final line with no text.
        None => LineKind::End,
        Some(_) => {
            return Err(Error::Protocol(format!("malformed reply separator: {:?}", line)));
        }
    };

    let text = line.get(4..).unwrap_or("").to_string();

    Ok(ReplyLine { code, kind, text })
}

/// A complete reply from the control port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    /// Build a reply from its status code and prefix-stripped lines.
    pub fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Status code shared by every line.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Whether the status is 250.
    pub fn is_ok(&self) -> bool {
        self.code == STATUS_OK
    }

    /// All lines, `<code><sep>` prefixes removed, data blocks inline.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Text of the final line (usually `OK` or the error message).
    pub fn message(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }

    /// Value of the first `key=value` token in any line.
    ///
    /// Keys match case-sensitively. Returns `None` when no token carries the key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| find_field(line, key))
    }
}

/// Find `key=value` among the space-separated tokens of `line`.
pub(crate) fn find_field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split(' ').find_map(|token| {
        token
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
    })
}

/// Parse a control-protocol quoted string at the start of `input`.
///
/// Returns the unescaped contents and the remainder after the closing quote.
pub(crate) fn parse_quoted(input: &str) -> Option<(String, &str)> {
    let rest = input.strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = rest.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &rest[i + 1..])),
            '\\' => {
                let (_, escaped) = chars.next()?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            other => out.push(other),
        }
    }

    None
}

/// Quote a value for the command line when the grammar requires it.
///
/// Bare values are kept verbatim; empty values and values containing
/// whitespace, quotes or backslashes become quoted strings.
pub(crate) fn quote_if_needed(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, ' ' | '"' | '\\' | '\t' | '\r' | '\n'));

    if needs_quotes {
        quote(value)
    } else {
        value.to_string()
    }
}

/// Always quote `value` as a QuotedString.
///
/// Backslash, double quote, CR, LF and tab are escaped, so the result never
/// spans more than one line.
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

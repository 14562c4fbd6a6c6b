//! Log redaction for control-port traffic.
//!
//! Everything written to `tracing` by this crate passes through these helpers
//! so that passwords, cookie-derived tokens, nonces and onion private keys
//! never reach log output.

use std::fmt;

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: fmt::Debug> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact an onion service id, showing only the first and last 4 characters.
pub struct RedactedOnion<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedOnion<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.is_ascii() && s.len() > 12 {
            write!(f, "{}...{}", &s[..4], &s[s.len() - 4..])
        } else {
            write!(f, "[REDACTED ONION]")
        }
    }
}

impl<'a> fmt::Debug for RedactedOnion<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a byte slice, showing only length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl<'a> fmt::Display for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a hex string, showing only first and last 4 characters.
pub struct RedactedHex<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedHex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.is_ascii() && s.len() > 12 {
            write!(f, "{}...{}", &s[..4], &s[s.len() - 4..])
        } else {
            write!(f, "[REDACTED HEX]")
        }
    }
}

/// Render a command for logging with its secret arguments removed.
///
/// `AUTHENTICATE` tokens and passwords are dropped entirely, the
/// `AUTHCHALLENGE` nonce is shortened and ADD_ONION key blobs are hidden.
pub fn redact_command(command: &str) -> String {
    let line = command.trim_end_matches(['\r', '\n']);
    let (keyword, args) = match line.split_once(' ') {
        Some((keyword, args)) => (keyword, Some(args)),
        None => (line, None),
    };

    match (keyword.to_ascii_uppercase().as_str(), args) {
        ("AUTHENTICATE", Some(_)) => format!("{} {}", keyword, Redacted("")),
        ("AUTHCHALLENGE", Some(args)) => match args.split_once(' ') {
            Some((method, nonce)) => format!("{} {} {}", keyword, method, RedactedHex(nonce)),
            None => format!("{} {}", keyword, args),
        },
        ("ADD_ONION", Some(args)) => {
            let (key, rest) = args.split_once(' ').unwrap_or((args, ""));
            let key = match key.split_once(':') {
                Some(("NEW", _)) => key.to_string(),
                Some((key_type, _)) => format!("{}:{}", key_type, Redacted("")),
                None => key.to_string(),
            };
            format!("{} {} {}", keyword, key, rest).trim_end().to_string()
        }
        _ => line.to_string(),
    }
}

/// Render a reply line for logging, hiding any returned private key.
pub fn redact_reply_line(line: &str) -> String {
    line.split(' ')
        .map(|token| match token.split_once('=') {
            Some(("PrivateKey", value)) => {
                let key_type = value.split_once(':').map(|(t, _)| t).unwrap_or("");
                format!("PrivateKey={}:{}", key_type, Redacted(""))
            }
            Some((key @ ("SERVERHASH" | "SERVERNONCE"), value)) => {
                format!("{}={}", key, RedactedHex(value))
            }
            _ => token.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

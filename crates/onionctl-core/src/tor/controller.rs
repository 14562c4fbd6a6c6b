//! Tor ControlPort client implementation.
//!
//! Frames commands and replies over an already-open byte stream
//! (control-spec.txt, section 2). The protocol has no request ids, so a
//! controller handles one command at a time: every call writes exactly one
//! command and reads exactly one complete reply.

use super::connection::{self, BoxedControlStream, ControlConfig, ControlNetwork};
use super::reply::{self, LineKind, Reply};
use crate::error::{Error, Result};
use crate::logging::{redact_command, redact_reply_line};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

/// Longest reply line accepted, terminator included.
pub(crate) const MAX_LINE_LEN: usize = 64 * 1024;

/// Tor ControlPort client.
pub struct TorController<S = BoxedControlStream> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    authenticated: bool,
}

impl TorController {
    /// Dial `address` over `network` (`"tcp"` or `"unix"`).
    pub async fn open(network: &str, address: &str) -> Result<Self> {
        let config = ControlConfig {
            network: network.parse::<ControlNetwork>()?,
            address: address.to_string(),
            ..Default::default()
        };
        Self::open_with_config(&config).await
    }

    /// Dial the control port described by `config`.
    pub async fn open_with_config(config: &ControlConfig) -> Result<Self> {
        let stream = connection::dial(config).await?;
        Ok(Self::new(stream))
    }

    /// Connect to default Tor ControlPort (127.0.0.1:9051).
    pub async fn connect_default() -> Result<Self> {
        Self::open_with_config(&ControlConfig::default()).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> TorController<S> {
    /// Wrap an open, unauthenticated control connection.
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            authenticated: false,
        }
    }

    /// Whether an AUTHENTICATE on this connection has succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn set_authenticated(&mut self) {
        self.authenticated = true;
    }

    pub(crate) fn require_authenticated(&self) -> Result<()> {
        if self.authenticated {
            Ok(())
        } else {
            Err(Error::Auth("not authenticated".into()))
        }
    }

    /// Send a newline-terminated command and require status `expected`.
    ///
    /// Any other status is a protocol error carrying the reply text.
    pub async fn send_command(&mut self, command: &str, expected: u16) -> Result<Reply> {
        let reply = self.send_raw(command).await?;
        if reply.code() != expected {
            return Err(Error::Protocol(format!(
                "expected status {}, got {} {}",
                expected,
                reply.code(),
                reply.text()
            )));
        }
        Ok(reply)
    }

    /// Send a newline-terminated command and return whatever reply comes back.
    pub async fn send_raw(&mut self, command: &str) -> Result<Reply> {
        validate_command(command)?;

        tracing::debug!(command = %redact_command(command), "Sending control command");

        self.writer
            .write_all(command.as_bytes())
            .await
            .map_err(|e| Error::Connection(format!("failed to send command: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Connection(format!("failed to flush: {}", e)))?;

        let reply = self.read_reply().await?;
        tracing::debug!(code = reply.code(), "Received control reply");
        Ok(reply)
    }

    /// Read one complete reply, collecting mid-reply lines and data blocks.
    async fn read_reply(&mut self) -> Result<Reply> {
        let mut code = None;
        let mut lines = Vec::new();

        loop {
            let raw = self.read_line().await?;
            let line = reply::parse_line(reply::trim_line_ending(&raw))?;

            match code {
                None => code = Some(line.code),
                Some(expected) if expected != line.code => {
                    return Err(Error::Protocol(format!(
                        "status changed mid-reply: {} then {}",
                        expected, line.code
                    )));
                }
                Some(_) => {}
            }

            tracing::trace!(line = %redact_reply_line(&line.text), "Reply line");
            lines.push(line.text);

            match line.kind {
                LineKind::Mid => continue,
                LineKind::Data => self.read_data_block(&mut lines).await?,
                LineKind::End => break,
            }
        }

        // The loop only exits after parsing at least one line.
        let code = code.ok_or_else(|| Error::Protocol("empty reply".into()))?;
        Ok(Reply::new(code, lines))
    }

    /// Read data lines up to the terminating `.`, undoing dot-stuffing.
    async fn read_data_block(&mut self, lines: &mut Vec<String>) -> Result<()> {
        loop {
            let raw = self.read_line().await?;
            let line = reply::trim_line_ending(&raw);
            if line == "." {
                return Ok(());
            }
            let line = line.strip_prefix('.').unwrap_or(line);
            lines.push(line.to_string());
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let n = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| Error::Connection(format!("failed to read response: {}", e)))?;

        if n == 0 {
            return Err(Error::Connection("connection closed by tor".into()));
        }
        if n > MAX_LINE_LEN {
            return Err(Error::Protocol(format!(
                "reply line exceeds {} bytes",
                MAX_LINE_LEN
            )));
        }

        String::from_utf8(buf)
            .map_err(|_| Error::Protocol("reply line is not valid UTF-8".into()))
    }

    /// Shut down the write side of the connection.
    pub async fn close(mut self) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| Error::Connection(format!("shutdown failed: {}", e)))?;
        Ok(())
    }
}

/// A command must be exactly one line, terminated by `\n`.
fn validate_command(command: &str) -> Result<()> {
    let body = command
        .strip_suffix('\n')
        .ok_or_else(|| Error::Protocol("command must be newline-terminated".into()))?;
    let body = body.strip_suffix('\r').unwrap_or(body);

    if body.contains(['\r', '\n']) {
        return Err(Error::Protocol("command must be a single line".into()));
    }
    Ok(())
}

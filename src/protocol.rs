//! Wire protocol between the server and the robots
//!
//! Plain-text frames over one TCP connection per agent, plus a pair of literal
//! tokens for UDP discovery.
//!
//! | Direction | Frame | Meaning |
//! |-----------|-------|---------|
//! | agent → server | `POS:<x>,<y>` | current position (`pos:<x>;<y>` also accepted) |
//! | agent → server | `ID:<name>` / `HELLO <name>` / free text | greeting |
//! | agent → server | `desligar`, `exit`, `bye` | agent is leaving |
//! | server → agent | `GOTO:<x>,<y>` | move to target |
//! | server → agent | `desligar` | graceful shutdown request |
//!
//! Frames end at a newline. A fragment with no newline is still delivered once
//! the connection goes quiet for a short moment, since older agents write one
//! unterminated message per send.

use crate::swarm::Position;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Payload an agent broadcasts to locate the server
pub const DISCOVERY_REQUEST: &str = "EV3_DISCOVERY_REQUEST";

/// Payload the server answers discovery requests with
pub const DISCOVERY_RESPONSE: &str = "EV3_SERVER_HERE";

/// Shutdown token, in both directions
pub const SHUTDOWN_TOKEN: &str = "desligar";

/// Longest frame accepted from an agent
pub const MAX_FRAME_LEN: usize = 1024;

/// How long a partial frame may sit in the buffer before it is delivered as-is
pub const DEFAULT_IDLE_FLUSH: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 1024;

/// Reasons a frame could not be understood
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("expected two coordinates in '{0}'")]
    MissingCoordinates(String),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("coordinate is not finite: '{0}'")]
    NonFinite(String),

    #[error("frame of {0} bytes exceeds the frame size limit")]
    Oversized(usize),
}

/// A message received from an agent
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Position report
    Position(Position),

    /// Explicit identification (`ID:<name>` or `HELLO <name>`)
    Identify(String),

    /// Agent is disconnecting
    Shutdown,

    /// Anything else (free-text greeting, chatter)
    Text(String),
}

impl Inbound {
    /// Parse a single frame
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let lower = frame.to_ascii_lowercase();
        if matches!(lower.as_str(), SHUTDOWN_TOKEN | "exit" | "bye") {
            return Ok(Inbound::Shutdown);
        }

        if lower.starts_with("pos:") {
            return parse_coordinates(&frame[4..]).map(Inbound::Position);
        }

        let name = if lower.starts_with("id:") {
            Some(frame[3..].trim())
        } else if lower.starts_with("hello ") {
            Some(frame[6..].trim())
        } else {
            None
        };

        match name {
            Some(name) if !name.is_empty() => Ok(Inbound::Identify(name.to_string())),
            _ => Ok(Inbound::Text(frame.to_string())),
        }
    }
}

/// Parse `<x>,<y>` (or `<x>;<y>`)
fn parse_coordinates(body: &str) -> Result<Position, ProtocolError> {
    let parts: Vec<&str> = body.split([',', ';']).map(str::trim).collect();
    if parts.len() != 2 {
        return Err(ProtocolError::MissingCoordinates(body.to_string()));
    }

    let mut coords = [0.0_f64; 2];
    for (slot, part) in coords.iter_mut().zip(&parts) {
        let value: f64 = part
            .parse()
            .map_err(|_| ProtocolError::InvalidNumber(part.to_string()))?;
        if !value.is_finite() {
            return Err(ProtocolError::NonFinite(part.to_string()));
        }
        *slot = value;
    }

    Ok(Position::new(coords[0], coords[1]))
}

/// A message sent to an agent
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Move to a target position
    Goto(Position),

    /// Ask the agent to shut down; nothing is written after this
    Shutdown,

    /// Raw operator text
    Text(String),
}

impl Command {
    /// Encode as a newline-terminated frame
    pub fn to_frame(&self) -> String {
        match self {
            Command::Goto(target) => format!("GOTO:{:.3},{:.3}\n", target.x, target.y),
            Command::Shutdown => format!("{}\n", SHUTDOWN_TOKEN),
            Command::Text(text) => format!("{}\n", text.trim_end()),
        }
    }

    /// Decode a frame produced by [`Command::to_frame`]
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if frame.eq_ignore_ascii_case(SHUTDOWN_TOKEN) {
            return Ok(Command::Shutdown);
        }
        if frame
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("goto:"))
        {
            return parse_coordinates(&frame[5..]).map(Command::Goto);
        }
        Ok(Command::Text(frame.to_string()))
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Goto(_) => "goto",
            Command::Shutdown => "shutdown",
            Command::Text(_) => "text",
        }
    }
}

/// Splits an agent's byte stream into frames
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    pending: VecDeque<Result<String, ProtocolError>>,
    idle_flush: Duration,
    eof: bool,
    /// Dropping the rest of an oversized frame up to its newline
    discarding: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader
    pub fn new(reader: R) -> Self {
        Self::with_idle_flush(reader, DEFAULT_IDLE_FLUSH)
    }

    /// Wrap a reader with a custom partial-frame flush delay
    pub fn with_idle_flush(reader: R, idle_flush: Duration) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
            pending: VecDeque::new(),
            idle_flush,
            eof: false,
            discarding: false,
        }
    }

    /// Next frame, or None at end of stream
    ///
    /// Oversized frames are discarded through their terminating newline and
    /// surface once as `Err(ProtocolError::Oversized)` in the inner result, so
    /// the caller can log them and keep reading.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Result<String, ProtocolError>>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(None);
            }

            let read = if self.buf.is_empty() {
                Some(self.reader.read(&mut chunk).await?)
            } else {
                match tokio::time::timeout(self.idle_flush, self.reader.read(&mut chunk)).await {
                    Ok(result) => Some(result?),
                    Err(_) => None,
                }
            };

            match read {
                None => self.flush_remainder(),
                Some(0) => {
                    self.eof = true;
                    self.flush_remainder();
                }
                Some(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.split_lines();
                }
            }
        }
    }

    fn split_lines(&mut self) {
        if self.discarding {
            match self.buf.iter().position(|b| *b == b'\n') {
                Some(idx) => {
                    self.buf.drain(..=idx);
                    self.discarding = false;
                }
                None => {
                    self.buf.clear();
                    return;
                }
            }
        }
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            self.push(&line[..line.len() - 1]);
        }
        if self.buf.len() > MAX_FRAME_LEN {
            self.pending
                .push_back(Err(ProtocolError::Oversized(self.buf.len())));
            self.buf.clear();
            self.discarding = true;
        }
    }

    fn flush_remainder(&mut self) {
        let rest = std::mem::take(&mut self.buf);
        if self.discarding {
            return;
        }
        self.push(&rest);
    }

    fn push(&mut self, raw: &[u8]) {
        if raw.len() > MAX_FRAME_LEN {
            self.pending.push_back(Err(ProtocolError::Oversized(raw.len())));
            return;
        }
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if !text.is_empty() {
            self.pending.push_back(Ok(text.to_string()));
        }
    }
}

//! STOMP 1.2 framing for the push channel.
//!
//! Frames travel as WebSocket text messages. A message may hold several
//! frames and bare EOLs, which are heart-beats.

use crate::error::{LiveError, Result};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    fn parse(line: &str) -> Result<Self> {
        Ok(match line {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(LiveError::Protocol(format!("unknown command {other:?}"))),
        })
    }

    /// CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    Frame(Frame),
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: Vec::new() }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins, as STOMP requires for repeated headers.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn connect(host: &str, heartbeat: Heartbeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", host)
            .header("heart-beat", heartbeat.to_header())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.to_string().as_bytes());
        out.push(b'\n');
        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Text form for WebSocket transports; bodies here are always JSON.
    pub fn encode_text(&self) -> String {
        String::from_utf8_lossy(&self.encode()).into_owned()
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(LiveError::Protocol(format!("bad header escape \\{}", other.unwrap_or(' '))))
            }
        }
    }
    Ok(out)
}

/// Splits a wire message into heart-beats and frames.
pub fn parse(data: &[u8]) -> Result<Vec<Inbound>> {
    match parse_prefix(data) {
        (items, None) => Ok(items),
        (_, Some(e)) => Err(e),
    }
}

/// Like [`parse`], but hands back the units decoded before the first bad
/// frame along with the error. Nothing after it is read: the frame boundary
/// is lost.
pub fn parse_prefix(data: &[u8]) -> (Vec<Inbound>, Option<LiveError>) {
    let mut items = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        match data[pos] {
            b'\n' => {
                items.push(Inbound::Heartbeat);
                pos += 1;
            }
            b'\r' if data.get(pos + 1) == Some(&b'\n') => {
                items.push(Inbound::Heartbeat);
                pos += 2;
            }
            // NUL padding left between frames.
            0 => pos += 1,
            _ => match parse_frame(&data[pos..]) {
                Ok((frame, used)) => {
                    items.push(Inbound::Frame(frame));
                    pos += used;
                }
                Err(e) => return (items, Some(e)),
            },
        }
    }
    (items, None)
}

fn read_line(data: &[u8], pos: &mut usize) -> Result<String> {
    let rest = &data[*pos..];
    let end = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| LiveError::Protocol("truncated frame".into()))?;
    *pos += end + 1;
    let line = rest[..end].strip_suffix(b"\r").unwrap_or(&rest[..end]);
    String::from_utf8(line.to_vec()).map_err(|_| LiveError::Protocol("non utf-8 frame header".into()))
}

fn parse_frame(data: &[u8]) -> Result<(Frame, usize)> {
    let mut pos = 0;
    let command = Command::parse(&read_line(data, &mut pos)?)?;
    let mut headers = Vec::new();
    loop {
        let line = read_line(data, &mut pos)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| LiveError::Protocol(format!("malformed header {line:?}")))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| v.trim().parse::<usize>())
        .transpose()
        .map_err(|_| LiveError::Protocol("bad content-length".into()))?;

    let rest = &data[pos..];
    let body_len = match content_length {
        Some(len) if rest.len() > len && rest[len] == 0 => len,
        Some(_) => return Err(LiveError::Protocol("content-length does not match body".into())),
        None => rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| LiveError::Protocol("frame without NUL terminator".into()))?,
    };
    let frame = Frame { command, headers, body: rest[..body_len].to_vec() };
    Ok((frame, pos + body_len + 1))
}

/// Heart-beat intervals in milliseconds, 0 meaning "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl Heartbeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self { outgoing_ms, incoming_ms }
    }

    pub fn to_header(self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }

    pub fn from_header(value: &str) -> Result<Self> {
        let (out, inc) = value
            .split_once(',')
            .ok_or_else(|| LiveError::Protocol(format!("bad heart-beat header {value:?}")))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| LiveError::Protocol(format!("bad heart-beat header {value:?}")))
        };
        Ok(Self { outgoing_ms: parse(out)?, incoming_ms: parse(inc)? })
    }

    /// Effective intervals once the server has answered: each direction
    /// uses the larger of what one side offers and the other side wants.
    pub fn negotiate(self, server: Heartbeat) -> Negotiated {
        let pick = |offer: u64, want: u64| {
            if offer == 0 || want == 0 {
                None
            } else {
                Some(Duration::from_millis(offer.max(want)))
            }
        };
        Negotiated {
            send_every: pick(self.outgoing_ms, server.incoming_ms),
            expect_every: pick(server.outgoing_ms, self.incoming_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub send_every: Option<Duration>,
    pub expect_every: Option<Duration>,
}

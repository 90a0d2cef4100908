use crate::common::ParseError;
use bytes::Bytes;
use std::fmt;

const CONNECT_PREFIX: &str = "CONNECT ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Connect,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Connect => "CONNECT",
            Method::Other(verb) => verb,
        }
    }
}

/// `host:port` authority taken verbatim from a CONNECT request line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelTarget(String);

impl TunnelTarget {
    pub fn new(authority: impl Into<String>) -> Self {
        Self(authority.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into host and port. IPv6 literals keep their brackets off.
    pub fn host_port(&self) -> Option<(&str, u16)> {
        let (host, port) = self.0.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return None;
        }
        Some((host, port))
    }
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: Method,
    /// Second token of the request line; empty when a plain request has none.
    pub target: String,
    pub request_line: String,
    /// Bytes that followed the blank line ending the request head.
    pub trailing: Bytes,
}

impl ParsedRequest {
    pub fn is_connect(&self) -> bool {
        self.method == Method::Connect
    }

    pub fn tunnel_target(&self) -> Option<TunnelTarget> {
        match self.method {
            Method::Connect => Some(TunnelTarget::new(self.target.clone())),
            Method::Other(_) => None,
        }
    }
}

/// Classify the first chunk read from a client connection.
///
/// Leading empty lines are skipped and the request line is the first
/// non-empty CRLF-delimited line. Only the request head has to be text;
/// whatever follows the blank line ending the head is kept as raw bytes.
pub fn parse_request(data: &[u8]) -> Result<ParsedRequest, ParseError> {
    let mut start = 0;
    while data[start..].starts_with(b"\r\n") {
        start += 2;
    }
    let rest = &data[start..];

    let (head, trailing) = match find_head_end(rest) {
        Some(end) => (&rest[..end], Bytes::copy_from_slice(&rest[end..])),
        None => (&rest[..find_line_end(rest)], Bytes::new()),
    };
    let text = std::str::from_utf8(head).map_err(|_| ParseError::NotText)?;

    let request_line = text
        .split("\r\n")
        .find(|line| !line.is_empty())
        .ok_or(ParseError::NoRequestLine)?;

    let mut tokens = request_line.split_whitespace();

    let method = if request_line.starts_with(CONNECT_PREFIX) {
        tokens.next();
        Method::Connect
    } else {
        let verb = tokens.next().ok_or(ParseError::NoRequestLine)?;
        Method::Other(verb.to_string())
    };

    let target = match (&method, tokens.next()) {
        (_, Some(target)) => target.to_string(),
        (Method::Connect, None) => return Err(ParseError::MissingConnectTarget),
        (Method::Other(_), None) => String::new(),
    };

    Ok(ParsedRequest {
        method,
        target,
        request_line: request_line.to_string(),
        trailing,
    })
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

// 빈 줄이 없으면 요청 라인까지만 (CRLF도 없으면 전체)
fn find_line_end(data: &[u8]) -> usize {
    data.windows(2)
        .position(|w| w == b"\r\n")
        .map(|pos| pos + 2)
        .unwrap_or(data.len())
}

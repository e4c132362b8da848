//! Streaming, restartable HTTP/1.x request parser.
//!
//! The parser owns a growing byte buffer and re-enters its state machine
//! every time the connection gets more bytes from the socket. Nothing here
//! borrows into the buffer across a suspension point: every field copied
//! out of the prelude is an owned `String`/`Vec<u8>`, so the connection can
//! be safely parked between `mio` wakeups.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Header prelude budget. A request whose header block exceeds this before
/// the terminator is found is rejected with 413.
pub const MAX_HEADER_BYTES: usize = 4096;
/// Upper bound on header field count, to keep a pathological client from
/// growing the header map without bound inside the budget above.
pub const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http09,
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http09 => "HTTP/0.9",
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl FromStr for Version {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "HTTP/0.9" => Ok(Version::Http09),
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(ParseError::InvalidVersion),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidMethod,
    InvalidVersion,
    InvalidRequestLine,
    HeaderTooLarge,
    TooManyHeaders,
    InvalidHeader,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseError::InvalidMethod => "unsupported method",
            ParseError::InvalidVersion => "unsupported HTTP version",
            ParseError::InvalidRequestLine => "malformed request line",
            ParseError::HeaderTooLarge => "header block too large",
            ParseError::TooManyHeaders => "too many header fields",
            ParseError::InvalidHeader => "malformed header field",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    /// The status code the dispatcher should answer with for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ParseError::InvalidMethod => 405,
            ParseError::HeaderTooLarge | ParseError::TooManyHeaders => 413,
            ParseError::InvalidVersion
            | ParseError::InvalidRequestLine
            | ParseError::InvalidHeader => 400,
        }
    }
}

/// A fully parsed request line plus header block. The body is consumed
/// separately by the dispatcher (static bodies are drained into memory;
/// CGI bodies are streamed straight to the child's stdin).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub version: Version,
    /// Preserves declaration order; lookups are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Any bytes that followed the header terminator in the same read.
    pub body_prefix: Vec<u8>,
    /// Set to 404 by the dispatcher's error-handler retry; 0 otherwise.
    pub redirect_status: u16,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    pub fn expects_continue(&self) -> bool {
        self.header("expect")
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.url, self.version.as_str())
    }
}

/// Result of feeding more bytes to the parser.
pub enum ParseOutcome {
    /// More bytes are needed before a request can be produced.
    Incomplete,
    /// A full request was parsed; `request` is ready for dispatch.
    Complete(HttpRequest),
    /// The input violates the protocol; carries the status to answer with.
    Failed(ParseError),
}

/// Incremental parser over an owned accumulation buffer.
///
/// Call `feed` every time new bytes arrive from the transport. The parser
/// is restartable: `feed` may be called any number of times with more data
/// before a `Complete`/`Failed` outcome is produced.
#[derive(Default)]
pub struct RequestParser {
    buf: Vec<u8>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(MAX_HEADER_BYTES) }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> ParseOutcome {
        self.buf.extend_from_slice(bytes);

        let Some(header_end) = find_header_terminator(&self.buf) else {
            if self.buf.len() > MAX_HEADER_BYTES {
                return ParseOutcome::Failed(ParseError::HeaderTooLarge);
            }
            return ParseOutcome::Incomplete;
        };

        if header_end > MAX_HEADER_BYTES {
            return ParseOutcome::Failed(ParseError::HeaderTooLarge);
        }

        let prelude = self.buf[..header_end].to_vec();
        let body_prefix = self.buf[find_body_start(&self.buf, header_end)..].to_vec();

        match parse_prelude(&prelude) {
            Ok((method, url, version, headers)) => {
                ParseOutcome::Complete(HttpRequest {
                    method,
                    url,
                    version,
                    headers,
                    body_prefix,
                    redirect_status: 0,
                })
            }
            Err(e) => ParseOutcome::Failed(e),
        }
    }

    /// Resets the parser for the next pipelined request, keeping any bytes
    /// that arrived past the previous request's header terminator.
    pub fn reset_with(&mut self, leftover: Vec<u8>) {
        self.buf = leftover;
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

/// Scans for the blank-line terminator, tolerating either `\r\n\r\n` or a
/// bare `\n\n` (and mixed forms), matching the lenient per-field line
/// scanning described for header fields. Returns the index one past the
/// terminator (the start of any body bytes already read).
fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' {
            // \n\n
            if buf[i + 1] == b'\n' {
                return Some(i + 2);
            }
            // \n\r\n
            if i + 2 < buf.len() && buf[i + 1] == b'\r' && buf[i + 2] == b'\n' {
                return Some(i + 3);
            }
        }
        i += 1;
    }
    None
}

fn find_body_start(buf: &[u8], header_end: usize) -> usize {
    header_end.min(buf.len())
}

/// Splits the raw prelude into lines at a bare CR or LF (accepted
/// individually), matching the relaxed field-terminator rule.
fn split_lines(prelude: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < prelude.len() {
        match prelude[i] {
            b'\r' | b'\n' => {
                if i > start {
                    lines.push(String::from_utf8_lossy(&prelude[start..i]).into_owned());
                } else if i == start {
                    // Blank line (shouldn't normally appear inside the
                    // prelude slice, but keep the scan total).
                    lines.push(String::new());
                }
                // Swallow a CRLF pair as one terminator.
                if prelude[i] == b'\r' && i + 1 < prelude.len() && prelude[i + 1] == b'\n' {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < prelude.len() {
        lines.push(String::from_utf8_lossy(&prelude[start..]).into_owned());
    }
    lines.into_iter().filter(|l| !l.is_empty()).collect()
}

type Prelude = (Method, String, Version, Vec<(String, String)>);

fn parse_prelude(prelude: &[u8]) -> std::result::Result<Prelude, ParseError> {
    let lines = split_lines(prelude);
    let mut iter = lines.into_iter();
    let request_line = iter.next().ok_or(ParseError::InvalidRequestLine)?;

    let mut parts = request_line.split(' ').filter(|s| !s.is_empty());
    let method_str = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let url = parts.next().ok_or(ParseError::InvalidRequestLine)?.to_string();
    let version_str = parts.next().unwrap_or("HTTP/0.9");
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequestLine);
    }
    if url.is_empty() {
        return Err(ParseError::InvalidRequestLine);
    }

    let method = Method::from_str(method_str)?;
    let version = Version::from_str(version_str)?;

    let mut headers = Vec::new();
    for line in iter {
        if headers.len() >= MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        let colon = line.find(':').ok_or(ParseError::InvalidHeader)?;
        let name = line[..colon].to_string();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
            return Err(ParseError::InvalidHeader);
        }
        let value = line[colon + 1..].trim_start().to_string();
        headers.push((name, value));
    }

    Ok((method, url, version, headers))
}

/// Strips `deflate`-free query string from a URL, returning (path, query).
pub fn split_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (url, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let mut p = RequestParser::new();
        let out = p.feed(b"GET /index.html HTTP/1.1\r\nHost: example\r\n\r\n");
        match out {
            ParseOutcome::Complete(req) => {
                assert_eq!(req.method, Method::Get);
                assert_eq!(req.url, "/index.html");
                assert_eq!(req.version, Version::Http11);
                assert_eq!(req.header("host"), Some("example"));
            }
            _ => panic!("expected complete parse"),
        }
    }

    #[test]
    fn fragmented_input_is_restartable() {
        let mut p = RequestParser::new();
        assert!(matches!(p.feed(b"GET /a HTTP/1.1\r\n"), ParseOutcome::Incomplete));
        assert!(matches!(p.feed(b"Host: x\r\n"), ParseOutcome::Incomplete));
        assert!(matches!(p.feed(b"\r\n"), ParseOutcome::Complete(_)));
    }

    #[test]
    fn lowercase_method_is_rejected() {
        let mut p = RequestParser::new();
        match p.feed(b"get / HTTP/1.1\r\n\r\n") {
            ParseOutcome::Failed(ParseError::InvalidMethod) => {}
            other => panic!("unexpected outcome: {other:?}", other = matches_name(&other)),
        }
    }

    #[test]
    fn bare_lf_terminated_headers_are_accepted() {
        let mut p = RequestParser::new();
        let out = p.feed(b"GET / HTTP/1.0\nHost: x\n\n");
        assert!(matches!(out, ParseOutcome::Complete(_)));
    }

    #[test]
    fn oversized_header_block_is_413() {
        let mut p = RequestParser::new();
        let mut buf = b"GET / HTTP/1.1\r\n".to_vec();
        buf.extend(std::iter::repeat(b'a').take(MAX_HEADER_BYTES + 10));
        match p.feed(&buf) {
            ParseOutcome::Failed(ParseError::HeaderTooLarge) => {}
            _ => panic!("expected header too large"),
        }
    }

    fn matches_name(o: &ParseOutcome) -> &'static str {
        match o {
            ParseOutcome::Incomplete => "Incomplete",
            ParseOutcome::Complete(_) => "Complete",
            ParseOutcome::Failed(_) => "Failed",
        }
    }
}

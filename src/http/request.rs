//! Request-line and header parsing.
//!
//! Grounded in the teacher's `src/parser/h1/request.rs` (method/version token
//! matching, `ParseError` shape) and the original's `httpconn.cpp::process`, which
//! only ever calls into the parser once a full header block (`\r\n\r\n`) has arrived,
//! falling back to a 400 otherwise.

use std::fmt::Display;

use super::{Method, Version};

/// Failure modes while scanning the request line or headers. Each of these resolves to
/// a 400 response in the state machine rather than a connection close.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Method,
    Target,
    Version,
    HeaderLine,
    ContentLength,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ParseError::Method => "invalid or unsupported method",
            ParseError::Target => "invalid request target",
            ParseError::Version => "invalid or unsupported HTTP version",
            ParseError::HeaderLine => "malformed header line",
            ParseError::ContentLength => "invalid Content-Length value",
        })
    }
}

impl std::error::Error for ParseError {}

/// The tokens the connection state machine consumes from a request (spec.md §1):
/// method, path, keep-alive flag, and body boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub version: Version,
    pub keep_alive: bool,
    pub content_length: usize,
}

/// Result of a parse attempt over an accumulated buffer.
pub enum ParseOutcome {
    /// The header block hasn't fully arrived yet; caller should keep reading.
    Incomplete,
    /// A well-formed request line and header block were found.
    Complete(Request),
    /// The header block arrived but was malformed.
    Malformed(ParseError),
}

/// Scans `buf` for a full header block and parses it if present.
///
/// `buf` is expected to hold everything read so far for the current request; this
/// function does not consume it — the caller retires the consumed bytes from the
/// connection's inbound `ByteBuffer` once the full request (headers + any body) has
/// been accounted for.
pub fn parse(buf: &[u8]) -> ParseOutcome {
    let Some(header_end) = find_header_end(buf) else {
        return ParseOutcome::Incomplete;
    };
    let head = &buf[..header_end];

    let mut lines = head.split(|&b| b == b'\n').map(strip_cr);
    let Some(request_line) = lines.next() else {
        return ParseOutcome::Malformed(ParseError::HeaderLine);
    };

    let (method, path, version) = match parse_request_line(request_line) {
        Ok(parts) => parts,
        Err(e) => return ParseOutcome::Malformed(e),
    };

    let mut keep_alive = version == Version::Http11;
    let mut content_length = 0usize;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return ParseOutcome::Malformed(ParseError::HeaderLine);
        };
        let name = &line[..colon];
        let value = trim(&line[colon + 1..]);

        if name.eq_ignore_ascii_case(b"connection") {
            keep_alive = value.eq_ignore_ascii_case(b"keep-alive");
        } else if name.eq_ignore_ascii_case(b"content-length") {
            match std::str::from_utf8(value).ok().and_then(|s| s.parse().ok()) {
                Some(n) => content_length = n,
                None => return ParseOutcome::Malformed(ParseError::ContentLength),
            }
        }
    }

    ParseOutcome::Complete(Request {
        method,
        path,
        version,
        keep_alive,
        content_length,
    })
}

/// Length of the header block (through the blank line), if one has fully arrived.
/// Exposed so the connection state machine knows how many inbound bytes to retire once
/// a request has been handed off, without re-deriving the scan logic.
pub(crate) fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 2)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b != b' ' && b != b'\t').map_or(start, |p| p + 1);
    &bytes[start..end]
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), ParseError> {
    let mut parts = line.split(|&b| b == b' ').filter(|p| !p.is_empty());

    let method = match parts.next() {
        Some(b"GET") => Method::Get,
        Some(b"HEAD") => Method::Head,
        Some(b"POST") => Method::Post,
        Some(b"PUT") => Method::Put,
        Some(b"DELETE") => Method::Delete,
        Some(b"CONNECT") => Method::Connect,
        Some(b"OPTIONS") => Method::Options,
        Some(b"TRACE") => Method::Trace,
        _ => return Err(ParseError::Method),
    };

    let target = parts.next().ok_or(ParseError::Target)?;
    if target.is_empty() || !target.iter().all(|&b| is_target_byte(b)) {
        return Err(ParseError::Target);
    }
    let path = std::str::from_utf8(target).map_err(|_| ParseError::Target)?.to_owned();

    let version_token = parts.next().ok_or(ParseError::Version)?;
    let version = match version_token {
        b"HTTP/1.0" => Version::Http10,
        b"HTTP/1.1" => Version::Http11,
        _ => return Err(ParseError::Version),
    };

    if parts.next().is_some() {
        return Err(ParseError::Version);
    }

    Ok((method, path, version))
}

fn is_target_byte(b: u8) -> bool {
    // Permissive on purpose: this engine only routes by path to a static document
    // root, so anything printable and non-whitespace is accepted and later resolved
    // (or 404'd) by the filesystem lookup in `response::compose`.
    b.is_ascii_graphic()
}

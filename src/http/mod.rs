//! HTTP/1.1 request parsing and response composition.
//!
//! This is the "external collaborator" spec.md §6 describes: the reactor core only
//! depends on the narrow contract in `request::parse` and `response::compose`, but since
//! this crate is not split across a workspace the collaborator lives here in full.

use std::fmt::Display;

pub mod mime;
pub mod request;
pub mod response;
pub mod status;

/// HTTP methods recognized on the request line. RFC 9110 §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        })
    }
}

/// HTTP versions recognized on the request line. Only HTTP/1.0 and HTTP/1.1 are
/// actually servable (H2/H3 are non-goals); the variants are kept so version parsing
/// can distinguish "not HTTP/1.x" from "malformed" the way the original does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        })
    }
}

//! Error types for the reactor core and its HTTP codec collaborator.

use std::io;

/// Errors that abort the engine outright. Per spec.md §7, `InvariantViolation` and
/// `ListenInitFailure` are bugs or unrecoverable startup failures, not per-connection
/// conditions a caller can route around.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The listening socket could not be created, bound, or armed. The server must mark
    /// itself closed and exit.
    #[error("failed to initialize listening socket: {0}")]
    ListenInitFailure(#[source] io::Error),

    /// A structural invariant (buffer index ordering, timer index map) was violated.
    /// Treated as a bug; callers that hit this should fail fast rather than limp on.
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),

    /// The readiness multiplexer itself failed (as opposed to a per-fd error).
    #[error("multiplexer error: {0}")]
    Multiplexer(#[source] io::Error),
}

/// Errors arising while servicing a single connection. None of these are fatal to the
/// engine; each resolves to either a close or a response status per spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// `read`/`write`/`writev` would have blocked. Benign; handled inline by callers,
    /// never expected to escape as a logged error.
    #[error("operation would block")]
    WouldBlock,

    /// Peer performed an orderly shutdown (`read` returned 0) or reset the connection.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The request could not be parsed. The caller composes a 400 and proceeds to
    /// WRITING rather than closing immediately.
    #[error("malformed request: {0}")]
    Parse(#[from] crate::http::request::ParseError),

    /// Accepting this connection would exceed `MAX_FD`.
    #[error("connection cap reached")]
    ResourceExhausted,

    /// Any other I/O failure not covered above (e.g. ECONNRESET surfacing from write).
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConnError {
    /// True when `err.kind()` is `WouldBlock` or `Interrupted` — the two kinds that, under
    /// edge-triggering, simply end the inner drain loop rather than close the connection.
    pub fn classify_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => ConnError::WouldBlock,
            io::ErrorKind::Interrupted => ConnError::WouldBlock,
            _ => ConnError::Io(io::Error::from(err.kind())),
        }
    }
}

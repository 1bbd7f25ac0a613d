//! Per-connection state and the read/write state machine of spec.md §4.5.
//!
//! A `Connection` is driven by exactly one worker at a time (plus the reactor's close
//! path), and owns everything a worker needs to finish a read or write step: the fd, both
//! byte buffers, and the pending response's scatter descriptor. Grounded in the teacher's
//! `src/connection.rs` for the read/write/state shape, and the original's `httpconn.cpp`
//! for the exact transition semantics (iov bookkeeping, keep-alive reset, the `isET ||
//! ToWriteBytes() > 10240` write-loop continuation rule).

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use memmap2::Mmap;

use crate::buffer::ByteBuffer;
use crate::error::ConnError;
use crate::http::{request, response};
use crate::mux::Trigger;

const INBOUND_CAPACITY: usize = 4 * 1024;
const OUTBOUND_CAPACITY: usize = 4 * 1024;
/// Level-triggered writes keep looping past a single `writev` while this many bytes
/// remain, mirroring the original's `ToWriteBytes() > 10240` continuation threshold.
const LEVEL_WRITE_CONTINUE_THRESHOLD: usize = 10 * 1024;

/// Where a connection sits in the state machine. There is no explicit `Accepted`
/// variant — a `Connection` is constructed already in `Reading`, matching the moment it's
/// handed to the reactor for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Reading,
    Writing,
    Closed,
}

/// Outcome of draining the socket in the OnRead task.
pub enum ReadOutcome {
    /// Some bytes were read (or none were available yet under level triggering); caller
    /// should attempt `process`.
    Progressed,
    /// Peer performed an orderly shutdown or the read failed unrecoverably.
    Closed,
}

/// Outcome of parsing the accumulated inbound buffer.
pub enum ProcessOutcome {
    /// The request is incomplete; keep reading.
    NeedMoreData,
    /// A response was composed; caller should arm the fd for writable interest.
    Ready,
}

/// Outcome of draining the pending response in the OnWrite task.
pub enum WriteOutcome {
    /// The iov fully drained. Caller checks `keep_alive()` to decide reset-for-reuse vs
    /// close.
    Complete,
    /// A partial write happened and the remainder would block; stay armed for writable.
    WouldBlock,
    /// The write failed unrecoverably; caller should close.
    Closed,
}

struct PendingWrite {
    mapped: Option<Mmap>,
    body_offset: usize,
}

impl PendingWrite {
    fn body_remaining(&self) -> &[u8] {
        match &self.mapped {
            Some(m) if self.body_offset < m.len() => &m[self.body_offset..],
            _ => &[],
        }
    }
}

/// A single accepted connection: owned fd, peer address, buffers, and pending response.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: State,
    inbound: ByteBuffer,
    outbound: ByteBuffer,
    pending: Option<PendingWrite>,
    keep_alive: bool,
    closed: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Result<Self, ConnError> {
        stream.set_nonblocking(true)?;
        Ok(Connection {
            stream,
            peer_addr,
            state: State::Reading,
            inbound: ByteBuffer::with_capacity(INBOUND_CAPACITY),
            outbound: ByteBuffer::with_capacity(OUTBOUND_CAPACITY),
            pending: None,
            keep_alive: false,
            closed: false,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// READING: drains the socket into the inbound buffer. Under edge-triggering this
    /// loops `read_fd` until it hits 0 bytes or a would-block-class error, since no
    /// further readiness notification will arrive otherwise; under level-triggering a
    /// single attempt is enough, matching spec.md §4.2's per-mode discipline.
    pub fn fill(&mut self, trigger: Trigger) -> ReadOutcome {
        loop {
            match self.inbound.read_fd(self.fd()) {
                Ok(0) => {
                    log::debug!("fd {}: {}", self.fd(), ConnError::PeerClosed);
                    return ReadOutcome::Closed;
                }
                Ok(_) => {
                    if trigger == Trigger::Level {
                        return ReadOutcome::Progressed;
                    }
                }
                Err(e) => match ConnError::classify_io(&e) {
                    ConnError::WouldBlock => return ReadOutcome::Progressed,
                    other => {
                        log::debug!("fd {}: read failed: {other}", self.fd());
                        return ReadOutcome::Closed;
                    }
                },
            }
        }
    }

    /// PROCESSING: parses the accumulated inbound buffer and, once a full request (or an
    /// unrecoverable parse error) is available, composes the response and transitions to
    /// WRITING.
    pub fn process(&mut self, doc_root: &Path) -> ProcessOutcome {
        match request::parse(self.inbound.peek()) {
            request::ParseOutcome::Incomplete => ProcessOutcome::NeedMoreData,
            request::ParseOutcome::Complete(req) => {
                self.retire_request_bytes(req.content_length);
                let composed = response::compose(
                    &mut self.outbound,
                    doc_root,
                    &req.path,
                    req.keep_alive,
                    None,
                );
                self.finish_response(composed, req.keep_alive)
            }
            request::ParseOutcome::Malformed(err) => {
                log::debug!("fd {}: {}", self.fd(), ConnError::from(err));
                // The bytes making up a malformed request can't be trusted to contain a
                // recoverable boundary; drop everything buffered for it rather than risk
                // mis-parsing leftover garbage as the start of the next request.
                self.inbound.retrieve_all();
                let composed = response::compose(&mut self.outbound, doc_root, "/", false, Some(400));
                self.finish_response(composed, false)
            }
        }
    }

    fn retire_request_bytes(&mut self, content_length: usize) {
        let Some(header_len) = request::find_header_end(self.inbound.peek()) else {
            return;
        };
        let body_available = self.inbound.readable() - header_len;
        let consume = header_len + content_length.min(body_available);
        self.inbound
            .retrieve(consume)
            .expect("consume never exceeds readable() by construction");
    }

    fn finish_response(&mut self, composed: response::Composed, keep_alive: bool) -> ProcessOutcome {
        self.keep_alive = keep_alive;
        self.pending = Some(PendingWrite {
            mapped: match composed.body {
                response::Body::Mapped(m) => Some(m),
                response::Body::Inline => None,
            },
            body_offset: 0,
        });
        self.state = State::Writing;
        ProcessOutcome::Ready
    }

    /// WRITING: drains the 2-slot scatter descriptor (headers from the outbound buffer,
    /// body from the mapped file) via `writev`. Loops while edge-triggered, or while
    /// level-triggered and more than `LEVEL_WRITE_CONTINUE_THRESHOLD` bytes remain.
    pub fn drain_write(&mut self, trigger: Trigger) -> WriteOutcome {
        loop {
            let head = self.outbound.peek();
            let body = self.pending.as_ref().map(PendingWrite::body_remaining).unwrap_or(&[]);

            if head.is_empty() && body.is_empty() {
                return WriteOutcome::Complete;
            }

            let mut iov = [libc::iovec { iov_base: std::ptr::null_mut(), iov_len: 0 }; 2];
            let mut n_iov = 0;
            if !head.is_empty() {
                iov[n_iov] = libc::iovec {
                    iov_base: head.as_ptr() as *mut libc::c_void,
                    iov_len: head.len(),
                };
                n_iov += 1;
            }
            if !body.is_empty() {
                iov[n_iov] = libc::iovec {
                    iov_base: body.as_ptr() as *mut libc::c_void,
                    iov_len: body.len(),
                };
                n_iov += 1;
            }

            let written = unsafe { libc::writev(self.fd(), iov.as_ptr(), n_iov as libc::c_int) };
            if written < 0 {
                let err = io::Error::last_os_error();
                return match ConnError::classify_io(&err) {
                    ConnError::WouldBlock => WriteOutcome::WouldBlock,
                    other => {
                        log::debug!("fd {}: write failed: {other}", self.fd());
                        WriteOutcome::Closed
                    }
                };
            }

            let mut remaining = written as usize;
            let head_taken = remaining.min(head.len());
            if head_taken > 0 {
                self.outbound.retrieve(head_taken).expect("head_taken <= readable()");
            }
            remaining -= head_taken;
            if remaining > 0 {
                if let Some(pending) = self.pending.as_mut() {
                    pending.body_offset += remaining;
                }
            }

            let body_left = self.pending.as_ref().map(PendingWrite::body_remaining).map_or(0, <[u8]>::len);
            let total_remaining = self.outbound.readable() + body_left;

            if total_remaining == 0 {
                return WriteOutcome::Complete;
            }
            if trigger == Trigger::Level && total_remaining <= LEVEL_WRITE_CONTINUE_THRESHOLD {
                return WriteOutcome::WouldBlock;
            }
        }
    }

    /// WRITING → KEEPALIVE: drops the mapped file and resets both buffers, ready to be
    /// re-armed for a fresh READING cycle on the same fd.
    pub fn reset_for_reuse(&mut self) {
        self.pending = None;
        self.inbound.retrieve_all();
        self.outbound.retrieve_all();
        self.state = State::Reading;
    }

    /// Any state → CLOSED: drops any pending mapped file and marks the connection dead.
    /// The fd itself is closed when the owning `TcpStream` drops, once the reactor
    /// removes this entry from the connection table.
    pub fn close(&mut self) {
        self.pending = None;
        self.closed = true;
        self.state = State::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn connected_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (Connection::new(server, peer).unwrap(), client)
    }

    #[test]
    fn fill_reads_available_bytes_under_level_trigger() {
        let (mut conn, mut client) = connected_pair();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(matches!(conn.fill(Trigger::Level), ReadOutcome::Progressed));
        assert!(conn.inbound.readable() > 0);
    }

    #[test]
    fn process_serves_static_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"hello").unwrap();

        let (mut conn, mut client) = connected_pair();
        client.write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.fill(Trigger::Level);
        assert!(matches!(conn.process(dir.path()), ProcessOutcome::Ready));
        assert!(matches!(conn.drain_write(Trigger::Level), WriteOutcome::Complete));

        let mut received = Vec::new();
        client.set_read_timeout(Some(std::time::Duration::from_millis(200))).unwrap();
        let _ = client.read_to_end(&mut received);
        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("hello"));
    }

    #[test]
    fn malformed_request_yields_400_and_no_keep_alive() {
        let dir = tempfile::tempdir().unwrap();
        let (mut conn, mut client) = connected_pair();
        client.write_all(b"NOT_HTTP\r\n\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.fill(Trigger::Level);
        assert!(matches!(conn.process(dir.path()), ProcessOutcome::Ready));
        assert!(!conn.keep_alive());
        assert!(matches!(conn.drain_write(Trigger::Level), WriteOutcome::Complete));

        let mut received = Vec::new();
        client.set_read_timeout(Some(std::time::Duration::from_millis(200))).unwrap();
        let _ = client.read_to_end(&mut received);
        assert!(String::from_utf8_lossy(&received).starts_with("HTTP/1.1 400 Bad Request"));
    }

    #[test]
    fn reset_for_reuse_clears_buffers_and_returns_to_reading() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), b"hi").unwrap();
        let (mut conn, mut client) = connected_pair();
        client.write_all(b"GET /a.html HTTP/1.1\r\n\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.fill(Trigger::Level);
        conn.process(dir.path());
        conn.drain_write(Trigger::Level);
        conn.reset_for_reuse();
        assert_eq!(conn.state(), State::Reading);
        assert_eq!(conn.inbound.readable(), 0);
        assert_eq!(conn.outbound.readable(), 0);
    }
}

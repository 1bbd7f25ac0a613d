//! Growable scatter/gather byte buffer.
//!
//! Three monotonic indices split the backing allocation into a prependable region
//! `[0, read_pos)`, a readable region `[read_pos, write_pos)`, and a writable region
//! `[write_pos, capacity)`. Consuming from the head and appending to the tail stays
//! amortized O(1) without ever growing past roughly twice the live payload, so long as
//! `append` is given the chance to compact before it allocates.

use std::alloc::{self, Layout};
use std::io::{self, ErrorKind};
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};

use crate::error::EngineError;

/// Size of the stack-local spillover used by `read_fd` to drain a socket in one syscall
/// even when the buffer's own writable region is smaller than the pending data.
const SPILLOVER: usize = 64 * 1024;

/// A contiguous, growable byte buffer supporting vectored reads and a single gather write.
#[derive(Debug)]
pub struct ByteBuffer {
    ptr: NonNull<u8>,
    cap: usize,
    read_pos: usize,
    write_pos: usize,
}

// Buffers are moved between the reactor and a single worker at a time, never shared;
// they carry no interior mutability, so this is just asserting ownership can cross
// threads, which `NonNull` alone does not imply.
unsafe impl Send for ByteBuffer {}

impl ByteBuffer {
    /// Creates a new buffer with at least `capacity` bytes of initial storage.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = ByteBuffer {
            ptr: NonNull::dangling(),
            cap: 0,
            read_pos: 0,
            write_pos: 0,
        };
        if capacity > 0 {
            buf.alloc_at_least(capacity);
        }
        buf
    }

    /// Number of bytes available to read.
    #[inline]
    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Number of bytes that can be appended before a grow/compact is required.
    #[inline]
    pub fn writable(&self) -> usize {
        self.cap - self.write_pos
    }

    /// Number of bytes reclaimable by compaction.
    #[inline]
    pub fn prependable(&self) -> usize {
        self.read_pos
    }

    /// Pointer to the start of the readable region.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        // SAFETY: [read_pos, write_pos) is always within the allocation.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(self.read_pos), self.readable()) }
    }

    fn writable_slice_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(self.write_pos), self.writable())
        }
    }

    /// Advances `read_pos` by `n`, marking that many bytes consumed.
    pub fn retrieve(&mut self, n: usize) -> Result<(), EngineError> {
        if n > self.readable() {
            return Err(EngineError::InvariantViolation(
                "retrieve(n) with n > readable()",
            ));
        }
        self.read_pos += n;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
        Ok(())
    }

    /// Zeroes the readable region and resets both indices to 0.
    pub fn retrieve_all(&mut self) {
        if self.cap != 0 {
            unsafe { ptr::write_bytes(self.ptr.as_ptr(), 0, self.cap) };
        }
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Copies the readable region into a new `String` and resets the buffer.
    ///
    /// Non-UTF8 bytes are replaced, matching the original's "best effort" drain — this
    /// engine never calls it on anything but header/status text it composed itself.
    pub fn retrieve_all_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    /// Appends `bytes`, growing or compacting the buffer first if there isn't enough
    /// writable space.
    pub fn append(&mut self, bytes: &[u8]) {
        if self.writable() < bytes.len() {
            self.make_space(bytes.len());
        }
        let len = bytes.len();
        self.writable_slice_mut()[..len].copy_from_slice(bytes);
        self.write_pos += len;
    }

    /// Performs a vectored read of `fd` into the writable region, spilling overflow into
    /// a stack-local buffer so a single syscall can drain the socket even when the
    /// buffer's writable region is smaller than what's pending (the edge-triggered case).
    ///
    /// Returns `Ok(0)` on orderly peer shutdown, `Ok(n)` for `n` bytes read, or the
    /// underlying I/O error (including `WouldBlock`) otherwise.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut spill = [0u8; SPILLOVER];
        let writable = self.writable();

        let n = {
            let head = self.writable_slice_mut();
            let mut iov = [
                libc::iovec {
                    iov_base: head.as_mut_ptr() as *mut libc::c_void,
                    iov_len: head.len(),
                },
                libc::iovec {
                    iov_base: spill.as_mut_ptr() as *mut libc::c_void,
                    iov_len: spill.len(),
                },
            ];
            let res = unsafe { libc::readv(fd, iov.as_ptr(), iov.len() as libc::c_int) };
            if res < 0 {
                return Err(io::Error::last_os_error());
            }
            res as usize
        };

        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.cap;
            self.append(&spill[..n - writable]);
        }

        Ok(n)
    }

    /// Performs a single non-vectored write of the readable region to `fd`, advancing
    /// `read_pos` by the amount actually written.
    pub fn write_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let readable = self.peek();
        if readable.is_empty() {
            return Ok(0);
        }
        let n = unsafe {
            libc::write(
                fd,
                readable.as_ptr() as *const libc::c_void,
                readable.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        self.retrieve(n)
            .expect("write_fd never retrieves more than readable()");
        Ok(n)
    }

    /// Growth policy from spec.md §3: if there isn't enough total slack between the
    /// writable and prependable regions, grow to `write_pos + requested + 1`; otherwise
    /// compact in place by sliding the readable bytes down to offset 0.
    fn make_space(&mut self, requested: usize) {
        if self.writable() + self.prependable() < requested {
            let target = self.write_pos + requested + 1;
            self.alloc_at_least(target);
        } else {
            let readable = self.readable();
            unsafe {
                ptr::copy(
                    self.ptr.as_ptr().add(self.read_pos),
                    self.ptr.as_ptr(),
                    readable,
                );
            }
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    fn alloc_at_least(&mut self, capacity: usize) {
        assert!(capacity <= isize::MAX as usize);
        let new_layout = Layout::array::<u8>(capacity).unwrap();
        let new_ptr = if self.cap == 0 {
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::array::<u8>(self.cap).unwrap();
            unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };
        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = capacity;
    }
}

impl Drop for ByteBuffer {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

/// True for the two error kinds that, under edge-triggering, simply end the caller's
/// inner drain loop rather than signal a real failure.
pub fn is_recoverable(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let buf = ByteBuffer::with_capacity(16);
        assert_eq!(buf.readable(), 0);
        assert_eq!(buf.read_pos, 0);
        assert_eq!(buf.write_pos, 0);
    }

    #[test]
    fn append_then_peek_roundtrips() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.append(b"hello world");
        assert_eq!(buf.peek(), b"hello world");
        assert_eq!(buf.readable(), 11);
    }

    #[test]
    fn retrieve_advances_and_resets_when_drained() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.append(b"abc");
        buf.retrieve(3).unwrap();
        assert_eq!(buf.readable(), 0);
        assert_eq!(buf.read_pos, 0);
        assert_eq!(buf.write_pos, 0);
    }

    #[test]
    fn retrieve_past_readable_is_invariant_violation() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.append(b"ab");
        assert!(buf.retrieve(3).is_err());
    }

    #[test]
    fn retrieve_all_to_string_concatenates_appends() {
        let mut buf = ByteBuffer::with_capacity(2);
        buf.append(b"foo");
        buf.append(b"bar");
        assert_eq!(buf.retrieve_all_to_string(), "foobar");
        assert_eq!(buf.readable(), 0);
    }

    #[test]
    fn compacts_before_growing_when_slack_suffices() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.append(&[1u8; 10]);
        buf.retrieve(8).unwrap();
        let cap_before = buf.cap;
        buf.append(&[2u8; 10]);
        assert_eq!(buf.cap, cap_before, "compaction should have made room without realloc");
        assert_eq!(buf.readable(), 12);
    }

    #[test]
    fn grows_when_neither_writable_nor_prependable_suffice() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.append(&[0u8; 4]);
        buf.append(&[1u8; 100]);
        assert!(buf.cap >= 104);
        assert_eq!(buf.readable(), 104);
    }

    #[test]
    fn invariant_indices_stay_ordered_across_random_ops() {
        let mut buf = ByteBuffer::with_capacity(8);
        let mut model: Vec<u8> = Vec::new();
        let mut x: u32 = 0x9e3779b9;
        let mut next = || {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x
        };
        for _ in 0..500 {
            assert!(buf.read_pos <= buf.write_pos);
            assert!(buf.write_pos <= buf.cap);
            if next() % 3 == 0 && !model.is_empty() {
                let n = (next() as usize % model.len()) + 1;
                buf.retrieve(n).unwrap();
                model.drain(..n);
            } else {
                let len = (next() as usize % 37) + 1;
                let bytes: Vec<u8> = (0..len).map(|_| (next() & 0xff) as u8).collect();
                buf.append(&bytes);
                model.extend_from_slice(&bytes);
            }
            assert_eq!(buf.readable(), model.len());
            assert_eq!(buf.peek(), model.as_slice());
        }
    }
}

//! Indexed min-heap of connection idle timeouts.
//!
//! Keyed by fd (spec.md's `TimerNode.id`), with a side `fd -> heap index` map kept
//! consistent across every swap so `adjust`/`remove` run in O(log n) rather than O(n).

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Callback invoked when a timer expires or is explicitly removed with `notify = true`.
/// Runs on the reactor thread; per spec.md §6 it must be idempotent with the close path.
pub type Callback = Box<dyn FnMut(RawFd) + Send>;

struct Node {
    fd: RawFd,
    expiry: Instant,
    callback: Callback,
}

/// A binary min-heap of per-connection expiry times.
///
/// Invariant: for every index `i`, `index_of[heap[i].fd] == i`, and for `i > 0`,
/// `heap[(i-1)/2].expiry <= heap[i].expiry`.
#[derive(Default)]
pub struct TimerHeap {
    heap: Vec<Node>,
    index_of: HashMap<RawFd, usize>,
}

impl TimerHeap {
    pub fn new() -> Self {
        TimerHeap { heap: Vec::new(), index_of: HashMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Inserts a timer for `fd` expiring `timeout_ms` from now. If `fd` already has a
    /// timer, it's relocated (expiry updated, then re-sifted in whichever direction is
    /// needed) rather than duplicated.
    pub fn add(&mut self, fd: RawFd, timeout_ms: u64, callback: Callback) {
        if let Some(&idx) = self.index_of.get(&fd) {
            self.heap[idx].expiry = Instant::now() + Duration::from_millis(timeout_ms);
            self.heap[idx].callback = callback;
            self.resift(idx);
            return;
        }

        let idx = self.heap.len();
        self.heap.push(Node {
            fd,
            expiry: Instant::now() + Duration::from_millis(timeout_ms),
            callback,
        });
        self.index_of.insert(fd, idx);
        self.sift_up(idx);
    }

    /// Resets `fd`'s expiry to `now + new_timeout_ms`. Expirations only ever extend in
    /// practice (each event refreshes the timer), but we re-sift both directions to stay
    /// correct regardless.
    pub fn adjust(&mut self, fd: RawFd, new_timeout_ms: u64) {
        if let Some(&idx) = self.index_of.get(&fd) {
            self.heap[idx].expiry = Instant::now() + Duration::from_millis(new_timeout_ms);
            self.resift(idx);
        }
    }

    /// Removes `fd`'s timer. If `notify` is set, its callback is invoked first (used by
    /// the close path to guarantee the callback's idempotent guard sees a consistent
    /// state exactly once).
    pub fn remove(&mut self, fd: RawFd, notify: bool) {
        let Some(idx) = self.index_of.remove(&fd) else { return };

        if notify {
            (self.heap[idx].callback)(fd);
        }

        let last = self.heap.len() - 1;
        if idx != last {
            self.heap.swap(idx, last);
            self.index_of.insert(self.heap[idx].fd, idx);
        }
        self.heap.pop();

        if idx < self.heap.len() {
            self.resift(idx);
        }
    }

    /// While the root has expired, invokes its callback and removes it.
    pub fn tick(&mut self) {
        let now = Instant::now();
        while let Some(node) = self.heap.first() {
            if node.expiry > now {
                break;
            }
            let fd = node.fd;
            self.remove(fd, true);
        }
    }

    /// Ticks, then returns the root's remaining milliseconds, or `-1` ("wait
    /// indefinitely") if the heap is empty.
    pub fn next_tick_ms(&mut self) -> i32 {
        self.tick();
        match self.heap.first() {
            None => -1,
            Some(node) => {
                let now = Instant::now();
                if node.expiry <= now {
                    0
                } else {
                    (node.expiry - now).as_millis().min(i32::MAX as u128) as i32
                }
            }
        }
    }

    fn resift(&mut self, idx: usize) {
        let moved_up = self.sift_up(idx);
        if !moved_up {
            self.sift_down(idx);
        }
    }

    fn sift_up(&mut self, mut idx: usize) -> bool {
        let start = idx;
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[parent].expiry <= self.heap[idx].expiry {
                break;
            }
            self.swap(parent, idx);
            idx = parent;
        }
        idx != start
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < len && self.heap[left].expiry < self.heap[smallest].expiry {
                smallest = left;
            }
            if right < len && self.heap[right].expiry < self.heap[smallest].expiry {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index_of.insert(self.heap[a].fd, a);
        self.index_of.insert(self.heap[b].fd, b);
    }

    #[cfg(test)]
    fn check_invariant(&self) {
        for i in 0..self.heap.len() {
            assert_eq!(self.index_of[&self.heap[i].fd], i);
            if i > 0 {
                assert!(self.heap[(i - 1) / 2].expiry <= self.heap[i].expiry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn add_preserves_heap_invariant() {
        let mut heap = TimerHeap::new();
        for fd in 0..50 {
            let timeout = (50 - fd) as u64;
            heap.add(fd, timeout, Box::new(|_| {}));
            heap.check_invariant();
        }
    }

    #[test]
    fn adjust_relocates_and_preserves_invariant() {
        let mut heap = TimerHeap::new();
        for fd in 0..20 {
            heap.add(fd, (fd + 1) as u64 * 10, Box::new(|_| {}));
        }
        heap.adjust(3, 5000);
        heap.check_invariant();
        heap.adjust(19, 1);
        heap.check_invariant();
    }

    #[test]
    fn remove_swaps_with_last_and_preserves_invariant() {
        let mut heap = TimerHeap::new();
        for fd in 0..20 {
            heap.add(fd, (20 - fd) as u64, Box::new(|_| {}));
        }
        for fd in [0, 10, 19, 5] {
            heap.remove(fd, false);
            heap.check_invariant();
        }
        assert_eq!(heap.len(), 16);
    }

    #[test]
    fn tick_invokes_only_expired_callbacks_in_order() {
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut heap = TimerHeap::new();
        for fd in 0..5 {
            let fired = fired.clone();
            heap.add(fd, 0, Box::new(move |fd| fired.lock().unwrap().push(fd)));
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
        heap.tick();
        assert_eq!(fired.lock().unwrap().len(), 5);
        assert!(heap.is_empty());
    }

    #[test]
    fn next_tick_ms_is_negative_one_when_empty() {
        let mut heap = TimerHeap::new();
        assert_eq!(heap.next_tick_ms(), -1);
    }

    #[test]
    fn remove_with_notify_calls_callback_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut heap = TimerHeap::new();
        let count2 = count.clone();
        heap.add(7, 10_000, Box::new(move |_| { count2.fetch_add(1, Ordering::SeqCst); }));
        heap.remove(7, true);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn random_interleaving_preserves_invariant() {
        let mut heap = TimerHeap::new();
        let mut live: Vec<RawFd> = Vec::new();
        let mut x: u32 = 12345;
        let mut next = || {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x
        };
        for i in 0..300 {
            match next() % 4 {
                0 => {
                    let fd = i as RawFd;
                    heap.add(fd, (next() % 1000) as u64, Box::new(|_| {}));
                    live.push(fd);
                }
                1 if !live.is_empty() => {
                    let fd = live[next() as usize % live.len()];
                    heap.adjust(fd, (next() % 1000) as u64);
                }
                2 if !live.is_empty() => {
                    let idx = next() as usize % live.len();
                    let fd = live.remove(idx);
                    heap.remove(fd, false);
                }
                _ => {
                    heap.tick();
                }
            }
            heap.check_invariant();
        }
    }
}

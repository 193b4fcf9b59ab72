//! Deferred block reclamation.
//!
//! The map cannot free a block the moment it is unlinked: a concurrent
//! traversal may have read the block's address just before the unlink and
//! still be reading its words. There is no GC to wait on, so unlinked
//! blocks are retired into a queue and physically freed only after a fixed
//! delay, chosen so that any traversal that could still hold the address
//! has long since finished or restarted.
//!
//! A single reaper thread per map drains the queue. It is spawned lazily on
//! the first retire, sleeps until the oldest entry's deadline, frees every
//! due block and goes back to waiting. [`Reclaimer::shutdown_and_drain`]
//! stops the reaper and frees everything still queued, which is what makes
//! drop deterministic: after it returns, every retired block has been given
//! back to the allocator.
//!
//! Retirement is exactly-once by construction: a data block is retired only
//! by the thread whose CAS removed its single unmarked in-pointer (see
//! [`crate::list`]), a discarded head cell only by the thread whose head CAS
//! dropped the level, and an unspliced tower remainder only by the inserter
//! that built it, so the queue never sees the same address twice.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::arena::Arena;
use crate::index::IndexRef;
use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::tracing_helpers::{debug_log, trace_log, warn_log};

/// A retirement awaiting its reclamation deadline.
struct Retired {
    addr: u64,
    due: Instant,
    kind: RetireKind,
}

/// What `addr` points at, which decides how much is freed at the deadline.
#[derive(Clone, Copy)]
enum RetireKind {
    /// One unlinked block.
    Block,
    /// A head cell discarded by level reduction. Cells a straggling index
    /// build linked into its chain after the discard go with it.
    Level,
    /// The unspliced remainder of an index tower, freed with its whole
    /// down chain.
    Tower,
}

struct Shared {
    arena: Arc<Arena>,
    delay: Duration,
    /// Oldest deadline first. Out-of-order pushes from racing retires can
    /// only extend a block's wait, never shorten it.
    queue: Mutex<VecDeque<Retired>>,
    wake: Condvar,
    shutdown: AtomicBool,
}

/// Fixed-delay reclamation queue with a lazily spawned reaper thread.
pub(crate) struct Reclaimer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Reclaimer {
    pub(crate) fn new(arena: Arc<Arena>, delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                arena,
                delay,
                queue: Mutex::new(VecDeque::new()),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Schedule an unlinked block to be freed once the delay elapses.
    ///
    /// The caller must be the thread whose CAS unlinked the block, and must
    /// not retire the same address twice.
    pub(crate) fn retire(&self, addr: u64) {
        self.retire_as(addr, RetireKind::Block);
    }

    /// Schedule a head cell discarded by level reduction. At the deadline
    /// the cell and anything still linked on its right chain are freed
    /// together.
    pub(crate) fn retire_level(&self, addr: u64) {
        self.retire_as(addr, RetireKind::Level);
    }

    /// Schedule the unspliced remainder of an index tower. At the deadline
    /// the cell and its whole down chain are freed.
    pub(crate) fn retire_tower(&self, addr: u64) {
        self.retire_as(addr, RetireKind::Tower);
    }

    fn retire_as(&self, addr: u64, kind: RetireKind) {
        debug_assert!(addr != 0);
        self.ensure_worker();

        let due = Instant::now() + self.shared.delay;
        self.shared.queue.lock().push_back(Retired { addr, due, kind });
        self.shared.wake.notify_one();

        trace_log!(addr, "retired block");
    }

    /// Number of blocks queued and not yet freed.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Stop the reaper and free every queued block immediately.
    ///
    /// Idempotent. Callers must guarantee no concurrent map access: this
    /// frees blocks without waiting out their delay.
    pub(crate) fn shutdown_and_drain(&self) {
        self.shared.shutdown.store(true, WRITE_ORD);
        self.shared.wake.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }

        let drained: VecDeque<Retired> = std::mem::take(&mut *self.shared.queue.lock());
        debug_log!(count = drained.len(), "draining reclaim queue");
        for retired in drained {
            // The reaper is joined and the caller guarantees exclusive
            // access, so the delay can be skipped.
            release(&self.shared.arena, &retired);
        }
    }

    fn ensure_worker(&self) {
        if self.started.load(READ_ORD) {
            return;
        }
        let mut worker = self.worker.lock();
        if worker.is_none() {
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name("offskip-reclaim".into())
                .spawn(move || reap(&shared))
            {
                Ok(handle) => {
                    *worker = Some(handle);
                    self.started.store(true, WRITE_ORD);
                }
                Err(_e) => {
                    // Entries stay queued; shutdown_and_drain frees them.
                    warn_log!("failed to spawn reclaim thread");
                }
            }
        } else {
            self.started.store(true, WRITE_ORD);
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.shutdown_and_drain();
    }
}

fn reap(shared: &Shared) {
    loop {
        let mut due_batch: Vec<Retired> = Vec::new();
        {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(READ_ORD) {
                    // Remaining entries are drained by shutdown_and_drain.
                    return;
                }
                let now = Instant::now();
                while queue.front().is_some_and(|r| r.due <= now) {
                    due_batch.extend(queue.pop_front());
                }
                if !due_batch.is_empty() {
                    break;
                }
                match queue.front().map(|r| r.due) {
                    Some(deadline) => {
                        let _ = shared.wake.wait_until(&mut queue, deadline);
                    }
                    None => shared.wake.wait(&mut queue),
                }
            }
        }

        debug_log!(count = due_batch.len(), "freeing due blocks");
        for retired in due_batch {
            release(&shared.arena, &retired);
        }
    }
}

/// Free one retired entry. The entry's delay has elapsed (or the caller has
/// exclusive access), so no traversal can still hold any of the addresses
/// involved; retirement is exactly-once.
fn release(arena: &Arena, retired: &Retired) {
    match retired.kind {
        RetireKind::Block => {
            // SAFETY: see above; this is the block's only free.
            unsafe { arena.free(retired.addr) };
        }
        RetireKind::Level => {
            // The chain is frozen: only an index build holding the old
            // head snapshot could splice here, and those finished within
            // the delay. Cells unlinked from the chain before the deadline
            // were retired by their unlinker and are no longer on it.
            let head = IndexRef::from_word(retired.addr);
            let mut cell = head.right();
            while !cell.is_null() {
                let succ = cell.right();
                cell.free_now(arena);
                cell = succ;
            }
            head.free_now(arena);
        }
        RetireKind::Tower => {
            let mut cell = IndexRef::from_word(retired.addr);
            while !cell.is_null() {
                let below = cell.down();
                cell.free_now(arena);
                cell = below;
            }
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================

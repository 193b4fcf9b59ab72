//! The concurrent skip-list map.
//!
//! [`SkipListMap`] keeps an ordered base-level linked list of data nodes
//! with a tower of index levels above it for logarithmic search, all in
//! manually managed block memory. Readers never block and never retry more
//! than a deletion forces them to; writers synchronize exclusively through
//! single-word CAS.
//!
//! # Deletion protocol
//!
//! Removal happens in three published steps, each a CAS:
//!
//! 1. value word `v -> 0` (the linearization point; the binding is gone),
//! 2. the node's next word gains its mark bit (no insert can append behind
//!    the dying node, because the append CAS would see the marked word),
//! 3. the predecessor's next word swings past the node (physical unlink).
//!
//! Any traversal that sees a zero value helps with exactly one of the
//! remaining steps before retrying, so a stalled remover never blocks the
//! structure. The thread whose CAS performs step 3 owns the node's single
//! unmarked in-pointer and is the one that retires the block.
//!
//! # Traversal snapshots
//!
//! The search loops work over a three-node window `(b, n, f)` and restart
//! when the window is stale: `n != b.next()` (inconsistent read), `n`
//! deleted (help, then retry), or `n` marked / `b` deleted (the
//! predecessor is gone; a fresh [`find_predecessor`] routes around it).
//! `find_predecessor` also unlinks index cells over deleted nodes as it
//! walks, and every removal ends with such a sweep, so no index cell for a
//! key outlives that key's removal.
//!
//! [`find_predecessor`]: SkipListMap::find_predecessor

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::time::Duration;

use parking_lot::Mutex;

use crate::arena::Arena;
use crate::error::Error;
use crate::index::IndexRef;
use crate::level::LevelGenerator;
use crate::node::{KEY_LEN, NodeRef};
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED};
use crate::reclaim::Reclaimer;

mod find;
mod insert;
mod remove;


// ============================================================================
//  Config
// ============================================================================

/// Construction-time tuning for a [`SkipListMap`].
#[derive(Debug, Clone)]
pub struct Config {
    /// How long an unlinked block stays readable before it is freed.
    ///
    /// Must comfortably exceed the duration of any single traversal. The
    /// default of 100 ms is orders of magnitude above that while keeping
    /// leak convergence observable in tests.
    pub reclaim_delay: Duration,

    /// Cap on simultaneously live blocks (nodes, index cells and head
    /// cells together). `None` means no cap.
    pub capacity: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reclaim_delay: Duration::from_millis(100),
            capacity: None,
        }
    }
}

// ============================================================================
//  SkipListMap
// ============================================================================

/// A lock-free ordered map from 20-byte keys to nonzero `u64` values on
/// manually managed memory.
///
/// All operations are linearizable and safe to call from any number of
/// threads through a shared reference. Memory for removed entries is given
/// back to the allocator after a fixed delay (see [`Config`]); the rest is
/// released on drop.
///
/// # Examples
///
/// ```
/// use offskip::SkipListMap;
///
/// let map = SkipListMap::new();
/// let key = [7u8; 20];
///
/// assert_eq!(map.put(&key, 42)?, None);
/// assert_eq!(map.get(&key)?, Some(42));
/// assert_eq!(map.remove(&key)?, Some(42));
/// assert_eq!(map.get(&key)?, None);
/// # Ok::<(), offskip::Error>(())
/// ```
pub struct SkipListMap {
    /// Address of the topmost head cell.
    head: AtomicU64,

    arena: Arc<Arena>,
    reclaimer: Reclaimer,
    level_gen: LevelGenerator,

    /// Live bindings. Maintained at the linearization points, so exact for
    /// quiescent maps and approximate mid-flight.
    count: AtomicUsize,

    /// Every head cell currently on the head stack. Level reduction
    /// unregisters the head it discards and hands it to the reclaimer.
    head_registry: Mutex<Vec<u64>>,
}

impl SkipListMap {
    /// Create an empty map with the default [`Config`].
    ///
    /// # Panics
    ///
    /// Aborts the process if the system allocator cannot provide the two
    /// initial blocks, the way std containers respond to allocation
    /// failure.
    #[must_use]
    pub fn new() -> Self {
        match Self::with_config(Config::default()) {
            Ok(map) => map,
            // No cap in the default config, so this is system OOM.
            Err(_) => std::alloc::handle_alloc_error(crate::arena::BLOCK_LAYOUT),
        }
    }

    /// Create an empty map with an explicit [`Config`].
    ///
    /// # Errors
    ///
    /// [`Error::ArenaExhausted`] if the initial header node and head cell
    /// cannot be allocated under the configured cap.
    pub fn with_config(config: Config) -> Result<Self, Error> {
        let arena = Arc::new(Arena::new(config.capacity));
        let reclaimer = Reclaimer::new(Arc::clone(&arena), config.reclaim_delay);

        let header = NodeRef::alloc_header(&arena)?;
        let head = match IndexRef::alloc_head(&arena, header, IndexRef::NULL, IndexRef::NULL, 1) {
            Ok(cell) => cell,
            Err(e) => {
                header.free_now(&arena);
                return Err(e);
            }
        };

        Ok(Self {
            head: AtomicU64::new(head.addr()),
            arena,
            reclaimer,
            level_gen: LevelGenerator::from_entropy(),
            count: AtomicUsize::new(0),
            head_registry: Mutex::new(vec![head.addr()]),
        })
    }

    // ========================================================================
    //  Public operations
    // ========================================================================

    /// Value bound to `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// [`Error::KeyLength`] if `key` is not exactly [`KEY_LEN`] bytes.
    pub fn get(&self, key: &[u8]) -> Result<Option<u64>, Error> {
        let key = check_key(key)?;
        Ok(self.do_get(key))
    }

    /// Bind `value` to `key`, replacing any existing binding. Returns the
    /// previous value, or `None` if the key was absent.
    ///
    /// # Errors
    ///
    /// [`Error::KeyLength`] for a key that is not [`KEY_LEN`] bytes,
    /// [`Error::ReservedValue`] for `value == 0`, and
    /// [`Error::ArenaExhausted`] when a new entry cannot be allocated.
    pub fn put(&self, key: &[u8], value: u64) -> Result<Option<u64>, Error> {
        let key = check_key(key)?;
        if value == 0 {
            return Err(Error::ReservedValue);
        }
        self.do_put(key, value, false)
    }

    /// Bind `value` to `key` only if the key is absent. Returns the
    /// existing value untouched when there is one.
    ///
    /// # Errors
    ///
    /// Same as [`SkipListMap::put`].
    pub fn put_if_absent(&self, key: &[u8], value: u64) -> Result<Option<u64>, Error> {
        let key = check_key(key)?;
        if value == 0 {
            return Err(Error::ReservedValue);
        }
        self.do_put(key, value, true)
    }

    /// Remove the binding for `key`, returning its value.
    ///
    /// # Errors
    ///
    /// [`Error::KeyLength`] if `key` is not exactly [`KEY_LEN`] bytes.
    pub fn remove(&self, key: &[u8]) -> Result<Option<u64>, Error> {
        let key = check_key(key)?;
        Ok(self.do_remove(key, 0))
    }

    /// Remove the binding for `key` only if its value equals `expected`.
    /// Returns the removed value, or `None` when the key is absent or
    /// bound to a different value.
    ///
    /// # Errors
    ///
    /// [`Error::KeyLength`] for a bad key length and
    /// [`Error::ReservedValue`] for `expected == 0` (no binding can hold 0,
    /// so the comparison would be meaningless).
    pub fn remove_if_eq(&self, key: &[u8], expected: u64) -> Result<Option<u64>, Error> {
        let key = check_key(key)?;
        if expected == 0 {
            return Err(Error::ReservedValue);
        }
        Ok(self.do_remove(key, expected))
    }

    /// Number of live bindings. Exact when the map is quiescent.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(RELAXED)
    }

    /// Whether the map holds no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of memory blocks currently allocated, retired-but-unfreed
    /// blocks included. An empty quiescent map settles at the header node
    /// plus its head cells.
    #[must_use]
    pub fn outstanding_blocks(&self) -> usize {
        self.arena.outstanding()
    }

    // ========================================================================
    //  Head access
    // ========================================================================

    /// The topmost head cell.
    #[inline]
    pub(crate) fn head(&self) -> IndexRef {
        IndexRef::from_word(self.head.load(READ_ORD))
    }

    /// CAS the topmost head cell.
    #[inline]
    pub(crate) fn cas_head(&self, expected: IndexRef, update: IndexRef) -> bool {
        self.head
            .compare_exchange(expected.addr(), update.addr(), CAS_SUCCESS, CAS_FAILURE)
            .is_ok()
    }
}

impl Default for SkipListMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SkipListMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipListMap")
            .field("len", &self.len())
            .field("levels", &self.head().level())
            .field("outstanding_blocks", &self.outstanding_blocks())
            .finish_non_exhaustive()
    }
}

impl Drop for SkipListMap {
    fn drop(&mut self) {
        // Stop the reaper and free everything already retired. `&mut self`
        // guarantees no concurrent operation, so no delay is needed.
        self.reclaimer.shutdown_and_drain();

        let header = self.head().node();

        // Index cells live in exactly one right-chain each; after the drain
        // above, every remaining chain hangs off a registered head cell.
        let heads = std::mem::take(&mut *self.head_registry.lock());
        for &addr in &heads {
            let head = IndexRef::from_word(addr);
            let mut cell = head.right();
            while !cell.is_null() {
                let succ = cell.right();
                cell.free_now(&self.arena);
                cell = succ;
            }
        }
        for &addr in &heads {
            IndexRef::from_word(addr).free_now(&self.arena);
        }

        // The base-level list, logically deleted nodes included.
        let mut node = header;
        while !node.is_null() {
            let succ = node.next().unmarked();
            node.free_now(&self.arena);
            node = succ;
        }

        debug_assert_eq!(
            self.arena.outstanding(),
            0,
            "teardown must return every block"
        );
    }
}

/// Validate a user key's length.
fn check_key(key: &[u8]) -> Result<&[u8; KEY_LEN], Error> {
    key.try_into().map_err(|_| Error::KeyLength { len: key.len() })
}

// ============================================================================
//  Tests
// ============================================================================

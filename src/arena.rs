//! Raw block allocation and word-level atomics.
//!
//! This is the only module that touches memory through raw pointers. It
//! exposes exactly five primitives over manually managed blocks: allocate,
//! free, atomic load, atomic store and compare-and-swap, plus a byte copy
//! for one-time key initialization. Everything above it ([`crate::node`],
//! [`crate::index`]) works in terms of block addresses (`u64`) and these
//! primitives, and the traversal engines in [`crate::list`] contain no
//! `unsafe` at all.
//!
//! Blocks are a single fixed size, large enough for the widest encoding
//! (a data node), so free paths never need to recover a length. Blocks are
//! zero-initialized and aligned to [`BLOCK_ALIGN`], which keeps the low bit
//! of every block address clear for use as a deletion mark.
//!
//! # Safety
//!
//! Addresses round-trip through `u64`: a block address is produced by an
//! `as` cast from the allocation pointer (exposing its provenance) and
//! pointers are later reconstituted from that integer. All concurrent word
//! access goes through [`AtomicU64`] references, so there are no data races
//! on live blocks; non-atomic byte writes are only performed on blocks that
//! have not been published yet. Callers of the word primitives must
//! guarantee the address refers to a block that has been allocated here and
//! not yet freed. The deferred reclamation window in [`crate::reclaim`] is
//! what extends that guarantee to concurrent readers of unlinked blocks.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::Error;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, RELAXED};

// ============================================================================
//  Block geometry
// ============================================================================

/// Size of every block in bytes. Sized for the widest encoding (data node);
/// index and head cells use a prefix of it.
pub(crate) const BLOCK_LEN: usize = 40;

/// Block alignment. Must be at least 2 so the low address bit is free to
/// carry the deletion mark; 8 also gives the word fields natural alignment.
pub(crate) const BLOCK_ALIGN: usize = 8;

pub(crate) const BLOCK_LAYOUT: Layout = match Layout::from_size_align(BLOCK_LEN, BLOCK_ALIGN) {
    Ok(layout) => layout,
    Err(_) => panic!("block layout must be valid"),
};

// ============================================================================
//  Arena
// ============================================================================

/// Block allocator with leak accounting and an optional block cap.
///
/// The arena does not own a memory region; each block is a separate system
/// allocation, freed individually. What the arena tracks is the number of
/// blocks currently outstanding, which is the observable for leak tests and
/// the gate for the configured cap.
#[derive(Debug)]
pub(crate) struct Arena {
    /// Blocks allocated and not yet freed.
    outstanding: AtomicUsize,

    /// Maximum number of simultaneously live blocks, if configured.
    capacity: Option<usize>,
}

impl Arena {
    /// Create an arena with an optional block cap.
    #[must_use]
    pub(crate) const fn new(capacity: Option<usize>) -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Allocate one zeroed block and return its address.
    ///
    /// # Errors
    ///
    /// [`Error::ArenaExhausted`] if the block cap is reached or the system
    /// allocator returns null.
    pub(crate) fn alloc(&self) -> Result<u64, Error> {
        if let Some(cap) = self.capacity {
            let claimed = self
                .outstanding
                .fetch_update(RELAXED, RELAXED, |n| (n < cap).then_some(n + 1));
            if claimed.is_err() {
                return Err(Error::ArenaExhausted);
            }
        } else {
            self.outstanding.fetch_add(1, RELAXED);
        }

        // SAFETY: BLOCK_LAYOUT has non-zero size.
        let ptr = unsafe { alloc_zeroed(BLOCK_LAYOUT) };
        if ptr.is_null() {
            self.outstanding.fetch_sub(1, RELAXED);
            return Err(Error::ArenaExhausted);
        }

        debug_assert!((ptr as usize).is_multiple_of(BLOCK_ALIGN));
        Ok(ptr as u64)
    }

    /// Free a block previously returned by [`Arena::alloc`].
    ///
    /// # Safety
    ///
    /// `addr` must come from this arena's `alloc`, must not have been freed
    /// already, and no thread may access the block after this call. Deferred
    /// callers satisfy the last condition by waiting out the reclamation
    /// delay after the block became unreachable.
    pub(crate) unsafe fn free(&self, addr: u64) {
        debug_assert!(addr != 0);
        // SAFETY: per contract, addr is a live allocation with BLOCK_LAYOUT.
        unsafe { dealloc(to_ptr(addr), BLOCK_LAYOUT) };
        self.outstanding.fetch_sub(1, RELAXED);
    }

    /// Number of blocks currently allocated and not freed.
    #[inline]
    #[must_use]
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(RELAXED)
    }
}

// ============================================================================
//  Word primitives
// ============================================================================

#[inline(always)]
#[expect(
    clippy::cast_possible_truncation,
    reason = "block addresses fit usize on supported 64-bit targets"
)]
fn to_ptr(addr: u64) -> *mut u8 {
    addr as usize as *mut u8
}

/// Atomically load the word at `addr + offset`.
///
/// # Safety
///
/// `addr` must be a live block from [`Arena::alloc`] and `offset` an
/// 8-aligned offset within it.
#[inline(always)]
pub(crate) unsafe fn load_word(addr: u64, offset: usize, ord: Ordering) -> u64 {
    debug_assert!(offset.is_multiple_of(8) && offset < BLOCK_LEN);
    // SAFETY: per contract the cell is inside a live, zero-initialized,
    // 8-aligned block, and all concurrent access is through AtomicU64.
    unsafe { (*to_ptr(addr).add(offset).cast::<AtomicU64>()).load(ord) }
}

/// Atomically store the word at `addr + offset`.
///
/// # Safety
///
/// Same contract as [`load_word`].
#[inline(always)]
pub(crate) unsafe fn store_word(addr: u64, offset: usize, word: u64, ord: Ordering) {
    debug_assert!(offset.is_multiple_of(8) && offset < BLOCK_LEN);
    // SAFETY: see load_word.
    unsafe { (*to_ptr(addr).add(offset).cast::<AtomicU64>()).store(word, ord) };
}

/// Compare-and-swap the word at `addr + offset`. Returns `true` on success.
///
/// # Safety
///
/// Same contract as [`load_word`].
#[inline(always)]
pub(crate) unsafe fn cas_word(addr: u64, offset: usize, expected: u64, update: u64) -> bool {
    debug_assert!(offset.is_multiple_of(8) && offset < BLOCK_LEN);
    // SAFETY: see load_word.
    unsafe {
        (*to_ptr(addr).add(offset).cast::<AtomicU64>())
            .compare_exchange(expected, update, CAS_SUCCESS, CAS_FAILURE)
            .is_ok()
    }
}

/// Copy `bytes` into the block at `addr + offset`, non-atomically.
///
/// # Safety
///
/// Same location contract as [`load_word`], plus: the block must not have
/// been published to other threads yet. The publishing CAS afterwards is
/// what makes these bytes visible.
#[inline]
pub(crate) unsafe fn write_bytes(addr: u64, offset: usize, bytes: &[u8]) {
    debug_assert!(offset + bytes.len() <= BLOCK_LEN);
    // SAFETY: destination lies within a live block and no other thread can
    // access it before publication.
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), to_ptr(addr).add(offset), bytes.len()) };
}

/// Copy `N` bytes out of the block at `addr + offset`.
///
/// # Safety
///
/// Same location contract as [`load_word`]. The bytes must have been
/// written before the block was published, so reading them after an
/// acquire load of the linking word is race-free.
#[inline]
pub(crate) unsafe fn read_bytes<const N: usize>(addr: u64, offset: usize) -> [u8; N] {
    debug_assert!(offset + N <= BLOCK_LEN);
    let mut out = [0u8; N];
    // SAFETY: source lies within a live block; the bytes are immutable
    // after publication.
    unsafe { std::ptr::copy_nonoverlapping(to_ptr(addr).add(offset), out.as_mut_ptr(), N) };
    out
}

// ============================================================================
//  Tests
// ============================================================================

//! Data-node encoding over raw blocks.
//!
//! A data node is one block holding a 20-byte key, a value word and a next
//! word:
//!
//! ```text
//! offset  0                    20      24        32        40
//!         +--------------------+-------+---------+---------+
//!         | key (20 bytes)     | pad   | value   | next    |
//!         +--------------------+-------+---------+---------+
//! ```
//!
//! The key is written once before the node is published and never changes.
//! `value == 0` means the node is logically deleted; the base-level header
//! carries the reserved [`base_header`] word instead of a user value. The
//! next word holds the successor's block address, with the low bit set once
//! the node's deletion is committed (Harris-style marked pointer; block
//! alignment keeps that bit clear in real addresses).
//!
//! [`NodeRef`] wraps a raw next-word, so a value of it may be null, marked
//! or both-clear; accessors that read fields require an unmarked, non-null
//! reference and debug-assert it. The safety story for every accessor is
//! the same: the referenced block stays readable until the deferred
//! reclamation delay expires after unlink, and callers never hold a
//! reference across that window.

use std::cmp::Ordering as CmpOrdering;
use std::sync::OnceLock;

use crate::arena::{self, Arena};
use crate::error::Error;
use crate::ordering::{READ_ORD, RELAXED};

/// Exact length of every key, in bytes.
pub const KEY_LEN: usize = 20;

const KEY: usize = 0;
// Offsets 20..24 are padding so the word fields stay 8-aligned.
const VALUE: usize = 24;
const NEXT: usize = 32;

const _: () = assert!(KEY + KEY_LEN <= VALUE);
const _: () = assert!(VALUE % 8 == 0 && NEXT % 8 == 0);
const _: () = assert!(NEXT + 8 <= arena::BLOCK_LEN);
const _: () = assert!(arena::BLOCK_ALIGN % 2 == 0, "low bit must be free for the mark");

static BASE_HEADER: OnceLock<u64> = OnceLock::new();

/// Reserved value word identifying the base-level header node.
///
/// The address of a private one-byte allocation that lives for the whole
/// process: nonzero, never handed out, and therefore distinct from every
/// user value in practice.
pub(crate) fn base_header() -> u64 {
    *BASE_HEADER.get_or_init(|| Box::leak(Box::new(0u8)) as *mut u8 as u64)
}

// ============================================================================
//  NodeRef
// ============================================================================

/// A data-node reference: a raw next-word (address plus optional mark bit).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct NodeRef(u64);

impl NodeRef {
    /// The null reference.
    pub(crate) const NULL: Self = Self(0);

    /// Wrap a raw word read from a next field.
    #[inline]
    pub(crate) const fn from_word(word: u64) -> Self {
        Self(word)
    }

    /// The raw word, mark bit included.
    #[inline]
    pub(crate) const fn word(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Whether the mark bit is set on this word.
    #[inline]
    pub(crate) const fn is_marked(self) -> bool {
        self.0 & 1 != 0
    }

    /// This reference with the mark bit cleared.
    #[inline]
    pub(crate) const fn unmarked(self) -> Self {
        Self(self.0 & !1)
    }

    /// This reference with the mark bit set.
    #[inline]
    const fn with_mark(self) -> Self {
        Self(self.0 | 1)
    }

    /// Allocate and initialize a regular node. Not yet published; the
    /// caller's linking CAS is what makes it visible.
    pub(crate) fn alloc(
        arena: &Arena,
        key: &[u8; KEY_LEN],
        value: u64,
        next: Self,
    ) -> Result<Self, Error> {
        let addr = arena.alloc()?;
        // SAFETY: addr is a fresh, unpublished block from this arena.
        unsafe {
            arena::write_bytes(addr, KEY, key);
            arena::store_word(addr, VALUE, value, RELAXED);
            arena::store_word(addr, NEXT, next.word(), RELAXED);
        }
        Ok(Self(addr))
    }

    /// Allocate the base-level header node: zero key, [`base_header`] value,
    /// null next.
    pub(crate) fn alloc_header(arena: &Arena) -> Result<Self, Error> {
        let addr = arena.alloc()?;
        // SAFETY: fresh unpublished block; key bytes stay zeroed.
        unsafe { arena::store_word(addr, VALUE, base_header(), RELAXED) };
        Ok(Self(addr))
    }

    /// Copy of this node's key bytes.
    #[inline]
    pub(crate) fn key(self) -> [u8; KEY_LEN] {
        debug_assert!(!self.is_null() && !self.is_marked());
        // SAFETY: unmarked non-null reference to a block inside the
        // reclamation window; key bytes are immutable after publication.
        unsafe { arena::read_bytes::<KEY_LEN>(self.0, KEY) }
    }

    /// Ordering of `probe` relative to this node's key (unsigned bytewise).
    #[inline]
    pub(crate) fn cmp_key(self, probe: &[u8; KEY_LEN]) -> CmpOrdering {
        probe.cmp(&self.key())
    }

    /// Current value word. Zero means logically deleted.
    #[inline]
    pub(crate) fn value(self) -> u64 {
        debug_assert!(!self.is_null() && !self.is_marked());
        // SAFETY: unmarked non-null reference within the reclamation window.
        unsafe { arena::load_word(self.0, VALUE, READ_ORD) }
    }

    /// Current next word, possibly marked.
    #[inline]
    pub(crate) fn next(self) -> Self {
        debug_assert!(!self.is_null() && !self.is_marked());
        // SAFETY: unmarked non-null reference within the reclamation window.
        Self(unsafe { arena::load_word(self.0, NEXT, READ_ORD) })
    }

    /// CAS the value field.
    #[inline]
    pub(crate) fn cas_value(self, expected: u64, update: u64) -> bool {
        debug_assert!(!self.is_null() && !self.is_marked());
        // SAFETY: unmarked non-null reference within the reclamation window.
        unsafe { arena::cas_word(self.0, VALUE, expected, update) }
    }

    /// CAS the next field. The update may carry the mark bit.
    #[inline]
    pub(crate) fn cas_next(self, expected: Self, update: Self) -> bool {
        debug_assert!(!self.is_null() && !self.is_marked());
        debug_assert!(update.word() != self.0, "no self-links");
        // SAFETY: unmarked non-null reference within the reclamation window.
        unsafe { arena::cas_word(self.0, NEXT, expected.word(), update.word()) }
    }

    /// Commit this node's deletion by marking its next word.
    ///
    /// `f` is the assumed current successor. Fails if the successor changed
    /// or the mark is already set.
    #[inline]
    pub(crate) fn mark(self, f: Self) -> bool {
        self.cas_next(f, f.with_mark())
    }

    /// Whether this node is the base-level header.
    #[inline]
    pub(crate) fn is_base_header(self) -> bool {
        self.value() == base_header()
    }

    /// Free this node's block immediately.
    ///
    /// Only for blocks no other thread can reach: insertion candidates whose
    /// publishing CAS failed, and teardown with exclusive access.
    pub(crate) fn free_now(self, arena: &Arena) {
        debug_assert!(!self.is_null() && !self.is_marked());
        // SAFETY: caller has exclusive access per the conditions above.
        unsafe { arena.free(self.0) };
    }
}

// ============================================================================
//  Tests
// ============================================================================

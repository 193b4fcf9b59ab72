//! Index-cell encoding over raw blocks.
//!
//! Index cells form the express lanes above the base-level list. A cell
//! holds three words, and head cells (the leftmost cell of each level) a
//! fourth:
//!
//! ```text
//! offset  0        8        16       24         32
//!         +--------+--------+--------+----------+
//!         | node   | down   | right  | [level]  |
//!         +--------+--------+--------+----------+
//! ```
//!
//! `node` is the data node the cell indexes and `down` the cell one level
//! below; both are written once before the cell is published. `right` is
//! the live link word, changed only by CAS. Index words never carry a mark
//! bit: deletion of a cell is a plain unlink, made safe by the same
//! reclamation window as data nodes.

use crate::arena::{self, Arena};
use crate::error::Error;
use crate::node::NodeRef;
use crate::ordering::{READ_ORD, RELAXED};
use crate::reclaim::Reclaimer;

const NODE: usize = 0;
const DOWN: usize = NODE + 8;
const RIGHT: usize = DOWN + 8;
const LEVEL: usize = RIGHT + 8;

const _: () = assert!(LEVEL + 8 <= arena::BLOCK_LEN);

// ============================================================================
//  IndexRef
// ============================================================================

/// An index-cell reference. Never marked; null means end of a level.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct IndexRef(u64);

impl IndexRef {
    /// The null reference.
    pub(crate) const NULL: Self = Self(0);

    /// Wrap a raw word read from a `right`, `down` or head field.
    #[inline]
    pub(crate) const fn from_word(word: u64) -> Self {
        Self(word)
    }

    /// The raw block address.
    #[inline]
    pub(crate) const fn addr(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Allocate a regular index cell. Not yet published.
    pub(crate) fn alloc(
        arena: &Arena,
        node: NodeRef,
        down: Self,
        right: Self,
    ) -> Result<Self, Error> {
        let addr = arena.alloc()?;
        // SAFETY: addr is a fresh, unpublished block from this arena.
        unsafe {
            arena::store_word(addr, NODE, node.word(), RELAXED);
            arena::store_word(addr, DOWN, down.addr(), RELAXED);
            arena::store_word(addr, RIGHT, right.addr(), RELAXED);
        }
        Ok(Self(addr))
    }

    /// Allocate a head cell: an index cell that also records its level.
    pub(crate) fn alloc_head(
        arena: &Arena,
        node: NodeRef,
        down: Self,
        right: Self,
        level: usize,
    ) -> Result<Self, Error> {
        let cell = Self::alloc(arena, node, down, right)?;
        // SAFETY: still unpublished; level is immutable afterwards.
        unsafe { arena::store_word(cell.0, LEVEL, level as u64, RELAXED) };
        Ok(cell)
    }

    /// The data node this cell indexes.
    #[inline]
    pub(crate) fn node(self) -> NodeRef {
        debug_assert!(!self.is_null());
        // SAFETY: non-null reference within the reclamation window; the
        // word is immutable after publication.
        NodeRef::from_word(unsafe { arena::load_word(self.0, NODE, RELAXED) })
    }

    /// The cell one level below, or null at level 1.
    #[inline]
    pub(crate) fn down(self) -> Self {
        debug_assert!(!self.is_null());
        // SAFETY: non-null reference; immutable word.
        Self(unsafe { arena::load_word(self.0, DOWN, RELAXED) })
    }

    /// Current right neighbor on this level, or null.
    #[inline]
    pub(crate) fn right(self) -> Self {
        debug_assert!(!self.is_null());
        // SAFETY: non-null reference within the reclamation window.
        Self(unsafe { arena::load_word(self.0, RIGHT, READ_ORD) })
    }

    /// CAS the right link.
    #[inline]
    pub(crate) fn cas_right(self, expected: Self, update: Self) -> bool {
        debug_assert!(!self.is_null());
        // SAFETY: non-null reference within the reclamation window.
        unsafe { arena::cas_word(self.0, RIGHT, expected.addr(), update.addr()) }
    }

    /// This level's height. Meaningful for head cells only; regular cells
    /// read back the block's zero fill.
    #[inline]
    #[expect(clippy::cast_possible_truncation, reason = "levels are at most 31")]
    pub(crate) fn level(self) -> usize {
        debug_assert!(!self.is_null());
        // SAFETY: non-null reference; immutable word.
        let word = unsafe { arena::load_word(self.0, LEVEL, RELAXED) };
        word as usize
    }

    /// Whether the node this cell indexes has been logically deleted.
    #[inline]
    pub(crate) fn indexes_deleted_node(self) -> bool {
        self.node().value() == 0
    }

    /// Try to splice `new_succ` in as this cell's right neighbor.
    ///
    /// `succ` is the expected current neighbor. Refuses when the indexed
    /// node is already deleted, to avoid racing with an unlink that would
    /// lose the new cell.
    #[inline]
    pub(crate) fn link(self, succ: Self, new_succ: Self) -> bool {
        let n = self.node();
        // new_succ is still private; published by the CAS below.
        // SAFETY: unpublished block owned by this thread.
        unsafe { arena::store_word(new_succ.0, RIGHT, succ.addr(), RELAXED) };
        n.value() != 0 && self.cas_right(succ, new_succ)
    }

    /// Try to unlink apparent right neighbor `succ` and retire its block.
    ///
    /// Fails, forcing the caller to retraverse, when this cell's own node
    /// is already deleted.
    #[inline]
    pub(crate) fn unlink(self, succ: Self, reclaimer: &Reclaimer) -> bool {
        let unlinked = !self.indexes_deleted_node() && self.cas_right(succ, succ.right());
        if unlinked {
            reclaimer.retire(succ.addr());
        }
        unlinked
    }

    /// Free this cell's block immediately.
    ///
    /// Only for callers with exclusive access: teardown, never-published
    /// cells, and the reaper once a retirement's delay has expired.
    pub(crate) fn free_now(self, arena: &Arena) {
        debug_assert!(!self.is_null());
        // SAFETY: caller has exclusive access.
        unsafe { arena.free(self.0) };
    }
}

// ============================================================================
//  Tests
// ============================================================================

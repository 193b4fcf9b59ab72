//! Standard memory orderings for concurrent block access.
//!
//! These constants keep ordering usage consistent across the codebase and
//! make the intent clear at each access point. They mirror the volatile /
//! plain split of the access protocol: `value`, `next` and `right` words are
//! link state and use acquire/release; `key` bytes, `node`, `down` and
//! `level` are written once before a block is published and never change
//! afterwards.

use std::sync::atomic::Ordering;

/// Ordering for reading link words (`value`, `next`, `right`) during
/// traversal. Pairs with the publishing CAS / Release store.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing stores of link words.
/// Pairs with traversal's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for CAS success on link words.
/// A successful CAS both publishes the new block and observes the old chain.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for CAS failure.
/// Only need to see the current word to retry.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for immutable words (`node`, `down`, `level`) and for private
/// stores to blocks not yet published. Safe because the publishing CAS
/// provides the happens-before edge.
pub const RELAXED: Ordering = Ordering::Relaxed;

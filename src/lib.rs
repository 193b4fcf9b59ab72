//! # `offskip`
//!
//! A lock-free, ordered map from fixed-length byte keys to `u64` values,
//! stored in manually managed block memory.
//!
//! The structure is a skip list: an ordered base-level linked list plus a
//! tower of index levels for logarithmic search. Deletion uses marked next
//! pointers, so no operation ever takes a lock and a stalled thread never
//! blocks the others, readers included.
//!
//! | Operation | Guarantee |
//! |-----------|-----------|
//! | `get` | Lock-free, linearizable |
//! | `put` / `put_if_absent` | Lock-free CAS append or replace |
//! | `remove` / `remove_if_eq` | Lock-free staged deletion |
//! | `len` | Exact when quiescent, approximate mid-flight |
//!
//! ## Thread Safety
//!
//! [`SkipListMap`] is `Send + Sync`; every operation takes `&self`, so a
//! map behind an `Arc` is shared freely:
//!
//! ```rust
//! use std::sync::Arc;
//! use offskip::SkipListMap;
//!
//! let map = Arc::new(SkipListMap::new());
//!
//! let writer = {
//!     let map = Arc::clone(&map);
//!     std::thread::spawn(move || {
//!         map.put(&[1u8; 20], 7).unwrap();
//!     })
//! };
//! writer.join().unwrap();
//!
//! assert_eq!(map.get(&[1u8; 20]).unwrap(), Some(7));
//! ```
//!
//! ## Key and Value Constraints
//!
//! - Keys are exactly [`KEY_LEN`] (20) bytes, compared lexicographically
//!   as unsigned bytes. Any other length is an [`Error::KeyLength`].
//! - Values are nonzero `u64`s. Zero encodes absence in the value word
//!   itself, which is what makes removal a single CAS; storing it is an
//!   [`Error::ReservedValue`].
//!
//! ## Memory
//!
//! Entries and index cells live in fixed-size blocks owned by the map. A
//! block removed from the structure may still be read by threads that
//! found it before the unlink, so removed blocks are handed to a
//! reclamation queue and freed only after a configurable delay
//! ([`Config::reclaim_delay`]) that bounds those in-flight reads.
//! Everything still allocated is released when the map drops.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod arena;
mod error;
mod index;
mod level;
mod list;
mod node;
mod ordering;
mod reclaim;
mod tracing_helpers;

pub use error::Error;
pub use list::{Config, SkipListMap};
pub use node::KEY_LEN;

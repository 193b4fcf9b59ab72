//! Traversal: predecessor search, exact lookup, and deletion helping.
//!
//! Every base-level loop here and in the insert/remove paths restarts on
//! the same three conditions, checked against a `(b, n, f)` window:
//!
//! 1. `n != b.next()`: the window is stale; none of its links can be
//!    trusted for a CAS.
//! 2. `n`'s value is zero: `n` is logically deleted. Help one stage of the
//!    structural deletion, then retry.
//! 3. `n` is marked, or `b`'s value is zero: the predecessor itself is
//!    deleted (a search can hand back a node that dies right after). Its
//!    own predecessor is unknown here, so only a fresh search can route
//!    around it.

use std::cmp::Ordering;

use crate::node::{KEY_LEN, NodeRef};
use crate::tracing_helpers::trace_log;

use super::SkipListMap;

impl SkipListMap {
    /// Base-level node with key strictly less than `key`, or the header
    /// when no such node exists.
    ///
    /// Unlinks index cells over deleted nodes along the way. Removal
    /// relies on this side effect to clear a dead key's tower.
    pub(crate) fn find_predecessor(&self, key: &[u8; KEY_LEN]) -> NodeRef {
        'restart: loop {
            let mut q = self.head();
            let mut r = q.right();
            loop {
                if !r.is_null() {
                    let n = r.node();
                    if n.value() == 0 {
                        if !q.unlink(r, &self.reclaimer) {
                            continue 'restart;
                        }
                        r = q.right(); // reread
                        continue;
                    }
                    if n.cmp_key(key) == Ordering::Greater {
                        q = r;
                        r = r.right();
                        continue;
                    }
                }
                let d = q.down();
                if d.is_null() {
                    return q.node();
                }
                q = d;
                r = d.right();
            }
        }
    }

    /// Node holding `key`, or null if absent.
    ///
    /// Clears deleted nodes seen along the way; removal relies on this
    /// side effect too.
    pub(crate) fn find_node(&self, key: &[u8; KEY_LEN]) -> NodeRef {
        loop {
            let mut b = self.find_predecessor(key);
            let mut n = b.next();
            loop {
                if n.is_null() {
                    return NodeRef::NULL;
                }
                let nu = n.unmarked();
                if nu.is_null() {
                    break; // b is a deleted last node
                }
                let f = nu.next();
                if n != b.next() {
                    break; // inconsistent read
                }
                if nu.value() == 0 {
                    self.help_delete(b, n, f); // n is deleted
                    break;
                }
                if n.is_marked() || b.value() == 0 {
                    break; // b is deleted
                }
                match nu.cmp_key(key) {
                    Ordering::Equal => return nu,
                    Ordering::Less => return NodeRef::NULL,
                    Ordering::Greater => {
                        b = nu;
                        n = f;
                    }
                }
            }
        }
    }

    /// Lookup. Loops because the value word can go to zero between
    /// finding the node and reading it, in which case the binding was
    /// removed and the search must run again.
    pub(crate) fn do_get(&self, key: &[u8; KEY_LEN]) -> Option<u64> {
        loop {
            let n = self.find_node(key);
            if n.is_null() {
                return None;
            }
            let v = n.value();
            if v != 0 {
                return Some(v);
            }
        }
    }

    /// Advance a stalled structural deletion by exactly one stage.
    ///
    /// Rechecks the `(b, n, f)` snapshot, then either marks the dying
    /// node's next word or, once marked, swings `b` past it. One stage per
    /// call keeps CAS interference between helpers low. The unlink stage
    /// requires an unmarked `n`: a marked `n` means `b` is itself dying,
    /// and its next word has to stay marked.
    pub(crate) fn help_delete(&self, b: NodeRef, n: NodeRef, f: NodeRef) {
        let nu = n.unmarked();
        debug_assert!(!nu.is_null());
        if f == nu.next() && n == b.next() {
            if !f.is_marked() {
                nu.mark(f);
            } else if !n.is_marked() && b.cas_next(n, f.unmarked()) {
                // The CAS removed nu's single unmarked in-pointer, so this
                // helper alone retires the block.
                trace_log!("helped unlink node {:#x}", nu.word());
                self.reclaimer.retire(nu.word());
            }
        }
    }
}

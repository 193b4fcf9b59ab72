//! Removal: value CAS, next-word marking, unlink, and level reduction.

use std::cmp::Ordering;

use crate::index::IndexRef;
use crate::node::KEY_LEN;
use crate::ordering::RELAXED;

use super::SkipListMap;

impl SkipListMap {
    /// Remove `key`'s binding. With `expected != 0`, remove only a binding
    /// holding exactly that value. Returns the removed value.
    ///
    /// The value CAS to zero is the linearization point. Marking and
    /// unlinking follow; when either loses a race to a helper, the final
    /// [`find_node`] pass finishes the structural deletion instead.
    ///
    /// [`find_node`]: SkipListMap::find_node
    pub(crate) fn do_remove(&self, key: &[u8; KEY_LEN], expected: u64) -> Option<u64> {
        loop {
            let mut b = self.find_predecessor(key);
            let mut n = b.next();
            loop {
                if n.is_null() {
                    return None;
                }
                let nu = n.unmarked();
                if nu.is_null() {
                    break; // b is a deleted last node
                }
                let f = nu.next();
                if n != b.next() {
                    break; // inconsistent read
                }
                let v = nu.value();
                if v == 0 {
                    self.help_delete(b, n, f); // n is deleted
                    break;
                }
                if n.is_marked() || b.value() == 0 {
                    break; // b is deleted
                }
                match nu.cmp_key(key) {
                    Ordering::Less => return None,
                    Ordering::Greater => {
                        b = nu;
                        n = f;
                        continue;
                    }
                    Ordering::Equal => {}
                }
                if expected != 0 && expected != v {
                    return None;
                }
                if !nu.cas_value(v, 0) {
                    break; // lost race with another writer
                }
                self.count.fetch_sub(1, RELAXED);

                if !nu.mark(f) || !b.cas_next(n, f) {
                    self.find_node(key); // helpers finish the unlink
                } else {
                    // This thread's CAS unlinked nu, so this thread alone
                    // retires it. The index sweep runs first: the delay
                    // clock starts only once the key's tower is gone.
                    self.find_predecessor(key);
                    self.reclaimer.retire(nu.word());
                    if self.head().right().is_null() {
                        self.try_reduce_level();
                    }
                }
                return Some(v);
            }
        }
    }

    /// Drop the top index level when the top three look empty.
    ///
    /// Can misfire when a racing insert populates the level mid-check; the
    /// backout CAS restores the old head if the removed level turns out
    /// non-empty. A misfire costs search depth, not correctness.
    fn try_reduce_level(&self) {
        let h = self.head();
        if h.level() <= 3 {
            return;
        }
        let d = h.down();
        if d.is_null() {
            return;
        }
        let e = d.down();
        if e.is_null() {
            return;
        }
        if e.right().is_null()
            && d.right().is_null()
            && h.right().is_null()
            && self.cas_head(h, d) // try to set
        {
            if !h.right().is_null() && self.cas_head(d, h) {
                return; // backed out; h is the top again
            }
            // h is off the head stack for good. Only an index build holding
            // a pre-reduction snapshot can still reach or splice into it,
            // so its block and chain wait out the delay like any unlinked
            // cell.
            self.unregister_head(h);
            self.reclaimer.retire_level(h.addr());
        }
    }

    /// Take a discarded head cell out of the registry; the reclaimer owns
    /// its block from here on.
    fn unregister_head(&self, head: IndexRef) {
        let mut registry = self.head_registry.lock();
        if let Some(pos) = registry.iter().position(|&addr| addr == head.addr()) {
            registry.swap_remove(pos);
        }
    }
}

//! Insertion: the base-level append CAS and index tower building.

use std::cmp::Ordering;

use crate::arena::Arena;
use crate::error::Error;
use crate::index::IndexRef;
use crate::level::MAX_LEVEL;
use crate::node::{KEY_LEN, NodeRef};
use crate::ordering::RELAXED;
use crate::tracing_helpers::debug_log;

use super::SkipListMap;

impl SkipListMap {
    /// Insert or replace. Returns the previous value, `None` on a fresh
    /// insert. With `only_if_absent`, an existing binding is returned
    /// untouched.
    pub(crate) fn do_put(
        &self,
        key: &[u8; KEY_LEN],
        value: u64,
        only_if_absent: bool,
    ) -> Result<Option<u64>, Error> {
        loop {
            let mut b = self.find_predecessor(key);
            let mut n = b.next();
            loop {
                if !n.is_null() {
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
                        Ordering::Greater => {
                            b = nu;
                            n = f;
                            continue;
                        }
                        Ordering::Equal => {
                            if only_if_absent || nu.cas_value(v, value) {
                                return Ok(Some(v));
                            }
                            break; // lost race to replace the value
                        }
                        Ordering::Less => {} // splice point found
                    }
                }

                let z = NodeRef::alloc(&self.arena, key, value, n)?;
                if !b.cas_next(n, z) {
                    // Lost the append race. The block was never published,
                    // so it can be freed without a delay.
                    z.free_now(&self.arena);
                    break;
                }
                self.count.fetch_add(1, RELAXED);
                let level = self.level_gen.random_level();
                if level > 0 {
                    self.insert_index(z, level);
                }
                return Ok(None);
            }
        }
    }

    /// Build and splice the index tower for freshly appended `z`.
    ///
    /// A cell allocation failure under the capacity cap degrades the node
    /// to fewer index levels, base-only in the worst case. The binding
    /// itself is already live, so nothing is reported.
    fn insert_index(&self, z: NodeRef, level: usize) {
        let h = self.head();
        let max = h.level();

        if level <= max {
            let mut idx = IndexRef::NULL;
            for _ in 1..=level {
                idx = match IndexRef::alloc(&self.arena, z, idx, IndexRef::NULL) {
                    Ok(cell) => cell,
                    Err(_) => {
                        discard_tower(&self.arena, idx);
                        return;
                    }
                };
            }
            self.add_index(idx, h, level, false);
        } else {
            // A new level is published with its right pointer already in
            // place, so level-reduction probes never see a half-built head
            // chain. That needs the tower in an array: head cells build
            // from the top down while the tower was built bottom-up.
            let level = max + 1;
            let mut idxs = [IndexRef::NULL; MAX_LEVEL + 1];
            let mut idx = IndexRef::NULL;
            for slot in idxs.iter_mut().take(level + 1).skip(1) {
                idx = match IndexRef::alloc(&self.arena, z, idx, IndexRef::NULL) {
                    Ok(cell) => cell,
                    Err(_) => {
                        discard_tower(&self.arena, idx);
                        return;
                    }
                };
                *slot = idx;
            }

            let (oldh, k, upper_linked) = loop {
                let oldh = self.head();
                let old_level = oldh.level();
                if level <= old_level {
                    break (oldh, level, false); // lost race to add the level
                }
                let old_base = oldh.node();
                let mut newh = oldh;
                let mut built = Vec::with_capacity(level - old_level);
                for j in (old_level + 1)..=level {
                    match IndexRef::alloc_head(&self.arena, old_base, newh, idxs[j], j) {
                        Ok(cell) => {
                            newh = cell;
                            built.push(cell);
                        }
                        Err(_) => {
                            for cell in built {
                                cell.free_now(&self.arena);
                            }
                            discard_tower(&self.arena, idxs[level]);
                            return;
                        }
                    }
                }
                if self.cas_head(oldh, newh) {
                    debug_log!("grew index to level {level}");
                    self.register_heads(&built);
                    // Tower cells above old_level went live as the new
                    // heads' right pointers.
                    break (oldh, old_level, true);
                }
                // Lost the head race. These cells were never published.
                for cell in built {
                    cell.free_now(&self.arena);
                }
            };
            self.add_index(idxs[k], oldh, k, upper_linked);
        }
    }

    /// Splice tower cells from level `index_level` down to 1, walking
    /// right at each level the way `find_predecessor` does.
    ///
    /// `h` must be the head snapshot the caller sized the tower against.
    /// `upper_linked` says whether tower cells above `index_level` are
    /// already published as head-cell right pointers; it decides how the
    /// unspliced remainder is released when the node turns out deleted.
    fn add_index(&self, idx: IndexRef, h: IndexRef, index_level: usize, upper_linked: bool) {
        // Counts down across restarts; levels already spliced stay.
        let mut insertion_level = index_level;
        let key = idx.node().key();
        loop {
            let mut j = h.level();
            let mut q = h;
            let mut r = q.right();
            let mut t = idx;
            loop {
                if !r.is_null() {
                    let n = r.node();
                    // Compare before the deletion check; no recheck needed.
                    let c = n.cmp_key(&key);
                    if n.value() == 0 {
                        if !q.unlink(r, &self.reclaimer) {
                            break; // restart
                        }
                        r = q.right();
                        continue;
                    }
                    if c == Ordering::Greater {
                        q = r;
                        r = r.right();
                        continue;
                    }
                }

                if j == insertion_level {
                    // Don't splice a cell over an already deleted node.
                    if t.indexes_deleted_node() {
                        self.find_node(&key); // clears the dead node
                        if insertion_level == index_level && !upper_linked {
                            // No cell of the tower is reachable yet.
                            discard_tower(&self.arena, t);
                        } else {
                            // Spliced cells above t reach its chain through
                            // their down words, so it stays readable for
                            // the delay.
                            self.reclaimer.retire_tower(t.addr());
                        }
                        return;
                    }
                    if !q.link(r, t) {
                        break; // restart
                    }
                    insertion_level -= 1;
                    if insertion_level == 0 {
                        // Final deletion check before returning.
                        if t.indexes_deleted_node() {
                            self.find_node(&key);
                        }
                        return;
                    }
                }

                j -= 1;
                if j >= insertion_level && j < index_level {
                    t = t.down();
                }
                q = q.down();
                r = q.right();
            }
        }
    }

    fn register_heads(&self, cells: &[IndexRef]) {
        let mut registry = self.head_registry.lock();
        registry.extend(cells.iter().map(|c| c.addr()));
    }
}

/// Free a never-published partial tower, top cell first.
fn discard_tower(arena: &Arena, top: IndexRef) {
    let mut cell = top;
    while !cell.is_null() {
        let below = cell.down();
        cell.free_now(arena);
        cell = below;
    }
}

//! On-disk B+Tree mapping signed 32-bit keys to unsigned 32-bit values,
//! one node per page, with leaf chaining for in-order scans.
//!
//! Every operation is iterative: descent walks down `children` pointers
//! bounded by [`MAX_HEIGHT`], and structural propagation after a split or
//! merge walks back up via each node's `parent_page` field rather than
//! recursing over the call stack.

mod node;


pub use node::{Node, MAX_HEIGHT, MIN_KEYS, ORDER};

use std::collections::VecDeque;

use buffer::{BufferCache, DirtyTracker, NoTxn};
use common::{DbError, DbResult};
use storage::{PageType, PAGE_HEADER_LEN};

fn read_node(cache: &BufferCache, idx: usize) -> DbResult<Node> {
    Node::decode(&cache.frame_bytes(idx)[PAGE_HEADER_LEN..])
}

fn write_node(cache: &mut BufferCache, idx: usize, node: &Node) -> DbResult<()> {
    node.encode(&mut cache.frame_bytes_mut(idx)[PAGE_HEADER_LEN..])
}

/// Load `page_no`, run `f` over its decoded node, persist any change `f`
/// makes by re-encoding, and report the mutation to `txn`.
fn with_node<F, R>(
    cache: &mut BufferCache,
    txn: &mut dyn DirtyTracker,
    page_no: u32,
    f: F,
) -> DbResult<R>
where
    F: FnOnce(&mut Node) -> R,
{
    let idx = cache.get_page(page_no)?;
    let mut node = read_node(cache, idx)?;
    let result = f(&mut node);
    write_node(cache, idx, &node)?;
    txn.note_dirty(cache, page_no)?;
    Ok(result)
}

/// A cursor over the leaf chain, produced by [`Tree::cursor_first`] and
/// advanced by [`Tree::cursor_next`].
#[derive(Clone, Copy, Debug)]
pub struct Cursor {
    leaf_page: u32,
    index: usize,
    valid: bool,
}

impl Cursor {
    pub fn valid(&self) -> bool {
        self.valid
    }
}

/// `(num_entries, height, num_nodes)` as reported by [`Tree::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeStats {
    pub num_entries: u64,
    pub height: u32,
    pub num_nodes: u64,
}

/// A handle onto a B+Tree rooted at `root_page`. The handle borrows the
/// pager and cache for every call; it owns no pages itself.
pub struct Tree {
    root_page: u32,
    num_entries: u64,
}

impl Tree {
    /// Allocate a single empty leaf page and return a handle to it.
    pub fn create(cache: &mut BufferCache) -> DbResult<Self> {
        let page_no = cache.pager_mut().allocate_page(PageType::Btree)?;
        let idx = cache.get_page(page_no)?;
        write_node(cache, idx, &Node::new_leaf(0))?;
        cache.mark_dirty(idx, 0);
        Ok(Self {
            root_page: page_no,
            num_entries: 0,
        })
    }

    /// Open a handle onto an existing tree rooted at `root_page`.
    pub fn open(cache: &mut BufferCache, root_page: u32) -> DbResult<Self> {
        let num_entries = Self::count_entries(cache, root_page)?;
        Ok(Self {
            root_page,
            num_entries,
        })
    }

    pub fn root_page(&self) -> u32 {
        self.root_page
    }

    /// Release the handle. The cache, not the tree, owns the pages.
    pub fn close(self) {}

    fn leaf_for_key(&self, cache: &mut BufferCache, key: i32) -> DbResult<u32> {
        let mut page_no = self.root_page;
        for _ in 0..MAX_HEIGHT {
            let idx = cache.get_page(page_no)?;
            let node = read_node(cache, idx)?;
            if node.is_leaf {
                return Ok(page_no);
            }
            page_no = node.child_for_key(key);
        }
        Err(DbError::Corruption("btree descent exceeded MAX_HEIGHT".into()))
    }

    pub fn search(&self, cache: &mut BufferCache, key: i32) -> DbResult<u32> {
        let leaf_page = self.leaf_for_key(cache, key)?;
        let idx = cache.get_page(leaf_page)?;
        let node = read_node(cache, idx)?;
        let slot = node.find_slot(key);
        if slot < node.num_keys() && node.keys[slot] == key {
            Ok(node.values[slot])
        } else {
            Err(DbError::NotFound(format!("key {key} not found")))
        }
    }

    /// Upsert: overwrite the value if `key` already exists, otherwise
    /// insert it and rebalance.
    pub fn insert(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        key: i32,
        value: u32,
    ) -> DbResult<()> {
        let leaf_page = self.leaf_for_key(cache, key)?;
        let idx = cache.get_page(leaf_page)?;
        let mut leaf = read_node(cache, idx)?;
        let slot = leaf.find_slot(key);

        if slot < leaf.num_keys() && leaf.keys[slot] == key {
            leaf.values[slot] = value;
            write_node(cache, idx, &leaf)?;
            txn.note_dirty(cache, leaf_page)?;
            return Ok(());
        }

        leaf.keys.insert(slot, key);
        leaf.values.insert(slot, value);
        self.num_entries += 1;

        if leaf.num_keys() <= ORDER {
            write_node(cache, idx, &leaf)?;
            txn.note_dirty(cache, leaf_page)?;
            return Ok(());
        }

        // Split: lower half stays at `leaf_page`, upper half moves to a
        // freshly allocated leaf. `child_for_key` routes an exact key match
        // to the right child, so the separator copied up must be the
        // smallest key moved out, not the largest key left behind.
        let mid = ORDER / 2;
        let right_page = cache.pager_mut().allocate_page(PageType::Btree)?;
        let mut right = Node::new_leaf(leaf.parent_page);
        right.keys = leaf.keys.split_off(mid);
        right.values = leaf.values.split_off(mid);
        right.next_leaf = leaf.next_leaf;
        leaf.next_leaf = right_page;
        let split_key = right.keys[0];

        write_node(cache, idx, &leaf)?;
        txn.note_dirty(cache, leaf_page)?;
        let right_idx = cache.get_page(right_page)?;
        write_node(cache, right_idx, &right)?;
        txn.note_dirty(cache, right_page)?;

        self.insert_into_parent(cache, txn, leaf_page, split_key, right_page)
    }

    /// Propagate a split upward: insert `(key, right_page)` as a new
    /// separator into `left_page`'s parent, splitting internal nodes as
    /// needed, bounded by tree height.
    fn insert_into_parent(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        mut left_page: u32,
        mut key: i32,
        mut right_page: u32,
    ) -> DbResult<()> {
        for _ in 0..MAX_HEIGHT {
            let left_idx = cache.get_page(left_page)?;
            let left_parent = read_node(cache, left_idx)?.parent_page;

            if left_parent == 0 {
                let new_root_page = cache.pager_mut().allocate_page(PageType::Btree)?;
                let mut new_root = Node::new_internal(0);
                new_root.keys = vec![key];
                new_root.children = vec![left_page, right_page];
                let new_root_idx = cache.get_page(new_root_page)?;
                write_node(cache, new_root_idx, &new_root)?;
                txn.note_dirty(cache, new_root_page)?;

                with_node(cache, txn, left_page, |n| n.parent_page = new_root_page)?;
                with_node(cache, txn, right_page, |n| n.parent_page = new_root_page)?;

                self.root_page = new_root_page;
                return Ok(());
            }

            let parent_idx = cache.get_page(left_parent)?;
            let mut parent = read_node(cache, parent_idx)?;
            let slot = parent
                .children
                .iter()
                .position(|&c| c == left_page)
                .ok_or_else(|| DbError::Corruption("parent missing expected child".into()))?;
            parent.keys.insert(slot, key);
            parent.children.insert(slot + 1, right_page);

            with_node(cache, txn, right_page, |n| n.parent_page = left_parent)?;

            if parent.num_keys() <= ORDER {
                write_node(cache, parent_idx, &parent)?;
                txn.note_dirty(cache, left_parent)?;
                return Ok(());
            }

            // Internal split: the middle key moves up (it is not copied
            // into either side), the right half's children are re-parented
            // to the freshly allocated right internal node.
            let mid = ORDER / 2;
            let median = parent.keys[mid];
            let new_right_page = cache.pager_mut().allocate_page(PageType::Btree)?;
            let mut new_right = Node::new_internal(parent.parent_page);
            new_right.keys = parent.keys.split_off(mid + 1);
            new_right.children = parent.children.split_off(mid + 1);
            parent.keys.pop(); // drop the median, already captured above

            write_node(cache, parent_idx, &parent)?;
            txn.note_dirty(cache, left_parent)?;

            let new_right_children = new_right.children.clone();
            let new_right_idx = cache.get_page(new_right_page)?;
            write_node(cache, new_right_idx, &new_right)?;
            txn.note_dirty(cache, new_right_page)?;

            for child in new_right_children {
                with_node(cache, txn, child, |n| n.parent_page = new_right_page)?;
            }

            left_page = left_parent;
            key = median;
            right_page = new_right_page;
        }
        Err(DbError::Corruption("btree insert exceeded MAX_HEIGHT".into()))
    }

    pub fn delete(&mut self, cache: &mut BufferCache, txn: &mut dyn DirtyTracker, key: i32) -> DbResult<()> {
        let leaf_page = self.leaf_for_key(cache, key)?;
        let idx = cache.get_page(leaf_page)?;
        let mut leaf = read_node(cache, idx)?;
        let slot = leaf.find_slot(key);
        if slot >= leaf.num_keys() || leaf.keys[slot] != key {
            return Err(DbError::NotFound(format!("key {key} not found")));
        }
        leaf.keys.remove(slot);
        leaf.values.remove(slot);
        self.num_entries -= 1;
        write_node(cache, idx, &leaf)?;
        txn.note_dirty(cache, leaf_page)?;

        if leaf_page != self.root_page && leaf.is_underflow() {
            self.rebalance_after_delete(cache, txn, leaf_page)?;
        }
        Ok(())
    }

    /// Restore the `>= MIN_KEYS` invariant after a deletion underflowed a
    /// non-root node, by borrowing from a sibling or merging with one,
    /// walking up the parent chain as merges cascade.
    fn rebalance_after_delete(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        mut page: u32,
    ) -> DbResult<()> {
        for _ in 0..MAX_HEIGHT {
            if page == self.root_page {
                let idx = cache.get_page(page)?;
                let root = read_node(cache, idx)?;
                if !root.is_leaf && root.num_keys() == 0 {
                    let only_child = root.children[0];
                    cache.pager_mut().free_page(page)?;
                    with_node(cache, txn, only_child, |n| n.parent_page = 0)?;
                    self.root_page = only_child;
                }
                return Ok(());
            }

            let idx = cache.get_page(page)?;
            let node = read_node(cache, idx)?;
            if !node.is_underflow() {
                return Ok(());
            }
            let parent_page = node.parent_page;

            let parent_idx = cache.get_page(parent_page)?;
            let mut parent = read_node(cache, parent_idx)?;
            let pos = parent
                .children
                .iter()
                .position(|&c| c == page)
                .ok_or_else(|| DbError::Corruption("parent missing expected child".into()))?;

            let left_sib = pos.checked_sub(1).map(|i| parent.children[i]);
            let right_sib = parent.children.get(pos + 1).copied();

            if let Some(left_page) = left_sib {
                let left_idx = cache.get_page(left_page)?;
                let left = read_node(cache, left_idx)?;
                if left.num_keys() > MIN_KEYS {
                    self.borrow_from_left(cache, txn, &mut parent, parent_page, parent_idx, pos, left_page, page)?;
                    return Ok(());
                }
            }
            if let Some(right_page) = right_sib {
                let right_idx = cache.get_page(right_page)?;
                let right = read_node(cache, right_idx)?;
                if right.num_keys() > MIN_KEYS {
                    self.borrow_from_right(cache, txn, &mut parent, parent_page, parent_idx, pos, page, right_page)?;
                    return Ok(());
                }
            }

            // No sibling has a surplus: merge. Prefer merging with the
            // left sibling so the right page is always the one freed.
            if let Some(left_page) = left_sib {
                self.merge_nodes(cache, txn, &mut parent, parent_page, parent_idx, pos - 1, left_page, page)?;
            } else if let Some(right_page) = right_sib {
                self.merge_nodes(cache, txn, &mut parent, parent_page, parent_idx, pos, page, right_page)?;
            } else {
                return Err(DbError::Corruption("non-root node has no sibling".into()));
            }

            page = parent_page;
        }
        Err(DbError::Corruption("btree delete exceeded MAX_HEIGHT".into()))
    }

    #[allow(clippy::too_many_arguments)]
    fn borrow_from_left(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        parent: &mut Node,
        parent_page: u32,
        parent_idx: usize,
        pos: usize,
        left_page: u32,
        page: u32,
    ) -> DbResult<()> {
        let left_idx = cache.get_page(left_page)?;
        let mut left = read_node(cache, left_idx)?;
        let idx = cache.get_page(page)?;
        let mut node = read_node(cache, idx)?;

        if node.is_leaf {
            let key = left.keys.pop().unwrap();
            let value = left.values.pop().unwrap();
            node.keys.insert(0, key);
            node.values.insert(0, value);
            parent.keys[pos - 1] = key;
        } else {
            let moved_key = left.keys.pop().unwrap();
            let moved_child = left.children.pop().unwrap();
            node.keys.insert(0, parent.keys[pos - 1]);
            node.children.insert(0, moved_child);
            parent.keys[pos - 1] = moved_key;
            with_node(cache, txn, moved_child, |n| n.parent_page = page)?;
        }

        write_node(cache, left_idx, &left)?;
        txn.note_dirty(cache, left_page)?;
        write_node(cache, idx, &node)?;
        txn.note_dirty(cache, page)?;
        write_node(cache, parent_idx, parent)?;
        txn.note_dirty(cache, parent_page)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn borrow_from_right(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        parent: &mut Node,
        parent_page: u32,
        parent_idx: usize,
        pos: usize,
        page: u32,
        right_page: u32,
    ) -> DbResult<()> {
        let right_idx = cache.get_page(right_page)?;
        let mut right = read_node(cache, right_idx)?;
        let idx = cache.get_page(page)?;
        let mut node = read_node(cache, idx)?;

        if node.is_leaf {
            let key = right.keys.remove(0);
            let value = right.values.remove(0);
            node.keys.push(key);
            node.values.push(value);
            parent.keys[pos] = right.keys[0];
        } else {
            let moved_key = right.keys.remove(0);
            let moved_child = right.children.remove(0);
            node.keys.push(parent.keys[pos]);
            node.children.push(moved_child);
            parent.keys[pos] = moved_key;
            with_node(cache, txn, moved_child, |n| n.parent_page = page)?;
        }

        write_node(cache, right_idx, &right)?;
        txn.note_dirty(cache, right_page)?;
        write_node(cache, idx, &node)?;
        txn.note_dirty(cache, page)?;
        write_node(cache, parent_idx, parent)?;
        txn.note_dirty(cache, parent_page)?;
        Ok(())
    }

    /// Fold `right_page` into `left_page` (always right-into-left), remove
    /// the separator at `sep_pos` from the parent, and free the emptied
    /// page. If the parent's children list has a surplus `sep_pos` is the
    /// index of the key between `left_page` and `right_page`.
    #[allow(clippy::too_many_arguments)]
    fn merge_nodes(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        parent: &mut Node,
        parent_page: u32,
        parent_idx: usize,
        sep_pos: usize,
        left_page: u32,
        right_page: u32,
    ) -> DbResult<()> {
        let left_idx = cache.get_page(left_page)?;
        let mut left = read_node(cache, left_idx)?;
        let right_idx = cache.get_page(right_page)?;
        let right = read_node(cache, right_idx)?;

        if left.is_leaf {
            left.keys.extend(right.keys);
            left.values.extend(right.values);
            left.next_leaf = right.next_leaf;
        } else {
            left.keys.push(parent.keys[sep_pos]);
            left.keys.extend(right.keys);
            left.children.extend(right.children.clone());
            for child in right.children {
                with_node(cache, txn, child, |n| n.parent_page = left_page)?;
            }
        }
        write_node(cache, left_idx, &left)?;
        txn.note_dirty(cache, left_page)?;

        cache.pager_mut().free_page(right_page)?;

        parent.keys.remove(sep_pos);
        parent.children.remove(sep_pos + 1);
        write_node(cache, parent_idx, parent)?;
        txn.note_dirty(cache, parent_page)?;
        Ok(())
    }

    pub fn cursor_first(&self, cache: &mut BufferCache) -> DbResult<Cursor> {
        let mut page_no = self.root_page;
        for _ in 0..MAX_HEIGHT {
            let idx = cache.get_page(page_no)?;
            let node = read_node(cache, idx)?;
            if node.is_leaf {
                return Ok(Cursor {
                    leaf_page: page_no,
                    index: 0,
                    valid: node.num_keys() > 0,
                });
            }
            page_no = node.children[0];
        }
        Err(DbError::Corruption("btree descent exceeded MAX_HEIGHT".into()))
    }

    pub fn cursor_next(&self, cache: &mut BufferCache, cursor: &mut Cursor) -> DbResult<()> {
        if !cursor.valid {
            return Ok(());
        }
        let idx = cache.get_page(cursor.leaf_page)?;
        let node = read_node(cache, idx)?;
        if cursor.index + 1 < node.num_keys() {
            cursor.index += 1;
            return Ok(());
        }
        if node.next_leaf == 0 {
            cursor.valid = false;
            return Ok(());
        }
        cursor.leaf_page = node.next_leaf;
        cursor.index = 0;
        let idx = cache.get_page(cursor.leaf_page)?;
        let next = read_node(cache, idx)?;
        cursor.valid = next.num_keys() > 0;
        Ok(())
    }

    pub fn cursor_valid(&self, cursor: &Cursor) -> bool {
        cursor.valid
    }

    pub fn cursor_get(&self, cache: &mut BufferCache, cursor: &Cursor) -> DbResult<(i32, u32)> {
        if !cursor.valid {
            return Err(DbError::Done);
        }
        let idx = cache.get_page(cursor.leaf_page)?;
        let node = read_node(cache, idx)?;
        Ok((node.keys[cursor.index], node.values[cursor.index]))
    }

    pub fn stats(&self, cache: &mut BufferCache) -> DbResult<TreeStats> {
        let height = self.height(cache)?;
        let internal_pages = self.internal_pages(cache)?;
        let leaf_count = self.leaf_count(cache)?;
        Ok(TreeStats {
            num_entries: self.num_entries,
            height,
            num_nodes: internal_pages.len() as u64 + leaf_count,
        })
    }

    fn height(&self, cache: &mut BufferCache) -> DbResult<u32> {
        let mut page_no = self.root_page;
        let mut height = 0;
        for _ in 0..=MAX_HEIGHT {
            height += 1;
            let idx = cache.get_page(page_no)?;
            let node = read_node(cache, idx)?;
            if node.is_leaf {
                return Ok(height);
            }
            page_no = node.children[0];
        }
        Err(DbError::Corruption("btree height exceeded MAX_HEIGHT".into()))
    }

    fn internal_pages(&self, cache: &mut BufferCache) -> DbResult<Vec<u32>> {
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(self.root_page);
        while let Some(page_no) = queue.pop_front() {
            let idx = cache.get_page(page_no)?;
            let node = read_node(cache, idx)?;
            if node.is_leaf {
                continue;
            }
            result.push(page_no);
            queue.extend(node.children);
        }
        Ok(result)
    }

    fn leaf_count(&self, cache: &mut BufferCache) -> DbResult<u64> {
        let mut count = 0;
        let mut page_no = self.cursor_first(cache)?.leaf_page;
        loop {
            count += 1;
            let idx = cache.get_page(page_no)?;
            let node = read_node(cache, idx)?;
            if node.next_leaf == 0 {
                break;
            }
            page_no = node.next_leaf;
        }
        Ok(count)
    }

    /// Free every page belonging to this tree, including the root. Used by
    /// table drop so a dropped table's data pages aren't orphaned.
    pub fn drain_all_pages(self, cache: &mut BufferCache) -> DbResult<()> {
        let mut queue = VecDeque::new();
        queue.push_back(self.root_page);
        while let Some(page_no) = queue.pop_front() {
            let idx = cache.get_page(page_no)?;
            let node = read_node(cache, idx)?;
            if !node.is_leaf {
                queue.extend(node.children);
            }
            cache.pager_mut().free_page(page_no)?;
        }
        Ok(())
    }

    fn count_entries(cache: &mut BufferCache, root_page: u32) -> DbResult<u64> {
        let mut page_no = root_page;
        for _ in 0..MAX_HEIGHT {
            let idx = cache.get_page(page_no)?;
            let node = read_node(cache, idx)?;
            if node.is_leaf {
                break;
            }
            page_no = node.children[0];
        }
        let mut total = 0u64;
        loop {
            let idx = cache.get_page(page_no)?;
            let node = read_node(cache, idx)?;
            total += node.num_keys() as u64;
            if node.next_leaf == 0 {
                break;
            }
            page_no = node.next_leaf;
        }
        Ok(total)
    }
}

/// Run a mutation with no transaction attached: the page is dirtied
/// untagged, directly visible to the next [`BufferCache::flush`].
pub fn no_txn() -> NoTxn {
    NoTxn
}

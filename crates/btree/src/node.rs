use common::le::{read_i32, read_u32, write_i32, write_u32};
use common::{DbError, DbResult};
use storage::{PAGE_HEADER_LEN, PAGE_SIZE};

pub const ORDER: usize = 64;
pub const MIN_KEYS: usize = ORDER / 2;
pub const MAX_HEIGHT: usize = 16;

const NODE_TYPE_OFFSET: usize = 0;
const NUM_KEYS_OFFSET: usize = 4;
const PARENT_OFFSET: usize = 8;
const NEXT_LEAF_OFFSET: usize = 12;
const KEYS_OFFSET: usize = 16;
const CHILDREN_OFFSET: usize = KEYS_OFFSET + ORDER * 4;
const VALUES_OFFSET: usize = CHILDREN_OFFSET + (ORDER + 1) * 4;

pub const NODE_TYPE_LEAF: u8 = 0;
pub const NODE_TYPE_INTERNAL: u8 = 1;

/// One B+Tree node, one page, laid out as:
/// `node_type(1) + reserved(3) + num_keys(4) + parent_page(4) + next_leaf(4)
/// + keys[64](4 each) + children[65](4 each) + values[64](4 each)`,
/// packed into the page payload that follows the generic 12-byte page
/// header.
///
/// Internal nodes use `children[i]` for keys `< keys[i]` (`i < num_keys`)
/// and `children[num_keys]` for everything `>= keys[num_keys - 1]`; leaves
/// ignore `children` entirely and thread `next_leaf` for range scans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub is_leaf: bool,
    pub parent_page: u32,
    pub next_leaf: u32,
    pub keys: Vec<i32>,
    pub children: Vec<u32>,
    pub values: Vec<u32>,
}

impl Node {
    pub fn new_leaf(parent_page: u32) -> Self {
        Self {
            is_leaf: true,
            parent_page,
            next_leaf: 0,
            keys: Vec::new(),
            children: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn new_internal(parent_page: u32) -> Self {
        Self {
            is_leaf: false,
            parent_page,
            next_leaf: 0,
            keys: Vec::new(),
            children: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= ORDER
    }

    pub fn is_underflow(&self) -> bool {
        self.keys.len() < MIN_KEYS
    }

    /// Position of the first key `>= key` (the standard B+Tree search cut).
    pub fn find_slot(&self, key: i32) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// Which child page to descend into for `key`, for internal nodes.
    ///
    /// `keys[i]` separates `children[i]` from `children[i + 1]` and equals
    /// the smallest key in the subtree rooted at `children[i + 1]`; an
    /// exact match on `keys[i]` therefore routes into `children[i + 1]`,
    /// the right side.
    pub fn child_for_key(&self, key: i32) -> u32 {
        debug_assert!(!self.is_leaf);
        let slot = self.keys.partition_point(|&k| k <= key);
        self.children[slot]
    }

    pub fn encode(&self, page_payload: &mut [u8]) -> DbResult<()> {
        if self.keys.len() > ORDER {
            return Err(DbError::Overflow("btree node exceeds ORDER".into()));
        }
        page_payload[NODE_TYPE_OFFSET] = if self.is_leaf {
            NODE_TYPE_LEAF
        } else {
            NODE_TYPE_INTERNAL
        };
        page_payload[1] = 0;
        page_payload[2] = 0;
        page_payload[3] = 0;
        write_u32(&mut page_payload[NUM_KEYS_OFFSET..], self.keys.len() as u32);
        write_u32(&mut page_payload[PARENT_OFFSET..], self.parent_page);
        write_u32(&mut page_payload[NEXT_LEAF_OFFSET..], self.next_leaf);

        for (i, &k) in self.keys.iter().enumerate() {
            write_i32(&mut page_payload[KEYS_OFFSET + i * 4..], k);
        }
        for (i, &c) in self.children.iter().enumerate() {
            write_u32(&mut page_payload[CHILDREN_OFFSET + i * 4..], c);
        }
        for (i, &v) in self.values.iter().enumerate() {
            write_u32(&mut page_payload[VALUES_OFFSET + i * 4..], v);
        }
        Ok(())
    }

    pub fn decode(page_payload: &[u8]) -> DbResult<Self> {
        let node_type = page_payload[NODE_TYPE_OFFSET];
        let is_leaf = match node_type {
            NODE_TYPE_LEAF => true,
            NODE_TYPE_INTERNAL => false,
            other => return Err(DbError::Corruption(format!("bad btree node type {other}"))),
        };
        let num_keys = read_u32(&page_payload[NUM_KEYS_OFFSET..]) as usize;
        if num_keys > ORDER {
            return Err(DbError::Corruption("btree node num_keys exceeds ORDER".into()));
        }
        let parent_page = read_u32(&page_payload[PARENT_OFFSET..]);
        let next_leaf = read_u32(&page_payload[NEXT_LEAF_OFFSET..]);

        let keys = (0..num_keys)
            .map(|i| read_i32(&page_payload[KEYS_OFFSET + i * 4..]))
            .collect();
        let values = if is_leaf {
            (0..num_keys)
                .map(|i| read_u32(&page_payload[VALUES_OFFSET + i * 4..]))
                .collect()
        } else {
            Vec::new()
        };
        let children = if is_leaf {
            Vec::new()
        } else {
            (0..=num_keys)
                .map(|i| read_u32(&page_payload[CHILDREN_OFFSET + i * 4..]))
                .collect()
        };

        Ok(Self {
            is_leaf,
            parent_page,
            next_leaf,
            keys,
            children,
            values,
        })
    }
}

pub const NODE_PAYLOAD_LEN: usize = PAGE_SIZE - PAGE_HEADER_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips() {
        let mut node = Node::new_leaf(0);
        node.keys = vec![1, 2, 3];
        node.values = vec![10, 20, 30];
        node.next_leaf = 99;

        let mut buf = [0u8; NODE_PAYLOAD_LEN];
        node.encode(&mut buf).unwrap();
        let decoded = Node::decode(&buf).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn internal_round_trips() {
        let mut node = Node::new_internal(5);
        node.keys = vec![10, 20];
        node.children = vec![1, 2, 3];

        let mut buf = [0u8; NODE_PAYLOAD_LEN];
        node.encode(&mut buf).unwrap();
        let decoded = Node::decode(&buf).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn find_slot_matches_binary_search_semantics() {
        let mut node = Node::new_leaf(0);
        node.keys = vec![10, 20, 30];
        assert_eq!(node.find_slot(5), 0);
        assert_eq!(node.find_slot(10), 0);
        assert_eq!(node.find_slot(15), 1);
        assert_eq!(node.find_slot(30), 2);
        assert_eq!(node.find_slot(31), 3);
    }

    #[test]
    fn child_for_key_respects_separator_convention() {
        let mut node = Node::new_internal(0);
        node.keys = vec![10, 20];
        node.children = vec![100, 200, 300];
        assert_eq!(node.child_for_key(5), 100);
        assert_eq!(node.child_for_key(9), 100);
        assert_eq!(node.child_for_key(10), 200);
        assert_eq!(node.child_for_key(11), 200);
        assert_eq!(node.child_for_key(20), 300);
        assert_eq!(node.child_for_key(21), 300);
    }
}

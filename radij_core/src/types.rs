//! Data structures for the radix tree

use crate::constants::*;
use crate::helpers::{pack, unpack};

/// Arena index. Always 32 bits, like the shared-memory offsets it replaces.
pub type Slot = u32;

/// Index of a mask descriptor in the descriptor pool.
pub type MaskId = u32;

/// Stable handle to a route entry: (slot, generation) packed in a u64.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

impl EntryId {
    #[inline]
    pub fn new(slot: Slot, generation: u32) -> Self {
        EntryId(pack(slot, generation))
    }

    #[inline]
    pub fn slot(self) -> Slot {
        unpack(self.0).0
    }

    #[inline]
    pub fn generation(self) -> u32 {
        unpack(self.0).1
    }
}

/// Node in the radix tree. Internal nodes have `b >= 0`, leaves `b < 0`.
#[derive(Debug)]
pub struct Node<T> {
    pub b: i16,        // bit to test, or -1 - mask index for leaves
    pub off: usize,    // byte offset of `b`
    pub bmask: u8,     // bit within that byte
    pub flags: u8,     // RJF_ROOT | RJF_ACTIVE
    pub generation: u32,
    pub left: Slot,
    pub right: Slot,
    pub parent: Slot,  // non-owning back reference
    pub key: Box<[u8]>,
    pub mask: Option<Slot>, // leaf of the mask table
    pub dupedkey: Option<Slot>,
    pub mklist: Option<MaskId>,
    pub value: Option<T>,
}

impl<T> Node<T> {
    pub(crate) fn vacant() -> Self {
        Node {
            b: -1,
            off: 0,
            bmask: 0,
            flags: 0,
            generation: 0,
            left: NIL_SLOT,
            right: NIL_SLOT,
            parent: NIL_SLOT,
            key: Box::default(),
            mask: None,
            dupedkey: None,
            mklist: None,
            value: None,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.b < 0
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.flags & RJF_ROOT != 0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.flags & RJF_ACTIVE != 0
    }
}

/// Refcounted annotation attached to an internal node (or shared with a leaf).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskDesc {
    pub b: i16,     // same encoding as a leaf's `b`
    pub mask: Slot, // leaf of the mask table
    pub refs: i32,  // extra references beyond the first
    pub next: Option<MaskId>,
}

/// Result of a successful `add_route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added(EntryId),
    /// The key is in the tree but its mask descriptor could not be allocated;
    /// the route is only reachable through its own leaf chain.
    MaskNotEntered(EntryId),
}

impl AddOutcome {
    pub fn id(self) -> EntryId {
        match self {
            AddOutcome::Added(id) | AddOutcome::MaskNotEntered(id) => id,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, AddOutcome::Added(_))
    }
}

/// Entry found by a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'a, T> {
    pub id: EntryId,
    pub key: &'a [u8],
    pub mask: Option<&'a [u8]>,
    pub value: &'a T,
}

/// Entry handed back by `delete`; the caller owns it from here on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed<T> {
    pub key: Box<[u8]>,
    pub mask: Option<Box<[u8]>>,
    pub value: T,
    /// Mask descriptors that could not be found where they were expected.
    pub orphaned_masks: usize,
}

/// Construction parameters of a `KeyedTrie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieConfig {
    /// Size of the sentinel keys; no key or mask may be longer.
    pub max_keylen: usize,
    /// Bit offset of the first significant key bit (8 skips the length byte).
    pub key_offset_bits: u16,
    /// Upper bound on live tree nodes (leaves + internal), `None` = unbounded.
    pub node_capacity: Option<usize>,
    /// Upper bound on distinct netmasks held by the mask table.
    pub mask_table_capacity: Option<usize>,
    /// Upper bound on live mask descriptors.
    pub mask_descriptor_capacity: Option<usize>,
}

impl Default for TrieConfig {
    fn default() -> Self {
        TrieConfig {
            max_keylen: DEFAULT_MAX_KEYLEN,
            key_offset_bits: DEFAULT_KEY_OFFSET_BITS,
            node_capacity: None,
            mask_table_capacity: None,
            mask_descriptor_capacity: None,
        }
    }
}

impl TrieConfig {
    pub fn with_max_keylen(mut self, max_keylen: usize) -> Self {
        self.max_keylen = max_keylen;
        self
    }

    pub fn with_key_offset_bits(mut self, bits: u16) -> Self {
        self.key_offset_bits = bits;
        self
    }

    pub fn with_node_capacity(mut self, capacity: usize) -> Self {
        self.node_capacity = Some(capacity);
        self
    }

    pub fn with_mask_table_capacity(mut self, capacity: usize) -> Self {
        self.mask_table_capacity = Some(capacity);
        self
    }

    pub fn with_mask_descriptor_capacity(mut self, capacity: usize) -> Self {
        self.mask_descriptor_capacity = Some(capacity);
        self
    }
}

//! Netmask bookkeeping: the mask table (a radix tree of deduplicated
//! netmasks, so every distinct mask has exactly one canonical slot) and the
//! pool of refcounted mask descriptors hung off internal nodes.

use crate::constants::*;
use crate::errors::Error;
use crate::helpers::*;
use crate::tree::{Inserted, RadixTree};
use crate::types::{MaskDesc, MaskId, Slot};
use crossbeam_queue::SegQueue;
use log::{debug, warn};
use metrics::gauge;

pub struct MaskTable {
    tree: RadixTree<()>,
    odd_masks: bool,
}

impl MaskTable {
    pub fn new(zeroes: &[u8], ones: &[u8], capacity: Option<usize>) -> Self {
        MaskTable {
            // every mask costs a leaf and an internal node
            tree: RadixTree::new(zeroes, ones, MASK_HEAD_OFFSET_BITS, capacity.map(|c| c * 2)),
            odd_masks: false,
        }
    }

    /// Canonical slot of `mask`, if it has been entered before.
    pub fn find(&self, mask: &[u8]) -> Option<Slot> {
        let x = self.tree.search_masked(mask, mask, self.tree.top());
        let node = self.tree.node(x);
        if !node.is_root() && same_bytes(mask, &node.key, 0, key_len(mask)) {
            Some(x)
        } else {
            None
        }
    }

    /// Enter `mask` and compute its index: the first zero bit at or after
    /// byte `skip`, stored as `-1 - index` in the leaf's `b`.
    pub fn add_mask(&mut self, mask: &[u8], search: bool, skip: usize) -> Result<Slot, Error> {
        if search {
            if let Some(x) = self.find(mask) {
                return Ok(x);
            }
        }
        let x = match self.tree.insert(mask, Some(()))? {
            Inserted::New(x) => x,
            Inserted::Duplicate(x) if !self.tree.node(x).is_root() => return Ok(x),
            Inserted::Duplicate(_) => {
                return Err(Error::InvariantViolation(
                    "netmask collides with the all-ones sentinel".into(),
                ))
            }
        };
        if is_odd_mask(mask, skip) {
            self.odd_masks = true;
        }
        let b = mask_index(mask, skip);
        self.tree.node_mut(x).b = (-1 - b) as i16;
        debug!("[MASK] entered mask={} index={} slot={}", hex(mask), b, x);
        Ok(x)
    }

    #[inline]
    pub fn key(&self, slot: Slot) -> &[u8] {
        &self.tree.node(slot).key
    }

    /// Encoded index (`-1 - bit`) of a canonical mask.
    #[inline]
    pub fn encoded_index(&self, slot: Slot) -> i16 {
        self.tree.node(slot).b
    }

    pub fn len(&self) -> usize {
        self.tree.live() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Some entered mask has a byte that is neither 0x00 nor 0xff.
    pub fn has_odd_masks(&self) -> bool {
        self.odd_masks
    }
}

pub struct MaskPool {
    slots: Vec<MaskDesc>,
    freelist: SegQueue<MaskId>,
    in_use: usize,
    capacity: Option<usize>,
}

impl MaskPool {
    pub fn new(capacity: Option<usize>) -> Self {
        MaskPool {
            slots: Vec::new(),
            freelist: SegQueue::new(),
            in_use: 0,
            capacity,
        }
    }

    /// Hand out a zeroed descriptor initialised to `desc`, `None` when full.
    pub fn get(&mut self, desc: MaskDesc) -> Option<MaskId> {
        if let Some(cap) = self.capacity {
            if self.in_use >= cap {
                warn!("[MASK] descriptor pool exhausted ({} in use)", self.in_use);
                return None;
            }
        }
        let id = match self.freelist.pop() {
            Some(id) => {
                self.slots[id as usize] = desc;
                id
            }
            None => {
                self.slots.push(desc);
                (self.slots.len() - 1) as MaskId
            }
        };
        self.in_use += 1;
        gauge!(METRIC_DESCRIPTORS_IN_USE).set(self.in_use as f64);
        Some(id)
    }

    pub fn put(&mut self, id: MaskId) {
        self.slots[id as usize].next = None;
        self.in_use -= 1;
        self.freelist.push(id);
        gauge!(METRIC_DESCRIPTORS_IN_USE).set(self.in_use as f64);
    }

    #[inline]
    pub fn desc(&self, id: MaskId) -> &MaskDesc {
        &self.slots[id as usize]
    }

    #[inline]
    pub fn desc_mut(&mut self, id: MaskId) -> &mut MaskDesc {
        &mut self.slots[id as usize]
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }
}

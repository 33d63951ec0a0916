//! Arena-backed radix tree with one-way branching removed.
//!
//! The index `b` at an internal node is the bit position tested there; all
//! descendants of that node agree on every bit before `b`, and at least one
//! descendant has a one and one a zero at `b`. Every head owns three
//! permanent nodes: the top internal node and two sentinel leaves whose keys
//! are all zeroes and all ones, so every descent ends on a leaf.

use crate::constants::*;
use crate::errors::Error;
use crate::helpers::*;
use crate::types::{Node, Slot};
use crossbeam_queue::SegQueue;
use log::{debug, trace};

/// Outcome of `RadixTree::insert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// Fresh leaf spliced in together with a new internal node.
    New(Slot),
    /// A leaf with the same key bytes already holds the tree position.
    Duplicate(Slot),
}

pub struct RadixTree<T> {
    nodes: Vec<Node<T>>,
    freelist: SegQueue<Slot>, // recycled slots
    live: usize,              // allocated nodes, sentinels excluded
    capacity: Option<usize>,
    top: Slot,
}

impl<T> RadixTree<T> {
    /// Build a head whose top node tests bit `off_bits`.
    pub fn new(zeroes: &[u8], ones: &[u8], off_bits: u16, capacity: Option<usize>) -> Self {
        let mut tree = RadixTree {
            nodes: Vec::with_capacity(3),
            freelist: SegQueue::new(),
            live: 0,
            capacity,
            top: 0,
        };
        let b = off_bits as i16;
        let (off, bmask) = bit_position(b);
        let top = tree.push(Node::vacant());
        let left = tree.push(Node::vacant());
        let right = tree.push(Node::vacant());
        for (slot, key) in [(left, zeroes), (right, ones)] {
            let leaf = &mut tree.nodes[slot as usize];
            leaf.b = -1 - b;
            leaf.key = key.into();
            leaf.parent = top;
            leaf.flags = RJF_ROOT | RJF_ACTIVE;
        }
        let t = &mut tree.nodes[top as usize];
        t.b = b;
        t.off = off;
        t.bmask = bmask;
        t.left = left;
        t.right = right;
        t.parent = top;
        t.flags = RJF_ROOT | RJF_ACTIVE;
        tree.top = top;
        tree
    }

    fn push(&mut self, node: Node<T>) -> Slot {
        self.nodes.push(node);
        (self.nodes.len() - 1) as Slot
    }

    #[inline]
    pub fn top(&self) -> Slot {
        self.top
    }

    #[inline]
    pub fn node(&self, slot: Slot) -> &Node<T> {
        &self.nodes[slot as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, slot: Slot) -> &mut Node<T> {
        &mut self.nodes[slot as usize]
    }

    /// Slot refers to an allocated, active node.
    pub fn is_live(&self, slot: Slot) -> bool {
        self.nodes
            .get(slot as usize)
            .map(|n| n.is_active())
            .unwrap_or(false)
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of allocations still possible before the capacity is hit.
    pub fn available(&self) -> Option<usize> {
        self.capacity.map(|c| c.saturating_sub(self.live))
    }

    pub fn reserve(&self, count: usize) -> Result<(), Error> {
        match self.available() {
            Some(avail) if avail < count => {
                debug!("[ALLOC] need {} slots, have {}", count, avail);
                Err(Error::OutOfMemory)
            }
            _ => Ok(()),
        }
    }

    /// Take a slot from the freelist or grow the arena.
    pub fn alloc(&mut self, mut node: Node<T>) -> Result<Slot, Error> {
        self.reserve(1)?;
        self.live += 1;
        if let Some(slot) = self.freelist.pop() {
            let prev = &self.nodes[slot as usize];
            node.generation = prev.generation.wrapping_add(1);
            trace!("[ALLOC] reusing slot={} gen={}", slot, node.generation);
            self.nodes[slot as usize] = node;
            return Ok(slot);
        }
        node.generation = 1;
        Ok(self.push(node))
    }

    /// Deactivate a node and hand back its contents.
    pub fn release(&mut self, slot: Slot) -> Node<T> {
        let generation = self.nodes[slot as usize].generation;
        let mut vacant = Node::vacant();
        vacant.generation = generation;
        let old = std::mem::replace(&mut self.nodes[slot as usize], vacant);
        debug_assert!(!old.is_root(), "sentinels are never released");
        self.live -= 1;
        self.freelist.push(slot);
        old
    }

    #[inline]
    fn goes_right(&self, key: &[u8], slot: Slot) -> bool {
        let n = &self.nodes[slot as usize];
        byte_at(key, n.off) & n.bmask != 0
    }

    /// Descend from `from` following the bits of `key` down to a leaf.
    pub fn search(&self, key: &[u8], from: Slot) -> Slot {
        let mut x = from;
        while self.nodes[x as usize].b >= 0 {
            #[cfg(feature = "trace")]
            trace!("[SEARCH] slot={} b={}", x, self.nodes[x as usize].b);
            let n = &self.nodes[x as usize];
            x = if self.goes_right(key, x) { n.right } else { n.left };
        }
        x
    }

    /// Like `search`, but a bit only counts when `mask` has it set too.
    pub fn search_masked(&self, key: &[u8], mask: &[u8], from: Slot) -> Slot {
        let mut x = from;
        while self.nodes[x as usize].b >= 0 {
            let n = &self.nodes[x as usize];
            let bit = byte_at(mask, n.off) & n.bmask != 0 && byte_at(key, n.off) & n.bmask != 0;
            x = if bit { n.right } else { n.left };
        }
        x
    }

    /// Splice `key` into the tree, or report the leaf already holding it.
    pub fn insert(&mut self, key: &[u8], value: Option<T>) -> Result<Inserted, Error> {
        let top = self.top;
        let head_off = self.nodes[top as usize].off;
        let vlen = key_len(key);
        let t = self.search(key, top);

        // first bit at which key and t's key differ
        let cp = match first_difference(key, &self.nodes[t as usize].key, head_off, vlen) {
            Some(cp) => cp,
            None => return Ok(Inserted::Duplicate(t)),
        };
        let cmp_res = byte_at(key, cp) ^ byte_at(&self.nodes[t as usize].key, cp);
        let b = ((cp << 3) as u32 + cmp_res.leading_zeros()) as i16;

        self.reserve(2)?;
        let mut x = top;
        let mut p;
        loop {
            p = x;
            let n = &self.nodes[x as usize];
            x = if self.goes_right(key, x) { n.right } else { n.left };
            let xb = self.nodes[x as usize].b;
            if !(xb >= 0 && b > xb) {
                break;
            }
        }
        debug!("[INSERT] new branch at bit={} below slot={} above slot={}", b, p, x);

        let mut leaf = Node::vacant();
        leaf.key = key.into();
        leaf.flags = RJF_ACTIVE;
        leaf.value = value;
        let tt = self.alloc(leaf)?;

        let (off, bmask) = bit_position(b);
        let mut internal = Node::vacant();
        internal.b = b;
        internal.off = off;
        internal.bmask = bmask;
        internal.left = tt;
        internal.flags = RJF_ACTIVE;
        let t = self.alloc(internal)?;

        self.nodes[tt as usize].parent = t;
        if self.goes_right(key, p) {
            self.nodes[p as usize].right = t;
        } else {
            self.nodes[p as usize].left = t;
        }
        self.nodes[x as usize].parent = t;
        self.nodes[t as usize].parent = p;
        if self.goes_right(key, t) {
            self.nodes[t as usize].right = tt;
            self.nodes[t as usize].left = x;
        } else {
            self.nodes[t as usize].right = x;
        }
        Ok(Inserted::New(tt))
    }

    /// Point whichever child link of `parent` held `old` at `new`.
    pub fn replace_child(&mut self, parent: Slot, old: Slot, new: Slot) {
        let p = &mut self.nodes[parent as usize];
        if p.left == old {
            p.left = new;
        } else {
            p.right = new;
        }
    }

    /// The other child of `parent`.
    pub fn sibling(&self, parent: Slot, child: Slot) -> Slot {
        let p = &self.nodes[parent as usize];
        if p.right == child {
            p.left
        } else {
            p.right
        }
    }

    pub fn leftmost(&self, from: Slot) -> Slot {
        let mut x = from;
        while self.nodes[x as usize].b >= 0 {
            x = self.nodes[x as usize].left;
        }
        x
    }

    /// In-order successor of a tree-level leaf, `None` after the last one.
    pub fn next_leaf(&self, leaf: Slot) -> Option<Slot> {
        let mut rn = leaf;
        loop {
            let p = self.nodes[rn as usize].parent;
            if self.nodes[p as usize].right != rn {
                break;
            }
            if p == self.top {
                return None;
            }
            rn = p;
        }
        let p = self.nodes[rn as usize].parent;
        Some(self.leftmost(self.nodes[p as usize].right))
    }

    /// Preorder visit of every tree position with its depth.
    pub fn preorder(&self, mut visit: impl FnMut(Slot, usize)) {
        let mut stack = vec![(self.top, 0usize)];
        while let Some((slot, depth)) = stack.pop() {
            visit(slot, depth);
            let n = &self.nodes[slot as usize];
            if n.b >= 0 {
                stack.push((n.right, depth + 1));
                stack.push((n.left, depth + 1));
            }
        }
    }

    /// Check parent links, strictly increasing bit indices and that every
    /// leaf below an internal node sits on the side its bit selects.
    pub fn check(&self) -> Result<(), String> {
        let top_b = self.nodes[self.top as usize].b;
        let mut stack = vec![(self.top, Vec::<(Slot, bool)>::new())];
        while let Some((slot, path)) = stack.pop() {
            let n = &self.nodes[slot as usize];
            if !n.is_active() {
                return Err(format!("inactive node {slot} reachable from the top"));
            }
            if n.b >= 0 {
                for child in [n.left, n.right] {
                    let c = &self.nodes[child as usize];
                    if c.parent != slot {
                        return Err(format!("node {child} has parent {} not {slot}", c.parent));
                    }
                    if c.b >= 0 && c.b <= n.b {
                        return Err(format!("child {child} tests bit {} under bit {}", c.b, n.b));
                    }
                }
                let mut lp = path.clone();
                lp.push((slot, false));
                let mut rp = path;
                rp.push((slot, true));
                stack.push((n.left, lp));
                stack.push((n.right, rp));
                continue;
            }
            let mut member = Some(slot);
            while let Some(m) = member {
                let key = &self.nodes[m as usize].key;
                for &(anc, right) in &path {
                    let a = &self.nodes[anc as usize];
                    if a.b > top_b && self.goes_right(key, anc) != right {
                        return Err(format!(
                            "leaf {m} is on the wrong side of bit {} at node {anc}",
                            a.b
                        ));
                    }
                }
                member = self.nodes[m as usize].dupedkey;
            }
        }
        Ok(())
    }
}

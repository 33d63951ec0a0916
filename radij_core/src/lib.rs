pub mod constants;
pub mod errors;
pub mod handle_registry;
pub mod helpers;
pub mod mask;
pub mod shared;
pub mod telemetry;
pub mod tree;
pub mod types;

// Install metrics recorder when the crate is loaded
#[doc(hidden)]
#[inline(always)]
fn _telemetry_bootstrap() {
    telemetry::init();
}

// NB: reference forces the function to run during `.so` load
#[used]
static _BOOTSTRAP: fn() = _telemetry_bootstrap;

use constants::*;
use errors::Error;
use helpers::*;
#[cfg(feature = "trace")]
use log::trace;
use log::{debug, error, info, warn};
use mask::{MaskPool, MaskTable};
use metrics::counter;
use once_cell::sync::OnceCell;
use tree::{Inserted, RadixTree};
use types::*;

pub use errors::ErrorCode;
pub use shared::SharedTrie;
pub use types::{AddOutcome, EntryId, Match, Removed, TrieConfig};

/// Position in a mask list: either the list head stored on a node or the
/// `next` link of a descriptor.
#[derive(Clone, Copy)]
enum Link {
    Node(Slot),
    Desc(MaskId),
}

/// Compressed binary trie over length-prefixed keys with optional netmasks.
///
/// Routes sharing identical key bytes hang off one tree position as a
/// duplicate-key chain, most specific mask first. Netmasks general enough to
/// cover a whole subtree are registered on the highest internal node where
/// they stay valid, and `longest_match` consults those lists on the way up.
pub struct KeyedTrie<T> {
    tree: RadixTree<T>,
    masks: MaskTable,
    pool: MaskPool,
    config: TrieConfig,
    len: usize,
}

impl<T> KeyedTrie<T> {
    // ---- logging bootstraper -------------------------------------------------
    fn ensure_logging() {
        static INIT: OnceCell<()> = OnceCell::new();
        INIT.get_or_init(|| {
            let _ = env_logger::builder()
                .format_timestamp(None)
                .is_test(std::env::var("RUST_TEST_THREADS").is_ok())
                .try_init();
        });
    }

    pub fn new(config: TrieConfig) -> Result<Self, Error> {
        if config.max_keylen == 0 || config.max_keylen > MAX_KEYLEN {
            return Err(Error::InvalidConfig(format!(
                "max_keylen must be within 1..={MAX_KEYLEN}, got {}",
                config.max_keylen
            )));
        }
        if config.key_offset_bits as usize >= config.max_keylen * 8 {
            return Err(Error::InvalidConfig(format!(
                "key offset of {} bits leaves no room in {}-byte keys",
                config.key_offset_bits, config.max_keylen
            )));
        }
        Ok(Self::build(config))
    }

    pub fn with_defaults() -> Self {
        Self::build(TrieConfig::default())
    }

    fn build(config: TrieConfig) -> Self {
        Self::ensure_logging();
        telemetry::init();
        let zeroes = vec![0u8; config.max_keylen];
        let ones = vec![0xffu8; config.max_keylen];
        info!(
            "[INIT] max_keylen={} key_offset_bits={} node_capacity={:?}",
            config.max_keylen, config.key_offset_bits, config.node_capacity
        );
        KeyedTrie {
            tree: RadixTree::new(&zeroes, &ones, config.key_offset_bits, config.node_capacity),
            masks: MaskTable::new(&zeroes, &ones, config.mask_table_capacity),
            pool: MaskPool::new(config.mask_descriptor_capacity),
            config,
            len: 0,
        }
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    /// Number of route entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Distinct netmasks entered so far. Masks are never forgotten.
    pub fn mask_count(&self) -> usize {
        self.masks.len()
    }

    pub fn mask_descriptors_in_use(&self) -> usize {
        self.pool.in_use()
    }

    pub fn has_odd_masks(&self) -> bool {
        self.masks.has_odd_masks()
    }

    // ---- lookups ---------------------------------------------------------------

    /// Entry at the leaf `key` descends to. Non-verifying: the entry's key
    /// may differ from `key`.
    pub fn lookup(&self, key: &[u8]) -> Option<Match<'_, T>> {
        let leaf = self.tree.search(key, self.tree.top());
        self.entry(leaf)
    }

    /// Like `lookup`, but only bits set in `mask` steer the descent right.
    pub fn lookup_masked(&self, key: &[u8], mask: &[u8]) -> Option<Match<'_, T>> {
        let leaf = self.tree.search_masked(key, mask, self.tree.top());
        self.entry(leaf)
    }

    /// Most specific entry covering `key`: an exact host entry, else a
    /// masked entry on the leaf's chain, else the first promoted mask on an
    /// ancestor whose masked key is present.
    pub fn longest_match(&self, key: &[u8]) -> Option<Match<'_, T>> {
        if let Err(e) = validate_key(key, self.config.max_keylen, "key") {
            debug!("[MATCH] {e}");
            return None;
        }
        match self.match_slot(key).and_then(|slot| self.entry(slot)) {
            Some(found) => {
                counter!(METRIC_MATCHES).increment(1);
                Some(found)
            }
            None => {
                counter!(METRIC_MATCH_MISSES).increment(1);
                None
            }
        }
    }

    fn match_slot(&self, v: &[u8]) -> Option<Slot> {
        let top = self.tree.top();
        let head_off = self.tree.node(top).off;
        let t = self.tree.search(v, top);
        let tn = self.tree.node(t);
        // every comparison below runs over the query's own length
        let vlen = key_len(v);

        let matched_off = match first_difference(v, &tn.key, head_off, vlen) {
            None if !tn.is_root() => return Some(t),
            // asked for the all-zeroes (default) key itself
            None if tn.dupedkey.is_some() => return tn.dupedkey,
            None => vlen,
            Some(cp) => cp,
        };
        #[cfg(feature = "trace")]
        trace!("[MATCH] leaf={} diverges at byte {}", t, matched_off);

        // a net route on the chain we landed on
        for c in self.chain(t) {
            let n = self.tree.node(c);
            if let Some(m) = n.mask {
                let mk = self.masks.key(m);
                if (matched_off..vlen).all(|i| (byte_at(v, i) ^ byte_at(&n.key, i)) & byte_at(mk, i) == 0) {
                    return Some(c);
                }
            }
        }

        // promoted masks, nearest ancestor first
        let mut scratch = [0u8; MAX_KEYLEN + 1];
        let mut a = t;
        loop {
            a = self.tree.node(a).parent;
            let an = self.tree.node(a);
            if an.mklist.is_some() {
                let off = an.off.min(matched_off);
                for m in self.mask_list(an.mklist) {
                    let d = self.pool.desc(m);
                    let mk = self.masks.key(d.mask);
                    for (i, out) in scratch.iter_mut().enumerate().take(vlen).skip(off) {
                        *out = byte_at(v, i) & byte_at(mk, i);
                    }
                    let landed = self.tree.search(&scratch, a);
                    let hit = self.chain(landed).find(|&x| self.tree.node(x).mask == Some(d.mask));
                    if let Some(x) = hit {
                        let xk = &self.tree.node(x).key;
                        if (off..vlen).all(|i| byte_at(xk, i) & byte_at(mk, i) == scratch[i]) {
                            return Some(x);
                        }
                    }
                }
            }
            if a == top {
                return None;
            }
        }
    }

    /// Entry by handle; `None` once the entry has been deleted.
    pub fn get(&self, id: EntryId) -> Option<Match<'_, T>> {
        if !self.is_current(id) {
            return None;
        }
        self.entry(id.slot())
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut T> {
        if !self.is_current(id) {
            return None;
        }
        let n = self.tree.node_mut(id.slot());
        if n.is_root() || !n.is_leaf() {
            return None;
        }
        n.value.as_mut()
    }

    fn is_current(&self, id: EntryId) -> bool {
        self.tree.is_live(id.slot()) && self.tree.node(id.slot()).generation == id.generation()
    }

    fn id_of(&self, slot: Slot) -> EntryId {
        EntryId::new(slot, self.tree.node(slot).generation)
    }

    fn entry(&self, slot: Slot) -> Option<Match<'_, T>> {
        let n = self.tree.node(slot);
        if n.is_root() || !n.is_leaf() || !n.is_active() {
            return None;
        }
        Some(Match {
            id: EntryId::new(slot, n.generation),
            key: &n.key,
            mask: n.mask.map(|m| self.masks.key(m)),
            value: n.value.as_ref()?,
        })
    }

    fn chain(&self, head: Slot) -> impl Iterator<Item = Slot> + '_ {
        std::iter::successors(Some(head), move |&s| self.tree.node(s).dupedkey)
    }

    fn mask_list(&self, head: Option<MaskId>) -> impl Iterator<Item = MaskId> + '_ {
        std::iter::successors(head, move |&m| self.pool.desc(m).next)
    }

    // ---- insertion -------------------------------------------------------------

    /// Add a route for `key`, optionally qualified by `netmask`.
    ///
    /// `Ok(AddOutcome::MaskNotEntered)` means the route is in the tree but
    /// the descriptor that would register its mask on an ancestor could not
    /// be allocated; the route is then only found from its own leaf.
    pub fn add_route(&mut self, key: &[u8], netmask: Option<&[u8]>, value: T) -> Result<AddOutcome, Error> {
        info!(
            "[ADD] key={} mask={}",
            hex(key),
            netmask.map(hex).unwrap_or_else(|| "-".into())
        );
        validate_key(key, self.config.max_keylen, "key")?;
        let top = self.tree.top();
        let head_off = self.tree.node(top).off;

        // canonical mask slot and its index
        let mut mask_slot = None;
        let mut b: i16 = 0;
        if let Some(nm) = netmask {
            validate_key(nm, self.config.max_keylen, "netmask")?;
            let x = match self.masks.find(nm) {
                Some(x) => x,
                None => self.masks.add_mask(nm, false, head_off)?,
            };
            b = -1 - self.masks.encoded_index(x);
            mask_slot = Some(x);
        }

        let (saved, tt, duplicated) = match self.tree.insert(key, None)? {
            Inserted::New(leaf) => {
                self.tree.node_mut(leaf).value = Some(value);
                (leaf, leaf, false)
            }
            Inserted::Duplicate(head) => {
                let (saved, tt) = self.chain_duplicate(head, key, mask_slot, value)?;
                (saved, tt, true)
            }
        };
        if let Some(m) = mask_slot {
            let n = self.tree.node_mut(tt);
            n.mask = Some(m);
            n.b = -1 - b;
        }
        self.len += 1;
        counter!(METRIC_ROUTES_ADDED).increment(1);
        let id = self.id_of(tt);

        let t = self.tree.node(saved).parent;
        if !duplicated {
            self.promote_from_below(t, saved);
        }

        let Some(ms) = mask_slot else {
            return Ok(AddOutcome::Added(id));
        };
        if b > self.tree.node(t).b {
            debug!("[ADD] mask bit {} is below parent bit {}, not lifted", b, self.tree.node(t).b);
            return Ok(AddOutcome::Added(id));
        }
        let b_leaf = self.tree.node(tt).b;
        let x = self.climb(t, b);

        // same order as duplicate chains: by index, then by refinement
        let mut link = Link::Node(x);
        let mut cur = self.tree.node(x).mklist;
        while let Some(m) = cur {
            let d = *self.pool.desc(m);
            if d.b > b_leaf {
                break;
            }
            if d.b == b_leaf {
                if d.mask == ms {
                    self.pool.desc_mut(m).refs += 1;
                    self.tree.node_mut(tt).mklist = Some(m);
                    debug!("[ADD] sharing descriptor {} at slot={} refs={}", m, x, d.refs + 1);
                    return Ok(AddOutcome::Added(id));
                }
                if refines_raw(self.masks.key(ms), self.masks.key(d.mask)) {
                    break;
                }
            }
            link = Link::Desc(m);
            cur = d.next;
        }
        match self.pool.get(MaskDesc { b: b_leaf, mask: ms, refs: 0, next: cur }) {
            Some(m) => {
                self.set_link(link, Some(m));
                self.tree.node_mut(tt).mklist = Some(m);
                debug!("[ADD] mask {} registered at slot={}", hex(self.masks.key(ms)), x);
                Ok(AddOutcome::Added(id))
            }
            None => {
                warn!("[ADD] mask for route not entered, key={}", hex(key));
                counter!(METRIC_MASKS_NOT_ENTERED).increment(1);
                Ok(AddOutcome::MaskNotEntered(id))
            }
        }
    }

    /// Hang a new leaf for `key` on the duplicate chain starting at `head`.
    /// Returns the chain head afterwards and the new leaf.
    fn chain_duplicate(
        &mut self,
        head: Slot,
        key: &[u8],
        mask: Option<Slot>,
        value: T,
    ) -> Result<(Slot, Slot), Error> {
        if self
            .chain(head)
            .any(|c| !self.tree.node(c).is_root() && self.tree.node(c).mask == mask)
        {
            return Err(Error::AlreadyExists);
        }
        let mut prev = None;
        let mut cur = Some(head);
        while let Some(c) = cur {
            let n = self.tree.node(c);
            let goes_before = match (mask, n.mask) {
                (None, _) => true,
                (Some(m), Some(existing)) => refines_raw(self.masks.key(m), self.masks.key(existing)),
                (Some(_), None) => false,
            };
            if goes_before {
                break;
            }
            prev = Some(c);
            cur = n.dupedkey;
        }

        let mut leaf = Node::vacant();
        leaf.key = key.into();
        leaf.flags = RJF_ACTIVE;
        leaf.value = Some(value);
        leaf.parent = self.tree.node(head).parent;
        leaf.dupedkey = cur;
        let tt = self.tree.alloc(leaf)?;
        match prev {
            None => {
                self.relocate_chain_head(head, tt);
                Ok((tt, tt))
            }
            Some(p) => {
                self.tree.node_mut(p).dupedkey = Some(tt);
                Ok((head, tt))
            }
        }
    }

    /// Move the tree position held by chain head `old` to `new`. The caller
    /// has already linked the two.
    fn relocate_chain_head(&mut self, old: Slot, new: Slot) {
        let parent = self.tree.node(old).parent;
        self.tree.replace_child(parent, old, new);
        self.tree.node_mut(new).parent = parent;
        debug!("[CHAIN] head moved from slot={} to slot={}", old, new);
    }

    /// `t` was just spliced in above `leaf`; masks of the sibling subtree
    /// that are general enough for `t` move onto `t`.
    fn promote_from_below(&mut self, t: Slot, leaf: Slot) {
        let b_leaf = -1 - self.tree.node(t).b;
        let x = self.tree.sibling(t, leaf);
        if self.tree.node(x).is_leaf() {
            let members: Vec<Slot> = self.chain(x).collect();
            for c in members {
                let n = self.tree.node(c);
                let Some(mask) = n.mask else { continue };
                if n.b < b_leaf || n.mklist.is_some() {
                    continue;
                }
                match self.pool.get(MaskDesc { b: n.b, mask, refs: 0, next: None }) {
                    Some(m) => {
                        self.tree.node_mut(c).mklist = Some(m);
                        self.insert_sorted(t, m);
                        debug!("[PROMOTE] leaf={} mask moved up to slot={}", c, t);
                    }
                    None => warn!("[PROMOTE] no descriptor left for leaf={}", c),
                }
            }
        } else if let Some(first) = self.tree.node(x).mklist {
            // skip over masks too specific for t
            let mut link = Link::Node(x);
            let mut cur = Some(first);
            while let Some(m) = cur {
                if self.pool.desc(m).b >= b_leaf {
                    break;
                }
                link = Link::Desc(m);
                cur = self.pool.desc(m).next;
            }
            self.tree.node_mut(t).mklist = cur;
            self.set_link(link, None);
        }
    }

    /// Highest ancestor, starting at `from`, below which mask bit `b` holds.
    fn climb(&self, from: Slot, b: i16) -> Slot {
        let top = self.tree.top();
        let mut t = from;
        loop {
            let x = t;
            t = self.tree.node(t).parent;
            if !(b <= self.tree.node(t).b && x != top) {
                return x;
            }
        }
    }

    fn set_link(&mut self, link: Link, to: Option<MaskId>) {
        match link {
            Link::Node(s) => self.tree.node_mut(s).mklist = to,
            Link::Desc(m) => self.pool.desc_mut(m).next = to,
        }
    }

    fn insert_sorted(&mut self, holder: Slot, m: MaskId) {
        let b = self.pool.desc(m).b;
        let mut link = Link::Node(holder);
        let mut cur = self.tree.node(holder).mklist;
        while let Some(c) = cur {
            if self.pool.desc(c).b > b {
                break;
            }
            link = Link::Desc(c);
            cur = self.pool.desc(c).next;
        }
        self.pool.desc_mut(m).next = cur;
        self.set_link(link, Some(m));
    }

    /// Unlink `target` from the list on `holder` and free it.
    fn unlink_desc(&mut self, holder: Slot, target: MaskId) -> bool {
        let mut link = Link::Node(holder);
        let mut cur = self.tree.node(holder).mklist;
        while let Some(m) = cur {
            let next = self.pool.desc(m).next;
            if m == target {
                self.set_link(link, next);
                self.pool.put(m);
                return true;
            }
            link = Link::Desc(m);
            cur = next;
        }
        false
    }

    fn report_orphan(&mut self, m: MaskId, at: Slot) {
        let d = *self.pool.desc(m);
        error!(
            "[DELETE] orphaned mask descriptor {} (mask={} refs={}) at slot={}",
            m,
            hex(self.masks.key(d.mask)),
            d.refs,
            at
        );
        counter!(METRIC_ORPHANED_MASKS).increment(1);
        // nothing references it any more
        self.pool.put(m);
    }

    // ---- deletion --------------------------------------------------------------

    /// Remove the route for `key`. With a duplicate chain, `netmask` picks
    /// the member; a lone entry is removed whatever mask is given.
    pub fn delete(&mut self, key: &[u8], netmask: Option<&[u8]>) -> Result<Removed<T>, Error> {
        info!(
            "[DELETE] key={} mask={}",
            hex(key),
            netmask.map(hex).unwrap_or_else(|| "-".into())
        );
        validate_key(key, self.config.max_keylen, "key")?;
        if let Some(nm) = netmask {
            validate_key(nm, self.config.max_keylen, "netmask")?;
        }
        let top = self.tree.top();
        let head_off = self.tree.node(top).off;
        let saved = self.tree.search(key, top);
        if !same_bytes(key, &self.tree.node(saved).key, head_off, key_len(key)) {
            return Err(Error::NotFound);
        }
        let dupedkey = self.tree.node(saved).dupedkey;
        let mut tt = saved;
        if dupedkey.is_some() {
            let want = match netmask {
                Some(nm) => Some(self.masks.find(nm).ok_or(Error::NotFound)?),
                None => None,
            };
            tt = self
                .chain(saved)
                .find(|&c| !self.tree.node(c).is_root() && self.tree.node(c).mask == want)
                .ok_or(Error::NotFound)?;
        }
        if self.tree.node(tt).is_root() {
            return Err(Error::InvariantViolation("refusing to delete a sentinel".into()));
        }
        let t = self.tree.node(saved).parent;
        if dupedkey.is_none() && t == top {
            return Err(Error::InvariantViolation(format!(
                "leaf {tt} hangs directly off the top node"
            )));
        }

        let mut orphaned = 0;
        self.drop_annotation(saved, tt, &mut orphaned);

        if let Some(next) = dupedkey {
            if tt == saved {
                self.relocate_chain_head(tt, next);
            } else {
                let prev = self.chain(saved).find(|&c| self.tree.node(c).dupedkey == Some(tt));
                match prev {
                    Some(p) => self.tree.node_mut(p).dupedkey = self.tree.node(tt).dupedkey,
                    None => error!("[DELETE] slot={} missing from its chain", tt),
                }
            }
        } else {
            let x = self.tree.sibling(t, tt);
            let p = self.tree.node(t).parent;
            self.tree.replace_child(p, t, x);
            self.tree.node_mut(x).parent = p;
            if let Some(list) = self.tree.node_mut(t).mklist.take() {
                orphaned += self.demote(list, x);
            }
            self.tree.release(t);
        }

        let node = self.tree.release(tt);
        self.len -= 1;
        counter!(METRIC_ROUTES_DELETED).increment(1);
        let value = node.value.ok_or_else(|| {
            Error::InvariantViolation(format!("entry at slot {tt} carried no value"))
        })?;
        Ok(Removed {
            key: node.key,
            mask: node.mask.map(|m| self.masks.key(m).into()),
            value,
            orphaned_masks: orphaned,
        })
    }

    /// Delete by handle, e.g. from inside a `walk` visitor.
    pub fn remove(&mut self, id: EntryId) -> Result<Removed<T>, Error> {
        let (key, mask) = {
            let m = self.get(id).ok_or(Error::NotFound)?;
            (m.key.to_vec(), m.mask.map(|m| m.to_vec()))
        };
        self.delete(&key, mask.as_deref())
    }

    /// Release the reference leaf `tt` holds on its mask descriptor; the last
    /// reference unlinks it from the ancestor it was registered on.
    fn drop_annotation(&mut self, saved: Slot, tt: Slot, orphaned: &mut usize) {
        let n = self.tree.node(tt);
        let (Some(mask), Some(m)) = (n.mask, n.mklist) else {
            return;
        };
        let b = -1 - n.b;
        if self.pool.desc(m).mask != mask {
            warn!("[DELETE] inconsistent annotation on slot={}", tt);
            return;
        }
        let d = self.pool.desc_mut(m);
        d.refs -= 1;
        if d.refs >= 0 {
            return;
        }
        let t = self.tree.node(saved).parent;
        if b <= self.tree.node(t).b && self.unlink_desc(self.climb(t, b), m) {
            return;
        }
        // not where the climb says; try the rest of the path
        let top = self.tree.top();
        let mut a = t;
        loop {
            if self.unlink_desc(a, m) {
                warn!("[DELETE] descriptor {} found off its climb at slot={}", m, a);
                return;
            }
            if a == top {
                break;
            }
            a = self.tree.node(a).parent;
        }
        self.report_orphan(m, tt);
        *orphaned += 1;
    }

    /// Hand the mask list of a removed internal node to `x`, which took its
    /// place. Returns the number of orphaned descriptors.
    fn demote(&mut self, list: MaskId, x: Slot) -> usize {
        if self.tree.node(x).b >= 0 {
            let mut link = Link::Node(x);
            let mut cur = self.tree.node(x).mklist;
            while let Some(m) = cur {
                link = Link::Desc(m);
                cur = self.pool.desc(m).next;
            }
            self.set_link(link, Some(list));
            return 0;
        }
        let mut orphaned = 0;
        let mut cur = Some(list);
        while let Some(m) = cur {
            cur = self.pool.desc(m).next;
            self.pool.desc_mut(m).next = None;
            let holder = self.chain(x).find(|&y| self.tree.node(y).mklist == Some(m));
            match holder {
                Some(y) => {
                    let d = self.pool.desc_mut(m);
                    d.refs -= 1;
                    if d.refs < 0 {
                        self.tree.node_mut(y).mklist = None;
                        self.pool.put(m);
                    }
                }
                None => {
                    self.report_orphan(m, x);
                    orphaned += 1;
                }
            }
        }
        orphaned
    }

    // ---- traversal -------------------------------------------------------------

    /// Visit every entry in key order. The successor is fixed before the
    /// visitor runs, so the visitor may remove the entry it was handed (and
    /// nothing else). The first error stops the walk; a successor that
    /// disappeared under the visitor is reported as an invariant violation
    /// rather than ending the walk early.
    pub fn walk<E, F>(&mut self, mut visit: F) -> Result<(), E>
    where
        E: From<Error>,
        F: FnMut(&mut Self, EntryId) -> Result<(), E>,
    {
        let mut leaf = Some(self.tree.leftmost(self.tree.top()));
        while let Some(base) = leaf {
            let next = self.tree.next_leaf(base).map(|s| self.id_of(s));
            let mut member = Some(self.id_of(base));
            while let Some(id) = member {
                member = self.tree.node(id.slot()).dupedkey.map(|s| self.id_of(s));
                if self.get(id).is_some() {
                    #[cfg(feature = "trace")]
                    trace!("[WALK] visiting slot={}", id.slot());
                    visit(self, id)?;
                }
            }
            leaf = match next {
                Some(id) if self.is_current(id) => Some(id.slot()),
                Some(id) => {
                    warn!("[WALK] successor slot={} vanished", id.slot());
                    return Err(Error::InvariantViolation(format!(
                        "walk successor slot {} removed by the visitor",
                        id.slot()
                    ))
                    .into());
                }
                None => None,
            };
        }
        Ok(())
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            trie: self,
            leaf: Some(self.tree.leftmost(self.tree.top())),
            member: None,
        }
    }

    /// Delete every entry; returns how many went.
    pub fn clear(&mut self) -> usize {
        let mut removed = 0;
        let walked: Result<(), Error> = self.walk(|trie, id| {
            match trie.remove(id) {
                Ok(_) => removed += 1,
                Err(e) => error!("[CLEAR] slot={}: {}", id.slot(), e),
            }
            Ok(())
        });
        if let Err(e) = walked {
            error!("[CLEAR] walk aborted: {}", e);
        }
        info!("[CLEAR] removed {} entries", removed);
        removed
    }

    // ---- diagnostics -----------------------------------------------------------

    /// Preorder rendering of the tree: `*` lines for internal nodes with
    /// their mask lists, `@` lines for every chain member.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.tree.preorder(|slot, depth| {
            let n = self.tree.node(slot);
            let indent = "  ".repeat(depth);
            if n.b >= 0 {
                let list: Vec<String> = self
                    .mask_list(n.mklist)
                    .map(|m| {
                        let d = self.pool.desc(m);
                        format!("{}:{}/r{}", m, hex(self.masks.key(d.mask)), d.refs)
                    })
                    .collect();
                lines.push(format!(
                    "{indent}* #{slot} b={} off={} bmask={:#04x} flags={:#04x} mklist=[{}]",
                    n.b,
                    n.off,
                    n.bmask,
                    n.flags,
                    list.join(" ")
                ));
                return;
            }
            for c in self.chain(slot) {
                let m = self.tree.node(c);
                lines.push(format!(
                    "{indent}@ #{c} b={} flags={:#04x} key={} mask={} mklist={:?}",
                    m.b,
                    m.flags,
                    hex(&m.key),
                    m.mask.map(|s| hex(self.masks.key(s))).unwrap_or_else(|| "-".into()),
                    m.mklist
                ));
            }
        });
        lines
    }

    pub fn log_dump(&self) {
        for line in self.dump() {
            debug!("[DUMP] {line}");
        }
    }

    /// Check the structural invariants of the tree, the duplicate chains and
    /// the mask lists.
    pub fn verify(&self) -> Result<(), Error> {
        self.tree.check().map_err(Error::InvariantViolation)?;
        let bad = |what: String| Err(Error::InvariantViolation(what));
        let head_off = self.tree.node(self.tree.top()).off;

        let mut slots = Vec::new();
        self.tree.preorder(|slot, _| slots.push(slot));
        let mut entries = 0;
        let mut listed = std::collections::HashSet::new();
        for slot in slots {
            let n = self.tree.node(slot);
            if n.b >= 0 {
                let mut prev_b = i16::MIN;
                for m in self.mask_list(n.mklist) {
                    let d = self.pool.desc(m);
                    if !listed.insert(m) {
                        return bad(format!("descriptor {m} listed twice"));
                    }
                    if d.b < prev_b {
                        return bad(format!("mask list of node {slot} out of order"));
                    }
                    if d.b != self.masks.encoded_index(d.mask) {
                        return bad(format!("descriptor {m} disagrees with its mask index"));
                    }
                    if -1 - d.b > n.b {
                        return bad(format!("descriptor {m} is too specific for node {slot}"));
                    }
                    prev_b = d.b;
                }
                continue;
            }
            let mut prev: Option<Slot> = None;
            for c in self.chain(slot) {
                let m = self.tree.node(c);
                if !m.is_active() {
                    return bad(format!("inactive chain member {c}"));
                }
                if m.is_root() {
                    continue;
                }
                if !same_bytes(&m.key, &n.key, head_off, key_len(&m.key)) {
                    return bad(format!("chain member {c} has a different key from {slot}"));
                }
                entries += 1;
                let expect_b = m.mask.map(|s| self.masks.encoded_index(s)).unwrap_or(-1);
                if m.b != expect_b {
                    return bad(format!("leaf {c} has b={} but its mask says {}", m.b, expect_b));
                }
                if let (Some(d), Some(mask)) = (m.mklist, m.mask) {
                    if self.pool.desc(d).mask != mask {
                        return bad(format!("leaf {c} points at a descriptor for another mask"));
                    }
                }
                if let Some(p) = prev {
                    let pm = self.tree.node(p).mask;
                    let out_of_order = match (pm, m.mask) {
                        (Some(_), None) => true,
                        (Some(a), Some(b)) => refines_raw(self.masks.key(b), self.masks.key(a)),
                        _ => false,
                    };
                    if out_of_order {
                        return bad(format!("chain member {c} is more specific than {p}"));
                    }
                }
                prev = Some(c);
            }
        }
        if entries != self.len {
            return bad(format!("{entries} entries reachable, {} recorded", self.len));
        }
        if listed.len() != self.pool.in_use() {
            return bad(format!(
                "{} descriptors listed, {} allocated",
                listed.len(),
                self.pool.in_use()
            ));
        }
        Ok(())
    }
}

/// In-order iterator over the entries of a `KeyedTrie`.
pub struct Iter<'a, T> {
    trie: &'a KeyedTrie<T>,
    leaf: Option<Slot>,
    member: Option<Slot>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = Match<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(c) = self.member {
                self.member = self.trie.tree.node(c).dupedkey;
                if let Some(found) = self.trie.entry(c) {
                    return Some(found);
                }
                continue;
            }
            let leaf = self.leaf?;
            self.leaf = self.trie.tree.next_leaf(leaf);
            self.member = Some(leaf);
        }
    }
}

impl<'a, T> IntoIterator for &'a KeyedTrie<T> {
    type Item = Match<'a, T>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// Public module for C API functions
pub mod public_api;

// Re-export all public API functions at the crate root
pub use public_api::*;

use crate::{errors::ErrorCode, SharedTrie};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle ID type - safer than raw pointers
pub type HandleId = u64;

/// Tries opened through the C ABI carry a `u64` payload per route.
pub type CTrie = SharedTrie<u64>;

static REGISTRY: Lazy<DashMap<HandleId, Arc<CTrie>>> = Lazy::new(DashMap::new);
// 0 stays reserved for null/invalid
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Register a trie and return its handle ID
pub fn register_handle(trie: CTrie) -> HandleId {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    REGISTRY.insert(id, Arc::new(trie));
    id
}

/// Run `f` against the trie behind `handle_id`. The registry entry is not
/// held while `f` runs, so a concurrent close only drops the last `Arc`.
pub fn with_handle<T, F>(handle_id: HandleId, f: F) -> Result<T, ErrorCode>
where
    F: FnOnce(&CTrie) -> T,
{
    if handle_id == 0 {
        return Err(ErrorCode::InvalidHandle);
    }
    let trie = REGISTRY
        .get(&handle_id)
        .map(|entry| Arc::clone(entry.value()))
        .ok_or(ErrorCode::InvalidHandle)?;
    Ok(f(&trie))
}

/// Unregister and drop a trie
pub fn unregister_handle(handle_id: HandleId) -> Result<(), ErrorCode> {
    if handle_id == 0 {
        return Err(ErrorCode::InvalidHandle);
    }
    REGISTRY
        .remove(&handle_id)
        .map(|_| ())
        .ok_or(ErrorCode::InvalidHandle)
}

//! Thread-safe handle around a `KeyedTrie`: one read-write lock for the
//! whole structure. Lookups share the read side; every mutation, walks
//! included, holds the write side until it returns.

use crate::errors::Error;
use crate::types::{AddOutcome, Match, Removed, TrieConfig};
use crate::KeyedTrie;
use log::debug;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct SharedTrie<T> {
    inner: RwLock<KeyedTrie<T>>,
}

impl<T> SharedTrie<T> {
    pub fn new(config: TrieConfig) -> Result<Self, Error> {
        Ok(Self::from_trie(KeyedTrie::new(config)?))
    }

    pub fn from_trie(trie: KeyedTrie<T>) -> Self {
        SharedTrie { inner: RwLock::new(trie) }
    }

    pub fn read_lock(&self) -> Result<RwLockReadGuard<'_, KeyedTrie<T>>, Error> {
        self.inner
            .read()
            .map_err(|e| Error::Lock(format!("read_lock failed: {e}")))
    }

    pub fn write_lock(&self) -> Result<RwLockWriteGuard<'_, KeyedTrie<T>>, Error> {
        self.inner
            .write()
            .map_err(|e| Error::Lock(format!("write_lock failed: {e}")))
    }

    pub fn add_route(&self, key: &[u8], netmask: Option<&[u8]>, value: T) -> Result<AddOutcome, Error> {
        let mut trie = self.write_lock()?;
        trie.add_route(key, netmask, value)
    }

    pub fn delete(&self, key: &[u8], netmask: Option<&[u8]>) -> Result<Removed<T>, Error> {
        let mut trie = self.write_lock()?;
        trie.delete(key, netmask)
    }

    /// Run `f` on the longest match while the read lock is held.
    pub fn longest_match_with<R>(
        &self,
        key: &[u8],
        f: impl FnOnce(Match<'_, T>) -> R,
    ) -> Result<Option<R>, Error> {
        let trie = self.read_lock()?;
        Ok(trie.longest_match(key).map(f))
    }

    pub fn longest_match(&self, key: &[u8]) -> Result<Option<T>, Error>
    where
        T: Clone,
    {
        self.longest_match_with(key, |m| m.value.clone())
    }

    pub fn lookup_with<R>(&self, key: &[u8], f: impl FnOnce(Match<'_, T>) -> R) -> Result<Option<R>, Error> {
        let trie = self.read_lock()?;
        Ok(trie.lookup(key).map(f))
    }

    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.read_lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.read_lock()?.is_empty())
    }

    /// `KeyedTrie::walk` under the write lock; lock failures arrive as `E`.
    pub fn walk<E, F>(&self, visit: F) -> Result<(), E>
    where
        E: From<Error>,
        F: FnMut(&mut KeyedTrie<T>, crate::types::EntryId) -> Result<(), E>,
    {
        let mut trie = self.write_lock()?;
        debug!("[SHARED] walk holding the write lock");
        trie.walk(visit)
    }

    pub fn clear(&self) -> Result<usize, Error> {
        Ok(self.write_lock()?.clear())
    }

    pub fn verify(&self) -> Result<(), Error> {
        self.read_lock()?.verify()
    }

    pub fn into_inner(self) -> Result<KeyedTrie<T>, Error> {
        self.inner
            .into_inner()
            .map_err(|e| Error::Lock(format!("lock poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn poisoned_lock_maps_to_lock_error() {
        let shared = Arc::new(SharedTrie::<u32>::new(TrieConfig::default()).unwrap());
        let s2 = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = s2.write_lock().unwrap();
            panic!("poison it");
        })
        .join();
        assert!(matches!(shared.len(), Err(Error::Lock(_))));
        assert!(matches!(
            shared.add_route(&[2, 1], None, 1),
            Err(Error::Lock(_))
        ));
    }

    #[test]
    fn walk_surfaces_visitor_errors() {
        let shared = SharedTrie::new(TrieConfig::default()).unwrap();
        shared.add_route(&[2, 1], None, 1u32).unwrap();
        let res: Result<(), Error> = shared.walk(|_, _| Err(Error::NotFound));
        assert_eq!(res, Err(Error::NotFound));
    }
}

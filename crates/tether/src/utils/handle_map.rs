//! A map keyed by script values.

use std::collections::HashMap;

use crate::error::Result;
use crate::handle::Handle;

/// Map from script objects to host values, compared by engine identity.
///
/// Keys are stored as twins, so the map keeps them counted against the
/// runtime until they are removed or the map is released.
pub struct HandleMap<V> {
    buckets: HashMap<u32, Vec<(Handle, V)>>,
    len: usize,
}

impl<V> HandleMap<V> {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace. Returns the previous value for an equal key.
    pub fn insert(&mut self, key: &Handle, value: V) -> Result<Option<V>> {
        let hash = key.identity_hash()?;
        if let Some(slot) = self.position(hash, key)? {
            let bucket = self.bucket_mut(hash);
            return Ok(Some(std::mem::replace(&mut bucket[slot].1, value)));
        }
        let twin = key.twin()?;
        self.buckets.entry(hash).or_default().push((twin, value));
        self.len += 1;
        Ok(None)
    }

    pub fn get(&self, key: &Handle) -> Result<Option<&V>> {
        let hash = key.identity_hash()?;
        Ok(self
            .position(hash, key)?
            .and_then(|slot| self.buckets.get(&hash).map(|bucket| &bucket[slot].1)))
    }

    pub fn contains_key(&self, key: &Handle) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove an entry and release its stored key.
    pub fn remove(&mut self, key: &Handle) -> Result<Option<V>> {
        let hash = key.identity_hash()?;
        let Some(slot) = self.position(hash, key)? else {
            return Ok(None);
        };
        let bucket = self.bucket_mut(hash);
        let (stored, value) = bucket.swap_remove(slot);
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        self.len -= 1;
        stored.release()?;
        Ok(Some(value))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.buckets.values().flatten().map(|(_, v)| v)
    }

    /// Remove every entry, releasing the stored keys.
    pub fn clear(&mut self) -> Result<()> {
        let mut first_error = None;
        for (stored, _) in self.buckets.drain().flat_map(|(_, bucket)| bucket) {
            if let Err(e) = stored.release() {
                first_error.get_or_insert(e);
            }
        }
        self.len = 0;
        first_error.map_or(Ok(()), Err)
    }

    /// Release the map. Equivalent to [`clear`](Self::clear) but consumes it.
    pub fn release(mut self) -> Result<()> {
        self.clear()
    }

    fn position(&self, hash: u32, key: &Handle) -> Result<Option<usize>> {
        let Some(bucket) = self.buckets.get(&hash) else {
            return Ok(None);
        };
        for (slot, (stored, _)) in bucket.iter().enumerate() {
            if stored.strict_equals(key)? {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn bucket_mut(&mut self, hash: u32) -> &mut Vec<(Handle, V)> {
        self.buckets.entry(hash).or_default()
    }
}

impl<V> Default for HandleMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn test_lookup_by_identity() {
        let runtime = Runtime::create().unwrap();
        let key = runtime.new_object().unwrap();
        let other = runtime.new_object().unwrap();

        let mut map = HandleMap::new();
        assert_eq!(map.insert(&key, "first").unwrap(), None);
        // the map holds a twin of the key
        assert_eq!(runtime.object_reference_count(), 3);

        let same = key.twin().unwrap();
        assert_eq!(map.get(&same).unwrap(), Some(&"first"));
        assert!(!map.contains_key(&other).unwrap());

        assert_eq!(map.insert(&same, "second").unwrap(), Some("first"));
        assert_eq!(map.len(), 1);

        same.release().unwrap();
        key.release().unwrap();
        other.release().unwrap();
        map.release().unwrap();
        assert_eq!(runtime.object_reference_count(), 0);
        runtime.release().unwrap();
    }

    #[test]
    fn test_remove_releases_stored_key() {
        let runtime = Runtime::create().unwrap();
        let key = runtime.new_array().unwrap();

        let mut map = HandleMap::new();
        map.insert(&key, 7).unwrap();
        assert_eq!(runtime.object_reference_count(), 2);

        assert_eq!(map.remove(&key).unwrap(), Some(7));
        assert_eq!(map.remove(&key).unwrap(), None);
        assert!(map.is_empty());
        assert_eq!(runtime.object_reference_count(), 1);

        key.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_undefined_is_a_key() {
        let runtime = Runtime::create().unwrap();
        let mut map = HandleMap::new();
        map.insert(&Handle::undefined(), 1).unwrap();
        assert_eq!(map.get(&runtime.undefined()).unwrap(), Some(&1));
        map.clear().unwrap();
        runtime.release().unwrap();
    }
}

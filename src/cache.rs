//! The cache protocol and the default in-memory implementation.

use crate::identity::{CacheValue, SourceIdentity};
use crate::source::DataSource;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Keyed store of fetched values with snapshot semantics.
///
/// `get` is a plain read; [`inserting`](CacheStore::inserting) leaves the
/// receiver untouched and returns a successor snapshot. The engine threads
/// snapshots through interpretation, so one run never mutates the cache the
/// caller passed in.
///
/// Implementations may back this with persistent or copy-on-write structures;
/// the engine only requires the two operations below.
pub trait CacheStore: fmt::Debug + Send + Sync {
    /// Look up a fetched value.
    fn get(&self, key: &SourceIdentity) -> Option<CacheValue>;

    /// Produce a successor snapshot containing `value` under `key`.
    fn inserting(&self, key: SourceIdentity, value: CacheValue) -> Arc<dyn CacheStore>;
}

/// Fold a set of fetched entries into successive cache snapshots.
pub fn inserting_all(
    cache: Arc<dyn CacheStore>,
    entries: impl IntoIterator<Item = (SourceIdentity, CacheValue)>,
) -> Arc<dyn CacheStore> {
    entries
        .into_iter()
        .fold(cache, |cache, (key, value)| cache.inserting(key, value))
}

/// The default cache: an unordered in-memory map, cloned per snapshot.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: HashMap<SourceIdentity, CacheValue>,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache behind the store protocol.
    ///
    /// This is the default cache factory for [`run`](crate::run) and friends.
    pub fn empty() -> Arc<dyn CacheStore> {
        Arc::new(Self::new())
    }

    /// Pre-seed a value for one of a source's identities.
    ///
    /// # Example
    ///
    /// ```
    /// # use std::collections::HashMap;
    /// # use async_trait::async_trait;
    /// # use fetch_plan::{DataSource, InMemoryCache};
    /// # struct Users;
    /// # #[async_trait]
    /// # impl DataSource for Users {
    /// #     type Id = u32;
    /// #     type Value = String;
    /// #     fn name(&self) -> &str { "Users" }
    /// #     async fn fetch(&self, ids: Vec<u32>) -> anyhow::Result<HashMap<u32, String>> {
    /// #         Ok(HashMap::new())
    /// #     }
    /// # }
    /// let cache = InMemoryCache::new().with_value(&Users, &1, "a".to_string());
    /// assert_eq!(cache.len(), 1);
    /// ```
    pub fn with_value<S: DataSource>(mut self, source: &S, id: &S::Id, value: S::Value) -> Self {
        self.entries
            .insert(source.identity(id), CacheValue::new(value));
        self
    }

    /// Number of cached identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for InMemoryCache {
    fn get(&self, key: &SourceIdentity) -> Option<CacheValue> {
        self.entries.get(key).cloned()
    }

    fn inserting(&self, key: SourceIdentity, value: CacheValue) -> Arc<dyn CacheStore> {
        let mut entries = self.entries.clone();
        entries.insert(key, value);
        Arc::new(Self { entries })
    }
}

impl fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKey;

    fn key(id: u32) -> SourceIdentity {
        SourceIdentity::new("Users", IdentityKey::new(id))
    }

    #[test]
    fn test_inserting_leaves_original_untouched() {
        let original = InMemoryCache::new();
        let successor = original.inserting(key(1), CacheValue::new("a".to_string()));

        assert!(original.is_empty());
        assert_eq!(
            successor.get(&key(1)).and_then(|v| v.downcast::<String>()),
            Some("a".to_string())
        );
    }

    #[test]
    fn test_inserting_all_folds_every_entry() {
        let cache = inserting_all(
            InMemoryCache::empty(),
            vec![
                (key(1), CacheValue::new(1u32)),
                (key(2), CacheValue::new(2u32)),
            ],
        );

        assert_eq!(cache.get(&key(1)).and_then(|v| v.downcast::<u32>()), Some(1));
        assert_eq!(cache.get(&key(2)).and_then(|v| v.downcast::<u32>()), Some(2));
        assert!(cache.get(&key(3)).is_none());
    }

    #[test]
    fn test_get_misses_on_other_source() {
        let cache = InMemoryCache::new().inserting(key(1), CacheValue::new(1u32));
        let other = SourceIdentity::new("Posts", IdentityKey::new(1u32));
        assert!(cache.get(&other).is_none());
    }
}

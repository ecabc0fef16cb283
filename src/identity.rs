//! Cache keys and type-erased values.
//!
//! Distinct data sources have distinct id and value types, but they all share
//! one cache and one batch combiner. The erasure lives here and only here:
//! everywhere else in the crate the source's real types flow through.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Object-safe facade over any hashable, comparable identity value.
trait DynKey: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> DynKey for T
where
    T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        // Keys of different types must not collide even when their payloads
        // hash identically.
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A type-erased identity value.
///
/// Wraps any `Eq + Hash + Debug` value so identities from heterogeneous
/// sources can share one cache keyspace. Two keys are equal when they wrap
/// the same concrete type and the wrapped values compare equal.
#[derive(Clone)]
pub struct IdentityKey(Arc<dyn DynKey>);

impl IdentityKey {
    /// Wrap an identity value.
    pub fn new<T>(value: T) -> Self
    where
        T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(value))
    }

    /// Borrow the wrapped value, if it is a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.dyn_fmt(f)
    }
}

/// The cache key: a source name paired with an identity within that source.
///
/// Equality is structural over the pair, so two sources with the same name
/// share cache entries for equal identities.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    source: Arc<str>,
    key: IdentityKey,
}

impl SourceIdentity {
    /// Build a cache key from a source name and an erased identity.
    pub fn new(source: &str, key: IdentityKey) -> Self {
        Self {
            source: Arc::from(source),
            key,
        }
    }

    /// Name of the source this identity belongs to.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The erased identity value.
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }
}

impl fmt::Debug for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.source, self.key)
    }
}

/// A type-erased fetched value.
///
/// Values enter the cache erased and are downcast back to the source's value
/// type when a plan leaf yields them.
#[derive(Clone)]
pub struct CacheValue(Arc<dyn Any + Send + Sync>);

impl CacheValue {
    /// Wrap a fetched value.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Clone the wrapped value out, if it is a `T`.
    pub fn downcast<T: Clone + 'static>(&self) -> Option<T> {
        self.0.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CacheValue(..)")
    }
}

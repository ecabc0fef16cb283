//! The data-source recipe supplied by users of the engine.

use crate::error::{FetchError, Result};
use crate::identity::{CacheValue, IdentityKey, SourceIdentity};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A named, batched lookup capability.
///
/// A source resolves identities of type [`Id`](DataSource::Id) to values of
/// type [`Value`](DataSource::Value). The engine guarantees that `fetch` is
/// never called with an empty or duplicated id list, and never issues two
/// overlapping calls to the same source instance within a single round.
///
/// A source may resolve only part of the requested ids; an id absent from the
/// returned map fails the run with [`FetchError::MissingIdentity`].
///
/// [`FetchError::MissingIdentity`]: crate::FetchError::MissingIdentity
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
///
/// use async_trait::async_trait;
/// use fetch_plan::DataSource;
///
/// struct Users;
///
/// #[async_trait]
/// impl DataSource for Users {
///     type Id = u32;
///     type Value = String;
///
///     fn name(&self) -> &str {
///         "Users"
///     }
///
///     async fn fetch(&self, ids: Vec<u32>) -> anyhow::Result<HashMap<u32, String>> {
///         Ok(ids.into_iter().map(|id| (id, format!("user-{id}"))).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// The identity type requests are keyed by.
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The value type a resolved identity yields.
    type Value: Clone + Send + Sync + 'static;

    /// Stable name of this source. Two instances with the same name are the
    /// same source for batching and caching purposes.
    fn name(&self) -> &str;

    /// Resolve a deduplicated, non-empty list of identities in one call.
    ///
    /// Expected to be idempotent and free of observable side effects.
    async fn fetch(&self, ids: Vec<Self::Id>) -> anyhow::Result<HashMap<Self::Id, Self::Value>>;

    /// Cache key for one of this source's identities.
    fn identity(&self, id: &Self::Id) -> SourceIdentity {
        SourceIdentity::new(self.name(), IdentityKey::new(id.clone()))
    }
}

/// Object-safe adapter over a [`DataSource`].
///
/// The batch combiner and the interpreter see sources only through this
/// trait; ids and values cross it erased and are downcast back on the typed
/// side of each plan leaf.
pub(crate) trait ErasedSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_erased(
        &self,
        ids: Vec<IdentityKey>,
    ) -> BoxFuture<'_, Result<Vec<(IdentityKey, CacheValue)>>>;
}

impl<S: DataSource> ErasedSource for S {
    fn name(&self) -> &str {
        DataSource::name(self)
    }

    fn fetch_erased(
        &self,
        ids: Vec<IdentityKey>,
    ) -> BoxFuture<'_, Result<Vec<(IdentityKey, CacheValue)>>> {
        Box::pin(async move {
            let typed: Vec<S::Id> = ids
                .iter()
                .map(|key| {
                    key.downcast_ref::<S::Id>().cloned().ok_or_else(|| {
                        FetchError::internal(format!(
                            "identity {key:?} has the wrong type for source '{}'",
                            DataSource::name(self)
                        ))
                    })
                })
                .collect::<Result<_>>()?;

            let fetched = self.fetch(typed).await.map_err(|error| FetchError::Source {
                source_name: DataSource::name(self).to_string(),
                error,
            })?;

            Ok(fetched
                .into_iter()
                .map(|(id, value)| (IdentityKey::new(id), CacheValue::new(value)))
                .collect())
        })
    }
}

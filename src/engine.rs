//! The round interpreter and the engine's entry points.

use crate::batch::{FetchBatch, combine};
use crate::cache::{CacheStore, inserting_all};
use crate::env::{FetchEnv, Round, RoundKind};
use crate::error::{FetchError, Result};
use crate::identity::{CacheValue, IdentityKey, SourceIdentity};
use crate::plan::{Node, Plan};
use crate::source::ErasedSource;
use futures::future::{BoxFuture, try_join_all};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Execute a plan against an initial cache and yield its value.
///
/// # Example
///
/// ```
/// # use std::collections::HashMap;
/// # use std::sync::Arc;
/// # use async_trait::async_trait;
/// # use fetch_plan::{one, run, DataSource, InMemoryCache};
/// # struct Users;
/// # #[async_trait]
/// # impl DataSource for Users {
/// #     type Id = u32;
/// #     type Value = String;
/// #     fn name(&self) -> &str { "Users" }
/// #     async fn fetch(&self, ids: Vec<u32>) -> anyhow::Result<HashMap<u32, String>> {
/// #         Ok(ids.into_iter().map(|id| (id, format!("user-{id}"))).collect())
/// #     }
/// # }
/// # #[tokio::main]
/// # async fn main() -> fetch_plan::Result<()> {
/// let users = Arc::new(Users);
/// let value = run(one(&users, 1), InMemoryCache::empty()).await?;
/// assert_eq!(value, "user-1");
/// # Ok(())
/// # }
/// ```
pub async fn run<A: Send + 'static>(plan: Plan<A>, cache: Arc<dyn CacheStore>) -> Result<A> {
    let (_, value) = run_fetch(plan, cache).await?;
    Ok(value)
}

/// Execute a plan and yield the final environment: the updated cache and the
/// chronological round log.
pub async fn run_env<A: Send + 'static>(
    plan: Plan<A>,
    cache: Arc<dyn CacheStore>,
) -> Result<FetchEnv> {
    let (env, _) = run_fetch(plan, cache).await?;
    Ok(env)
}

/// Execute a plan and yield both the final environment and its value.
pub async fn run_fetch<A: Send + 'static>(
    plan: Plan<A>,
    cache: Arc<dyn CacheStore>,
) -> Result<(FetchEnv, A)> {
    let mut interp = Interpreter::new(FetchEnv::new(cache));
    let value = interp.execute(plan).await?;
    Ok((interp.env, value))
}

/// State machine over the environment. Walks the plan in one logical thread;
/// concurrency happens only at concurrent-round dispatch.
pub(crate) struct Interpreter {
    env: FetchEnv,
}

impl Interpreter {
    fn new(env: FetchEnv) -> Self {
        Self { env }
    }

    pub(crate) fn env(&self) -> &FetchEnv {
        &self.env
    }

    pub(crate) fn execute<'a, A: Send + 'static>(
        &'a mut self,
        plan: Plan<A>,
    ) -> BoxFuture<'a, Result<A>> {
        Box::pin(async move {
            match plan.node {
                Node::Pure(a) | Node::Inlined(a) => Ok(a),
                Node::Fail(e) => Err(e),
                Node::One { source, id, decode } => {
                    let value = self.fetch_single(source, id).await?;
                    decode(value)
                }
                Node::Many { source, ids, decode } => {
                    let values = self.fetch_many(source, ids).await?;
                    decode(values)
                }
                Node::Concurrent { batches, done } => {
                    self.concurrent_round(combine(batches)).await?;
                    Ok(done(self.env.clone()))
                }
                Node::Sequence(seq) => seq.execute(self).await,
                Node::Joined(joined) => joined.execute(self).await,
            }
        })
    }

    /// Resolve one identity: answer from cache, or fetch and cache it.
    async fn fetch_single(
        &mut self,
        source: Arc<dyn ErasedSource>,
        id: IdentityKey,
    ) -> Result<CacheValue> {
        let identity = SourceIdentity::new(source.name(), id.clone());
        let pre = Arc::clone(self.env.cache());
        let started = Instant::now();

        if let Some(value) = pre.get(&identity) {
            trace!("cache hit for {:?}", identity);
            self.env.push_round(Round::new(
                pre,
                RoundKind::Single { identity },
                started,
                Instant::now(),
                true,
            ));
            return Ok(value);
        }

        debug!("fetching {:?}", identity);
        let response = source.fetch_erased(vec![id.clone()]).await?;
        let ended = Instant::now();

        let mut value = None;
        let mut entries = Vec::with_capacity(response.len());
        for (fetched_id, fetched) in response {
            if fetched_id == id {
                value = Some(fetched.clone());
            }
            entries.push((SourceIdentity::new(source.name(), fetched_id), fetched));
        }

        match value {
            Some(value) => {
                self.env.set_cache(inserting_all(pre.clone(), entries));
                self.env.set_last_fetched(vec![identity.clone()]);
                self.env.push_round(Round::new(
                    pre,
                    RoundKind::Single { identity },
                    started,
                    ended,
                    false,
                ));
                Ok(value)
            }
            None => {
                // The attempted round goes on the log; the cache stays as it
                // was before the failed lookup.
                self.env.push_round(Round::new(
                    pre,
                    RoundKind::Single {
                        identity: identity.clone(),
                    },
                    started,
                    ended,
                    false,
                ));
                Err(FetchError::MissingIdentity {
                    source_name: source.name().to_string(),
                    identities: vec![identity],
                    env: Box::new(self.env.clone()),
                })
            }
        }
    }

    /// Resolve a batch against one source, yielding values in input order.
    async fn fetch_many(
        &mut self,
        source: Arc<dyn ErasedSource>,
        ids: Vec<IdentityKey>,
    ) -> Result<Vec<CacheValue>> {
        let identity_of =
            |id: &IdentityKey| SourceIdentity::new(source.name(), id.clone());

        let mut unique: Vec<IdentityKey> = Vec::new();
        let mut seen: HashSet<IdentityKey> = HashSet::new();
        for id in &ids {
            if seen.insert(id.clone()) {
                unique.push(id.clone());
            }
        }

        let pre = Arc::clone(self.env.cache());
        let started = Instant::now();
        let misses: Vec<IdentityKey> = unique
            .iter()
            .filter(|id| pre.get(&identity_of(id)).is_none())
            .cloned()
            .collect();

        if misses.is_empty() {
            let values = ids
                .iter()
                .map(|id| {
                    pre.get(&identity_of(id)).ok_or_else(|| {
                        FetchError::internal(format!("cache dropped {:?}", identity_of(id)))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.env.push_round(Round::new(
                pre,
                RoundKind::Many {
                    identities: unique.iter().map(&identity_of).collect(),
                },
                started,
                Instant::now(),
                true,
            ));
            return Ok(values);
        }

        debug!("fetching {} of {} ids from '{}'", misses.len(), unique.len(), source.name());
        let response = source.fetch_erased(misses.clone()).await?;
        let ended = Instant::now();

        let cache = inserting_all(
            Arc::clone(&pre),
            response
                .into_iter()
                .map(|(id, value)| (identity_of(&id), value)),
        );

        let missing: Vec<SourceIdentity> = unique
            .iter()
            .map(&identity_of)
            .filter(|identity| cache.get(identity).is_none())
            .collect();

        let fetched: Vec<SourceIdentity> = misses.iter().map(&identity_of).collect();
        // The original bookkeeping: "cached" when the fetched set had no
        // overlap with the pre-existing cache.
        let cached = unique.len() == misses.len();
        let round = Round::new(
            Arc::clone(&pre),
            RoundKind::Many {
                identities: fetched.clone(),
            },
            started,
            ended,
            cached,
        );

        if missing.is_empty() {
            self.env.set_cache(Arc::clone(&cache));
            self.env.set_last_fetched(fetched);
            self.env.push_round(round);
            ids.iter()
                .map(|id| {
                    cache.get(&identity_of(id)).ok_or_else(|| {
                        FetchError::internal(format!("cache dropped {:?}", identity_of(id)))
                    })
                })
                .collect()
        } else {
            self.env.push_round(round);
            Err(FetchError::MissingIdentity {
                source_name: source.name().to_string(),
                identities: missing,
                env: Box::new(self.env.clone()),
            })
        }
    }

    /// Dispatch one concurrent round over pre-combined batches.
    ///
    /// Batches whose identities are all cached are dropped; when nothing
    /// remains, no round is logged. Responses are folded into the cache in
    /// dispatch order.
    async fn concurrent_round(&mut self, batches: Vec<FetchBatch>) -> Result<()> {
        let pre = Arc::clone(self.env.cache());

        let mut pending: Vec<FetchBatch> = Vec::new();
        for batch in batches {
            let misses: Vec<IdentityKey> = batch
                .ids
                .iter()
                .filter(|id| pre.get(&batch.identity(id)).is_none())
                .cloned()
                .collect();
            if !misses.is_empty() {
                pending.push(FetchBatch {
                    source: batch.source,
                    ids: misses,
                });
            }
        }

        if pending.is_empty() {
            trace!("round fully answered by cache, nothing to dispatch");
            return Ok(());
        }

        debug!("dispatching concurrent round over {} sources", pending.len());
        let started = Instant::now();
        let futures: Vec<_> = pending
            .iter()
            .map(|batch| batch.source.fetch_erased(batch.ids.clone()))
            .collect();
        let responses = try_join_all(futures).await?;
        let ended = Instant::now();

        let mut cache = Arc::clone(&pre);
        for (batch, response) in pending.iter().zip(responses) {
            cache = inserting_all(
                cache,
                response
                    .into_iter()
                    .map(|(id, value)| (batch.identity(&id), value)),
            );
        }

        let mut missing: Vec<SourceIdentity> = Vec::new();
        let mut missing_source: Option<String> = None;
        let mut fetched: Vec<SourceIdentity> = Vec::new();
        let mut round_batches: Vec<(String, Vec<SourceIdentity>)> = Vec::new();
        for batch in &pending {
            let identities: Vec<SourceIdentity> =
                batch.ids.iter().map(|id| batch.identity(id)).collect();
            for identity in &identities {
                if cache.get(identity).is_none() {
                    missing_source.get_or_insert_with(|| batch.name().to_string());
                    missing.push(identity.clone());
                }
            }
            fetched.extend(identities.iter().cloned());
            round_batches.push((batch.name().to_string(), identities));
        }

        let round = Round::new(
            pre,
            RoundKind::Concurrent {
                batches: round_batches,
            },
            started,
            ended,
            false,
        );

        if missing.is_empty() {
            self.env.set_cache(cache);
            self.env.set_last_fetched(fetched);
            self.env.push_round(round);
            Ok(())
        } else {
            // Keep what the round did integrate; the caller gets the state
            // at the point of failure.
            self.env.set_cache(cache);
            self.env.push_round(round);
            Err(FetchError::MissingIdentity {
                source_name: missing_source.unwrap_or_default(),
                identities: missing,
                env: Box::new(self.env.clone()),
            })
        }
    }
}

//! The plan algebra: composable descriptions of fetch computations.
//!
//! A [`Plan`] is a pure value describing what to fetch and how to combine the
//! results. Nothing happens until it is handed to [`run`](crate::run); the
//! interpreter then rewrites the tree round by round, substituting cache hits
//! and batching independent requests, without changing the observable result.

use crate::batch::{FetchBatch, combine};
use crate::engine::Interpreter;
use crate::env::FetchEnv;
use crate::error::{FetchError, Result};
use crate::identity::{CacheValue, IdentityKey, SourceIdentity};
use crate::source::{DataSource, ErasedSource};
use futures::future::BoxFuture;
use std::sync::Arc;

/// A composable, pure description of a fetch computation yielding an `A`.
///
/// Build leaves with [`Plan::pure`], [`Plan::fail`], [`one`], and [`many`];
/// compose them with [`map`](Plan::map), [`flat_map`](Plan::flat_map),
/// [`join`](Plan::join), [`map2`](Plan::map2), [`collect`], and
/// [`traverse`]. `join` is the sole source of concurrency: independent
/// fetches on its two sides resolve in a single round.
pub struct Plan<A> {
    pub(crate) node: Node<A>,
}

pub(crate) enum Node<A> {
    /// Yields a value with no fetch.
    Pure(A),
    /// A value already retrieved from cache by the simplifier. Behaves as
    /// `Pure` during execution but marks resolved demand during extraction.
    Inlined(A),
    /// Fails the run.
    Fail(FetchError),
    /// Fetch one identity from one source.
    One {
        source: Arc<dyn ErasedSource>,
        id: IdentityKey,
        decode: Box<dyn FnOnce(CacheValue) -> Result<A> + Send>,
    },
    /// Fetch a list of identities from one source, yielding input order.
    Many {
        source: Arc<dyn ErasedSource>,
        ids: Vec<IdentityKey>,
        decode: Box<dyn FnOnce(Vec<CacheValue>) -> Result<A> + Send>,
    },
    /// Dispatch batches against possibly-different sources in one round,
    /// yielding the updated environment.
    Concurrent {
        batches: Vec<FetchBatch>,
        done: Box<dyn FnOnce(FetchEnv) -> A + Send>,
    },
    /// Monadic sequencing; the intermediate type is erased behind the trait.
    Sequence(Box<dyn Sequenced<A>>),
    /// Two-sided concurrent composition; side types erased behind the trait.
    Joined(Box<dyn Joinable<A>>),
}

impl<A: Send + 'static> Plan<A> {
    pub(crate) fn from_node(node: Node<A>) -> Self {
        Self { node }
    }

    /// A plan that yields `value` without fetching.
    pub fn pure(value: A) -> Self {
        Self::from_node(Node::Pure(value))
    }

    /// A plan that fails the run with the given error, surfaced unchanged.
    pub fn fail(error: impl Into<anyhow::Error>) -> Self {
        Self::from_node(Node::Fail(FetchError::User(error.into())))
    }

    /// Transform the yielded value.
    pub fn map<B, F>(self, f: F) -> Plan<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        match self.node {
            Node::Pure(a) => Plan::from_node(Node::Pure(f(a))),
            Node::Inlined(a) => Plan::from_node(Node::Inlined(f(a))),
            Node::Fail(e) => Plan::from_node(Node::Fail(e)),
            Node::One { source, id, decode } => Plan::from_node(Node::One {
                source,
                id,
                decode: Box::new(move |value| decode(value).map(f)),
            }),
            Node::Many { source, ids, decode } => Plan::from_node(Node::Many {
                source,
                ids,
                decode: Box::new(move |values| decode(values).map(f)),
            }),
            Node::Concurrent { batches, done } => Plan::from_node(Node::Concurrent {
                batches,
                done: Box::new(move |env| f(done(env))),
            }),
            node => Plan::from_node(node).flat_map(move |a| Plan::pure(f(a))),
        }
    }

    /// Sequence another plan after this one.
    ///
    /// The continuation runs once this plan's value is known, so fetches on
    /// the two sides of a `flat_map` can never share a round.
    pub fn flat_map<B, F>(self, f: F) -> Plan<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Plan<B> + Send + 'static,
    {
        match self.node {
            Node::Pure(a) | Node::Inlined(a) => f(a),
            Node::Fail(e) => Plan::from_node(Node::Fail(e)),
            node => Plan::from_node(Node::Sequence(Box::new(SequenceNode {
                head: Plan::from_node(node),
                cont: Box::new(f),
            }))),
        }
    }

    /// Pair this plan with another, resolving both under shared rounds.
    ///
    /// Independent fetches on the two sides are batched together; fetches
    /// against the same source collapse into one call.
    pub fn join<B: Send + 'static>(self, other: Plan<B>) -> Plan<(A, B)> {
        self.map2(other, |a, b| (a, b))
    }

    /// Combine this plan with another through `f`, resolving both under
    /// shared rounds as [`join`](Plan::join) does.
    pub fn map2<B, C, F>(self, other: Plan<B>, f: F) -> Plan<C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        Plan::from_node(Node::Joined(Box::new(JoinNode {
            left: self,
            right: other,
            merge: Box::new(f),
        })))
    }

    /// Collect the outstanding wavefront of source requests: every fetch
    /// leaf that gates the next interpretation step. Continuations of
    /// unresolved fetches do not contribute.
    pub(crate) fn push_deps(&self, out: &mut Vec<FetchBatch>) {
        match &self.node {
            Node::One { source, id, .. } => out.push(FetchBatch {
                source: Arc::clone(source),
                ids: vec![id.clone()],
            }),
            Node::Many { source, ids, .. } => out.push(FetchBatch {
                source: Arc::clone(source),
                ids: ids.clone(),
            }),
            Node::Concurrent { batches, .. } => out.extend(batches.iter().cloned()),
            Node::Sequence(seq) => seq.push_deps(out),
            Node::Joined(joined) => joined.push_deps(out),
            Node::Pure(_) | Node::Inlined(_) | Node::Fail(_) => {}
        }
    }

    #[cfg(test)]
    pub(crate) fn dependencies(&self) -> Vec<FetchBatch> {
        let mut out = Vec::new();
        self.push_deps(&mut out);
        out
    }

    /// Rewrite this plan against the environment's cache snapshot.
    ///
    /// Fully-resolved fetch leaves become [`Node::Inlined`] values; partially
    /// cached batches stay intact (the interpreter filters per id, in one
    /// place). Sequencing collapses through resolved heads so that a
    /// subsequent extraction sees exactly the remaining demand.
    pub(crate) fn simplify(self, env: &FetchEnv) -> Plan<A> {
        match self.node {
            Node::One { source, id, decode } => {
                let identity = SourceIdentity::new(source.name(), id.clone());
                match env.cache().get(&identity) {
                    Some(value) => match decode(value) {
                        Ok(a) => Plan::from_node(Node::Inlined(a)),
                        Err(e) => Plan::from_node(Node::Fail(e)),
                    },
                    None => Plan::from_node(Node::One { source, id, decode }),
                }
            }
            Node::Many { source, ids, decode } => {
                let mut values = Vec::with_capacity(ids.len());
                for id in &ids {
                    match env
                        .cache()
                        .get(&SourceIdentity::new(source.name(), id.clone()))
                    {
                        Some(value) => values.push(value),
                        None => break,
                    }
                }
                if values.len() < ids.len() {
                    Plan::from_node(Node::Many { source, ids, decode })
                } else {
                    match decode(values) {
                        Ok(a) => Plan::from_node(Node::Inlined(a)),
                        Err(e) => Plan::from_node(Node::Fail(e)),
                    }
                }
            }
            Node::Concurrent { batches, done } => {
                let remaining: Vec<FetchBatch> = batches
                    .into_iter()
                    .filter(|batch| {
                        batch
                            .ids
                            .iter()
                            .any(|id| env.cache().get(&batch.identity(id)).is_none())
                    })
                    .collect();
                if remaining.is_empty() {
                    Plan::from_node(Node::Inlined(done(env.clone())))
                } else {
                    Plan::from_node(Node::Concurrent {
                        batches: remaining,
                        done,
                    })
                }
            }
            Node::Sequence(seq) => seq.simplify(env),
            Node::Joined(joined) => joined.simplify(env),
            leaf => Plan::from_node(leaf),
        }
    }
}

impl Plan<FetchEnv> {
    /// Lift combined batches into a concurrent leaf yielding the environment
    /// after the round. Used by the join loop; not part of the public API.
    pub(crate) fn concurrent(batches: Vec<FetchBatch>) -> Self {
        Plan::from_node(Node::Concurrent {
            batches,
            done: Box::new(|env| env),
        })
    }
}

/// A plan fetching one identity from `source`.
pub fn one<S: DataSource>(source: &Arc<S>, id: S::Id) -> Plan<S::Value> {
    let name = DataSource::name(source.as_ref()).to_string();
    Plan::from_node(Node::One {
        source: Arc::clone(source) as Arc<dyn ErasedSource>,
        id: IdentityKey::new(id),
        decode: Box::new(move |value| {
            value.downcast::<S::Value>().ok_or_else(|| {
                FetchError::internal(format!("cached value for source '{name}' has an unexpected type"))
            })
        }),
    })
}

/// A plan fetching a list of identities from `source`, yielding values in
/// input order (duplicates included).
pub fn many<S: DataSource>(source: &Arc<S>, ids: Vec<S::Id>) -> Plan<Vec<S::Value>> {
    if ids.is_empty() {
        return Plan::pure(Vec::new());
    }
    let name = DataSource::name(source.as_ref()).to_string();
    Plan::from_node(Node::Many {
        source: Arc::clone(source) as Arc<dyn ErasedSource>,
        ids: ids.into_iter().map(IdentityKey::new).collect(),
        decode: Box::new(move |values| {
            values
                .into_iter()
                .map(|value| {
                    value.downcast::<S::Value>().ok_or_else(|| {
                        FetchError::internal(format!(
                            "cached value for source '{name}' has an unexpected type"
                        ))
                    })
                })
                .collect()
        }),
    })
}

/// Resolve a list of plans together, yielding their values in order.
///
/// Equivalent to a left fold of pairwise [`join`](Plan::join), so a list of
/// `n` independent fetches resolves in one concurrent round.
pub fn collect<A: Send + 'static>(plans: Vec<Plan<A>>) -> Plan<Vec<A>> {
    plans
        .into_iter()
        .fold(Plan::pure(Vec::new()), |acc, plan| {
            acc.map2(plan, |mut values, value| {
                values.push(value);
                values
            })
        })
}

/// Map each item to a plan and resolve them together: `collect(items.map(f))`.
pub fn traverse<T, A, F>(items: Vec<T>, f: F) -> Plan<Vec<A>>
where
    A: Send + 'static,
    F: FnMut(T) -> Plan<A>,
{
    collect(items.into_iter().map(f).collect())
}

pub(crate) trait Sequenced<A>: Send {
    fn push_deps(&self, out: &mut Vec<FetchBatch>);
    fn simplify(self: Box<Self>, env: &FetchEnv) -> Plan<A>;
    fn execute<'a>(self: Box<Self>, interp: &'a mut Interpreter) -> BoxFuture<'a, Result<A>>;
}

struct SequenceNode<B, A> {
    head: Plan<B>,
    cont: Box<dyn FnOnce(B) -> Plan<A> + Send>,
}

impl<B, A> Sequenced<A> for SequenceNode<B, A>
where
    B: Send + 'static,
    A: Send + 'static,
{
    fn push_deps(&self, out: &mut Vec<FetchBatch>) {
        self.head.push_deps(out);
    }

    fn simplify(self: Box<Self>, env: &FetchEnv) -> Plan<A> {
        let SequenceNode { head, cont } = *self;
        match head.simplify(env).node {
            // The head's value is known, so the continuation's demand is the
            // plan's demand now.
            Node::Pure(b) | Node::Inlined(b) => cont(b).simplify(env),
            Node::Fail(e) => Plan::from_node(Node::Fail(e)),
            node => Plan::from_node(Node::Sequence(Box::new(SequenceNode {
                head: Plan::from_node(node),
                cont,
            }))),
        }
    }

    fn execute<'a>(self: Box<Self>, interp: &'a mut Interpreter) -> BoxFuture<'a, Result<A>> {
        Box::pin(async move {
            let SequenceNode { head, cont } = *self;
            let value = interp.execute(head).await?;
            interp.execute(cont(value)).await
        })
    }
}

pub(crate) trait Joinable<A>: Send {
    fn push_deps(&self, out: &mut Vec<FetchBatch>);
    fn simplify(self: Box<Self>, env: &FetchEnv) -> Plan<A>;
    fn execute<'a>(self: Box<Self>, interp: &'a mut Interpreter) -> BoxFuture<'a, Result<A>>;
}

struct JoinNode<B, C, A> {
    left: Plan<B>,
    right: Plan<C>,
    merge: Box<dyn FnOnce(B, C) -> A + Send>,
}

impl<B, C, A> Joinable<A> for JoinNode<B, C, A>
where
    B: Send + 'static,
    C: Send + 'static,
    A: Send + 'static,
{
    fn push_deps(&self, out: &mut Vec<FetchBatch>) {
        self.left.push_deps(out);
        self.right.push_deps(out);
    }

    fn simplify(self: Box<Self>, env: &FetchEnv) -> Plan<A> {
        let JoinNode { left, right, merge } = *self;
        let left = left.simplify(env);
        let right = right.simplify(env);
        match (left.node, right.node) {
            (Node::Fail(e), _) | (_, Node::Fail(e)) => Plan::from_node(Node::Fail(e)),
            (Node::Pure(b) | Node::Inlined(b), Node::Pure(c) | Node::Inlined(c)) => {
                Plan::from_node(Node::Pure(merge(b, c)))
            }
            (left, right) => Plan::from_node(Node::Joined(Box::new(JoinNode {
                left: Plan::from_node(left),
                right: Plan::from_node(right),
                merge,
            }))),
        }
    }

    fn execute<'a>(self: Box<Self>, interp: &'a mut Interpreter) -> BoxFuture<'a, Result<A>> {
        Box::pin(async move {
            let JoinNode {
                mut left,
                mut right,
                merge,
            } = *self;

            // One concurrent round per iteration. Each round fills at least
            // one missing identity (or fails), and plans are finite, so the
            // remaining-dependency count strictly decreases.
            loop {
                left = left.simplify(interp.env());
                right = right.simplify(interp.env());

                let mut deps = Vec::new();
                left.push_deps(&mut deps);
                right.push_deps(&mut deps);

                if deps.is_empty() {
                    let b = interp.execute(left).await?;
                    let c = interp.execute(right).await?;
                    return Ok(merge(b, c));
                }

                interp.execute(Plan::concurrent(combine(deps))).await?;
            }
        })
    }
}

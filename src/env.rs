//! The environment threaded through interpretation: cache plus round log.

use crate::cache::CacheStore;
use crate::identity::SourceIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What one round consulted, per round shape.
#[derive(Clone, Debug)]
pub enum RoundKind {
    /// One identity against one source.
    Single {
        /// The identity consulted
        identity: SourceIdentity,
    },
    /// A batch of identities against one source.
    Many {
        /// The identities consulted, deduplicated
        identities: Vec<SourceIdentity>,
    },
    /// Batches against possibly-different sources, dispatched in parallel.
    Concurrent {
        /// Fetched identities per source name, in dispatch order
        batches: Vec<(String, Vec<SourceIdentity>)>,
    },
}

impl RoundKind {
    /// Short label for logs and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Single { .. } => "single",
            Self::Many { .. } => "many",
            Self::Concurrent { .. } => "concurrent",
        }
    }

    /// Names of the sources this round consulted.
    pub fn sources(&self) -> Vec<&str> {
        match self {
            Self::Single { identity } => vec![identity.source()],
            Self::Many { identities } => identities
                .first()
                .map(|identity| vec![identity.source()])
                .unwrap_or_default(),
            Self::Concurrent { batches } => {
                batches.iter().map(|(name, _)| name.as_str()).collect()
            }
        }
    }

    /// Every identity this round consulted.
    pub fn identities(&self) -> Vec<&SourceIdentity> {
        match self {
            Self::Single { identity } => vec![identity],
            Self::Many { identities } => identities.iter().collect(),
            Self::Concurrent { batches } => {
                batches.iter().flat_map(|(_, ids)| ids.iter()).collect()
            }
        }
    }
}

/// A record of one act of consulting sources.
#[derive(Clone, Debug)]
pub struct Round {
    cache: Arc<dyn CacheStore>,
    kind: RoundKind,
    started: Instant,
    ended: Instant,
    cached: bool,
}

impl Round {
    pub(crate) fn new(
        cache: Arc<dyn CacheStore>,
        kind: RoundKind,
        started: Instant,
        ended: Instant,
        cached: bool,
    ) -> Self {
        Self {
            cache,
            kind,
            started,
            ended,
            cached,
        }
    }

    /// The cache snapshot observed when the round started.
    pub fn pre_cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// What this round consulted.
    pub fn kind(&self) -> &RoundKind {
        &self.kind
    }

    /// When the round started.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// When the round ended.
    pub fn ended(&self) -> Instant {
        self.ended
    }

    /// How long the round took.
    pub fn duration(&self) -> Duration {
        self.ended.saturating_duration_since(self.started)
    }

    /// Whether the round was answered without an outbound call.
    ///
    /// For batch rounds this flag is also set when the fetched id set had no
    /// overlap with the pre-round cache; that bookkeeping is kept as-is.
    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

/// Immutable-style snapshot of interpretation state: the current cache, the
/// chronological round log, and the identities the latest round fetched.
///
/// The log is for observability only; the engine never consults it.
#[derive(Clone, Debug)]
pub struct FetchEnv {
    cache: Arc<dyn CacheStore>,
    rounds: Vec<Round>,
    latest: Vec<SourceIdentity>,
    started_wall: DateTime<Utc>,
    started_instant: Instant,
}

impl FetchEnv {
    /// Create an environment over an initial cache.
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self {
            cache,
            rounds: Vec::new(),
            latest: Vec::new(),
            started_wall: Utc::now(),
            started_instant: Instant::now(),
        }
    }

    /// The current cache snapshot.
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// The rounds performed so far, oldest first.
    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// The identities fetched by the most recent uncached round.
    pub fn last_fetched(&self) -> &[SourceIdentity] {
        &self.latest
    }

    /// Wall-clock time the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_wall
    }

    pub(crate) fn set_cache(&mut self, cache: Arc<dyn CacheStore>) {
        self.cache = cache;
    }

    pub(crate) fn push_round(&mut self, round: Round) {
        self.rounds.push(round);
    }

    pub(crate) fn set_last_fetched(&mut self, identities: Vec<SourceIdentity>) {
        self.latest = identities;
    }

    fn wall_time(&self, instant: Instant) -> DateTime<Utc> {
        let offset = instant.saturating_duration_since(self.started_instant);
        self.started_wall
            + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Derive a serializable summary of the run: per-round timings, batch
    /// sizes, and cache behavior.
    pub fn summary(&self) -> ExecutionSummary {
        let rounds: Vec<RoundSummary> = self
            .rounds
            .iter()
            .map(|round| RoundSummary {
                kind: round.kind().label().to_string(),
                sources: round
                    .kind()
                    .sources()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                identities: round
                    .kind()
                    .identities()
                    .into_iter()
                    .map(|identity| format!("{identity:?}"))
                    .collect(),
                started_at: self.wall_time(round.started()),
                duration_ms: round.duration().as_secs_f64() * 1000.0,
                cached: round.is_cached(),
            })
            .collect();

        let total_duration_ms = self
            .rounds
            .last()
            .map(|round| {
                round
                    .ended()
                    .saturating_duration_since(self.started_instant)
                    .as_secs_f64()
                    * 1000.0
            })
            .unwrap_or(0.0);

        ExecutionSummary {
            started_at: self.started_wall,
            total_duration_ms,
            rounds,
        }
    }
}

/// Serializable report over a run's round log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ExecutionSummary {
    /// Wall-clock time the run started
    pub started_at: DateTime<Utc>,
    /// Milliseconds from run start to the end of the last round
    pub total_duration_ms: f64,
    /// One entry per round, oldest first
    pub rounds: Vec<RoundSummary>,
}

impl ExecutionSummary {
    /// Number of rounds performed.
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// Number of rounds whose `cached` flag was set.
    pub fn cached_round_count(&self) -> usize {
        self.rounds.iter().filter(|round| round.cached).count()
    }

    /// Total identities consulted across all rounds.
    pub fn identity_count(&self) -> usize {
        self.rounds.iter().map(|round| round.identities.len()).sum()
    }

    /// Render as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// One round within an [`ExecutionSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RoundSummary {
    /// Round shape: `"single"`, `"many"`, or `"concurrent"`
    pub kind: String,
    /// Names of the sources consulted
    pub sources: Vec<String>,
    /// Identities consulted, rendered for display
    pub identities: Vec<String>,
    /// Wall-clock start of the round
    pub started_at: DateTime<Utc>,
    /// Round duration in milliseconds
    pub duration_ms: f64,
    /// The round's cached flag, as recorded
    pub cached: bool,
}

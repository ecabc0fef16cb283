//! Combining per-source requests into deduplicated batches.

use crate::identity::{IdentityKey, SourceIdentity};
use crate::source::ErasedSource;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One source's outstanding identities within a round.
#[derive(Clone)]
pub(crate) struct FetchBatch {
    pub(crate) source: Arc<dyn ErasedSource>,
    pub(crate) ids: Vec<IdentityKey>,
}

impl FetchBatch {
    pub(crate) fn name(&self) -> &str {
        self.source.name()
    }

    pub(crate) fn identity(&self, id: &IdentityKey) -> SourceIdentity {
        SourceIdentity::new(self.source.name(), id.clone())
    }
}

/// Merge per-source requests into one batch per distinct source name.
///
/// Id lists are concatenated with duplicate identities removed; both batch
/// order and id order follow first appearance in the input.
pub(crate) fn combine(batches: Vec<FetchBatch>) -> Vec<FetchBatch> {
    let mut combined: Vec<FetchBatch> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<SourceIdentity> = HashSet::new();

    for FetchBatch { source, ids } in batches {
        let slot = match index.get(source.name()) {
            Some(&slot) => slot,
            None => {
                index.insert(source.name().to_string(), combined.len());
                combined.push(FetchBatch {
                    source: Arc::clone(&source),
                    ids: Vec::new(),
                });
                combined.len() - 1
            }
        };

        for id in ids {
            let identity = SourceIdentity::new(source.name(), id.clone());
            if seen.insert(identity) {
                combined[slot].ids.push(id);
            }
        }
    }

    combined
}

//! Shared test fixtures: in-memory sources that record every batch the
//! engine passes to `fetch`.

#![allow(dead_code)]

use async_trait::async_trait;
use fetch_plan::DataSource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A source over a fixed table that counts calls and records id batches.
pub struct RecordingSource {
    name: String,
    data: HashMap<u32, String>,
    calls: AtomicUsize,
    batches: Mutex<Vec<Vec<u32>>>,
}

impl RecordingSource {
    pub fn new(name: &str, entries: &[(u32, &str)]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            data: entries
                .iter()
                .map(|(id, value)| (*id, value.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        })
    }

    /// Number of times `fetch` was called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every id list passed to `fetch`, in call order.
    pub fn batches(&self) -> Vec<Vec<u32>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for RecordingSource {
    type Id = u32;
    type Value = String;

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ids: Vec<u32>) -> anyhow::Result<HashMap<u32, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().unwrap().push(ids.clone());
        Ok(ids
            .into_iter()
            .filter_map(|id| self.data.get(&id).map(|value| (id, value.clone())))
            .collect())
    }
}

/// A source whose fetch effect always fails.
pub struct FailingSource;

#[async_trait]
impl DataSource for FailingSource {
    type Id = u32;
    type Value = String;

    fn name(&self) -> &str {
        "Flaky"
    }

    async fn fetch(&self, _ids: Vec<u32>) -> anyhow::Result<HashMap<u32, String>> {
        Err(anyhow::anyhow!("connection reset"))
    }
}

pub fn users() -> Arc<RecordingSource> {
    RecordingSource::new("Users", &[(1, "a"), (2, "b"), (3, "c")])
}

pub fn posts() -> Arc<RecordingSource> {
    RecordingSource::new("Posts", &[(10, "x"), (20, "y")])
}

//! Shared test doubles: scripted provider, scripted store, and a recording
//! dispatcher so tests drive the job state machine by hand.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pixelforge::catalog::ModelCatalog;
use pixelforge::config::RetryConfig;
use pixelforge::db::Db;
use pixelforge::error::{AppError, Result};
use pixelforge::model::{JobId, User, UserId};
use pixelforge::orchestrator::Orchestrator;
use pixelforge::provider::{GenerateRequest, ImageProvider, ProducedImage};
use pixelforge::scheduler::{Dispatch, ScheduledRun};
use pixelforge::storage::{ArtifactStore, StoredObject};

/// PNG magic followed by padding up to the requested size
pub fn png_image(size: usize, seed: Option<i64>) -> ProducedImage {
    let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.resize(size.max(8), 0);
    ProducedImage {
        bytes,
        content_type: "image/png".to_string(),
        seed,
    }
}

/// Provider that replays a fixed script of responses, one per generate call.
/// An exhausted script fails the test loudly.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Vec<ProducedImage>>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Vec<ProducedImage>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always succeed with `images`
    pub fn always(images: Vec<ProducedImage>) -> Self {
        let script = (0..16).map(|_| Ok(images.clone())).collect();
        Self::new(script)
    }

    /// Always fail with a provider-unavailable error
    pub fn always_unavailable() -> Self {
        let script = (0..16)
            .map(|_| Err(AppError::ProviderUnavailable("provider offline".into())))
            .collect();
        Self::new(script)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<Vec<ProducedImage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("scripted provider exhausted"))
    }
}

/// In-memory artifact store that can be told to fail specific put calls
/// (0-indexed by call order)
pub struct ScriptedStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_calls: HashSet<usize>,
    calls: AtomicUsize,
    yield_in_put: bool,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::failing_on([])
    }

    pub fn failing_on(calls: impl IntoIterator<Item = usize>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_calls: calls.into_iter().collect(),
            calls: AtomicUsize::new(0),
            yield_in_put: false,
        }
    }

    /// A store whose put suspends mid-flight, letting concurrent uploads
    /// interleave around the await point
    pub fn yielding() -> Self {
        Self {
            yield_in_put: true,
            ..Self::new()
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

#[async_trait]
impl ArtifactStore for ScriptedStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<StoredObject> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.yield_in_put {
            tokio::task::yield_now().await;
        }
        if self.fail_calls.contains(&call) {
            return Err(AppError::Upload("injected store failure".into()));
        }
        self.objects.lock().insert(key.to_string(), bytes.to_vec());
        Ok(StoredObject {
            key: key.to_string(),
            public_url: format!("http://cdn.test/{}", key),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().remove(key);
        Ok(())
    }
}

/// Captures scheduled runs instead of executing them, so tests control when
/// and whether each state-machine step happens
#[derive(Default)]
pub struct RecordingDispatcher {
    runs: Mutex<VecDeque<ScheduledRun>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<ScheduledRun> {
        self.runs.lock().pop_front()
    }

    pub fn pending(&self) -> usize {
        self.runs.lock().len()
    }
}

impl Dispatch for RecordingDispatcher {
    fn dispatch(&self, job_id: JobId, attempt: u32, delay: Duration) {
        self.runs.lock().push_back(ScheduledRun {
            job_id,
            attempt,
            delay,
        });
    }
}

pub struct Harness {
    pub db: Arc<Db>,
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub user_id: UserId,
}

impl Harness {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        store: Arc<dyn ArtifactStore>,
        credits: u64,
    ) -> Self {
        let db = Arc::new(Db::new());
        let mut user = User::new("user_test".to_string(), "test@example.com".to_string());
        user.credits = credits;
        let user_id = db.insert_user(user);

        let dispatcher = Arc::new(RecordingDispatcher::new());
        let orchestrator = Arc::new(Orchestrator::new(
            db.clone(),
            ModelCatalog::builtin(),
            provider,
            store,
            dispatcher.clone(),
            RetryConfig::default(),
        ));

        Self {
            db,
            orchestrator,
            dispatcher,
            user_id,
        }
    }

    /// Run every queued state-machine step to quiescence, returning the
    /// observed backoff delays
    pub async fn run_to_completion(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        while let Some(run) = self.dispatcher.pop() {
            delays.push(run.delay);
            self.orchestrator
                .advance(run.job_id, run.attempt)
                .await
                .expect("advance failed");
        }
        delays
    }

    pub fn credits(&self) -> u64 {
        self.db.get_user(self.user_id).expect("user").credits
    }

    pub fn storage_used(&self) -> u64 {
        self.db
            .get_user(self.user_id)
            .expect("user")
            .storage_used_bytes
    }
}

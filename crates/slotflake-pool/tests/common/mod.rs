#![allow(dead_code)]

use parking_lot::Mutex;
use slotflake_pool::{
    Connector, CoordinationError, CoordinationResult, Coordinator, MemoryEnsemble, MemorySession,
    provision,
};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness. `RUST_LOG=debug` shows
/// the claim protocol step by step.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_test_writer()
        .try_init();
}

/// Opens in-memory sessions and keeps a handle to each so tests can
/// disconnect or expire them.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    ensemble: MemoryEnsemble,
    sessions: Arc<Mutex<Vec<Arc<MemorySession>>>>,
}

impl RecordingConnector {
    pub fn new(ensemble: MemoryEnsemble) -> Self {
        Self {
            ensemble,
            sessions: Arc::default(),
        }
    }

    pub fn sessions(&self) -> Vec<Arc<MemorySession>> {
        self.sessions.lock().clone()
    }

    pub fn only_session(&self) -> Arc<MemorySession> {
        let sessions = self.sessions();
        assert_eq!(sessions.len(), 1, "expected exactly one session");
        Arc::clone(&sessions[0])
    }
}

impl Connector for RecordingConnector {
    fn connect(&self, _endpoint: &str) -> CoordinationResult<Arc<dyn Coordinator>> {
        let session = Arc::new(self.ensemble.session());
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// An endpoint nobody answers on.
pub struct Unreachable;

impl Connector for Unreachable {
    fn connect(&self, _endpoint: &str) -> CoordinationResult<Arc<dyn Coordinator>> {
        Err(CoordinationError::ConnectionLoss)
    }
}

/// A fresh ensemble with a pool provisioned at `path`.
pub fn provisioned(path: &str, cluster_id: u8) -> MemoryEnsemble {
    let ensemble = MemoryEnsemble::new();
    provision(&ensemble.session(), path, cluster_id).unwrap();
    ensemble
}

pub fn handle(session: &Arc<MemorySession>) -> Arc<dyn Coordinator> {
    Arc::clone(session) as Arc<dyn Coordinator>
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

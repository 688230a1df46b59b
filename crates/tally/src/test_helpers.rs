//! Test helpers for the tally pipeline.
//!
//! Provides a `MockBackend` implementing `Backend` with scripted connect and
//! fetch behavior, and call counters for assertions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{Backend, SQL_POLL_INTERVAL};
use crate::error::BackendError;
use crate::tally::{RawResult, RawRow};

/// Configurable response for `connect`.
#[derive(Clone, Debug)]
pub enum ConnectBehavior {
    /// Return Ok on every call.
    Succeed,
    /// Fail this many calls, then succeed.
    FailTimes(u32),
    /// Fail every call.
    AlwaysFail,
}

/// Configurable response for one `fetch_tally` call.
#[derive(Clone, Debug)]
pub enum FetchBehavior {
    Rows(RawResult),
    Fail(BackendError),
    /// Never complete.
    Hang,
}

#[derive(Debug)]
struct MockBackendState {
    connect_behavior: ConnectBehavior,
    connect_calls: u32,
    /// Consumed front to back before falling back to `default_rows`.
    fetch_script: VecDeque<FetchBehavior>,
    default_rows: RawResult,
    fetch_calls: u32,
}

/// In-memory backend. Clones share state, so a clone kept by the test can
/// observe calls made through the one handed to the code under test.
#[derive(Clone, Debug)]
pub struct MockBackend {
    state: Arc<Mutex<MockBackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_rows(Vec::new())
    }

    /// Backend whose every fetch returns `rows` unless scripted otherwise.
    pub fn with_rows(rows: RawResult) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockBackendState {
                connect_behavior: ConnectBehavior::Succeed,
                connect_calls: 0,
                fetch_script: VecDeque::new(),
                default_rows: rows,
                fetch_calls: 0,
            })),
        }
    }

    /// Backend returning the rows of the classic two-option demo.
    pub fn demo() -> Self {
        Self::with_rows(vec![RawRow::new("a", 4), RawRow::new("b", 2)])
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockBackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.lock().connect_behavior = behavior;
    }

    /// Queue the outcome of the next unscripted fetch.
    pub fn push_fetch(&self, behavior: FetchBehavior) {
        self.lock().fetch_script.push_back(behavior);
    }

    pub fn set_rows(&self, rows: RawResult) {
        self.lock().default_rows = rows;
    }

    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    pub fn fetch_calls(&self) -> u32 {
        self.lock().fetch_calls
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    type Handle = ();

    fn name(&self) -> &'static str {
        "mock"
    }

    fn poll_interval(&self) -> Duration {
        SQL_POLL_INTERVAL
    }

    async fn connect(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.connect_calls += 1;
        match state.connect_behavior {
            ConnectBehavior::Succeed => Ok(()),
            ConnectBehavior::FailTimes(n) if state.connect_calls <= n => Err(
                BackendError::Connect("connection refused (code 57P03)".into()),
            ),
            ConnectBehavior::FailTimes(_) => Ok(()),
            ConnectBehavior::AlwaysFail => Err(BackendError::Connect(
                "connection refused (code 57P03)".into(),
            )),
        }
    }

    async fn fetch_tally(&self, _: &mut ()) -> Result<RawResult, BackendError> {
        let next = {
            let mut state = self.lock();
            state.fetch_calls += 1;
            let scripted = state.fetch_script.pop_front();
            scripted.unwrap_or_else(|| FetchBehavior::Rows(state.default_rows.clone()))
        };

        match next {
            FetchBehavior::Rows(rows) => Ok(rows),
            FetchBehavior::Fail(e) => Err(e),
            FetchBehavior::Hang => std::future::pending().await,
        }
    }
}

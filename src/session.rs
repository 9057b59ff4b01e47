//! Capture session façade.
//!
//! Wraps a [`SessionAggregator`] and a [`ScreenshotAcquirer`] behind the
//! operations the browser extension uses. Owns the deferred-flush scheduler:
//! at most one pending flush per session, rescheduled (never stacked) on every
//! admitted record, and forced synchronously on stop.

use crate::acquirer::{AcquisitionStats, ScreenshotAcquirer};
use crate::aggregator::{Admission, SessionAggregator};
use crate::capture::CapturePrimitive;
use crate::config::Config;
use crate::privacy::{PrivacyFilter, SensitiveFieldClassifier};
use crate::types::{ActionKind, ActionRecord, Screenshot, Step, StepEdit, ThrottleClass};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Diagnostic snapshot of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: Option<String>,
    pub active: bool,
    pub steps: usize,
    pub pending: usize,
    pub histogram: BTreeMap<ActionKind, usize>,
    pub acquisition: AcquisitionStats,
}

struct SessionState {
    aggregator: SessionAggregator,
    /// Bumped on every (re)schedule; a woken timer only flushes if it is still current
    generation: u64,
    flush_task: Option<JoinHandle<()>>,
}

impl SessionState {
    fn cancel_flush(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.flush_task.take() {
            handle.abort();
        }
    }
}

/// Capture session shared by the extension's message handlers. Cheap to clone.
#[derive(Clone)]
pub struct CaptureSession {
    state: Arc<Mutex<SessionState>>,
    acquirer: ScreenshotAcquirer,
    merge_window: Duration,
}

impl CaptureSession {
    pub fn new(aggregator: SessionAggregator, acquirer: ScreenshotAcquirer) -> Self {
        let merge_window = aggregator.config().merge_window();
        Self {
            state: Arc::new(Mutex::new(SessionState {
                aggregator,
                generation: 0,
                flush_task: None,
            })),
            acquirer,
            merge_window,
        }
    }

    /// Build a session with the default privacy filter. Must be called within a tokio runtime.
    pub fn from_config(config: &Config, primitive: Arc<dyn CapturePrimitive>) -> Self {
        let filter = PrivacyFilter::new(config.privacy.clone());
        let masking = filter.masks_values();
        let classifier: Arc<dyn SensitiveFieldClassifier> = Arc::new(filter);

        let aggregator =
            SessionAggregator::new(config.aggregator.clone(), classifier).with_masking(masking);
        let acquirer = ScreenshotAcquirer::spawn(primitive, config.acquisition.clone());
        Self::new(aggregator, acquirer)
    }

    /// Start capturing. Returns the new session id, or `None` if already active.
    pub async fn start(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        state.cancel_flush();
        if state.aggregator.start() {
            state.aggregator.session_id().map(str::to_string)
        } else {
            None
        }
    }

    /// Stop capturing, committing pending records first. Returns the final steps.
    pub async fn stop(&self) -> Vec<Step> {
        let mut state = self.state.lock().await;
        state.cancel_flush();
        state.aggregator.stop();
        state.aggregator.steps().to_vec()
    }

    /// Discard all recorded steps. No-op while a session is active.
    pub async fn clear(&self) -> bool {
        let mut state = self.state.lock().await;
        state.aggregator.clear()
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.aggregator.is_active()
    }

    /// Ingest a record. Returns committed plus pending step count.
    pub async fn submit(&self, record: ActionRecord) -> usize {
        let mut state = self.state.lock().await;
        self.admit(&mut state, record)
    }

    /// Acquire a screenshot for the record (if asked), then submit it.
    ///
    /// A failed acquisition still submits the record, just without an artifact.
    /// The record belongs to the session that was active when it arrived: if that
    /// session ended while the screenshot was pending, the record is dropped.
    pub async fn record(&self, mut record: ActionRecord, capture: bool) -> usize {
        let session_id = {
            let state = self.state.lock().await;
            match state.aggregator.session_id() {
                Some(id) if state.aggregator.is_active() => id.to_string(),
                _ => {
                    trace!("Ignoring {} record while idle", record.kind);
                    return state.aggregator.step_count_estimate();
                }
            }
        };

        // Arrival time, not the time the screenshot came back
        if record.timestamp.is_none() {
            record.timestamp = Some(chrono::Utc::now().timestamp_millis());
        }

        if capture && record.artifact.is_none() {
            record.artifact = self
                .acquirer
                .acquire(record.throttle, record.kind.forces_capture())
                .await;
        }

        let mut state = self.state.lock().await;
        if state.aggregator.session_id() != Some(session_id.as_str()) {
            debug!(
                "Session {} ended during capture, dropping {} record",
                session_id, record.kind
            );
            return state.aggregator.step_count_estimate();
        }
        self.admit(&mut state, record)
    }

    /// Single opportunistic capture, independent of session state
    pub async fn acquire(&self, class: ThrottleClass, force_keep: bool) -> Option<Screenshot> {
        self.acquirer.acquire(class, force_keep).await
    }

    /// Committed steps only; pending records are never included
    pub async fn steps(&self) -> Vec<Step> {
        self.state.lock().await.aggregator.steps().to_vec()
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        SessionStatus {
            session_id: state.aggregator.session_id().map(str::to_string),
            active: state.aggregator.is_active(),
            steps: state.aggregator.steps().len(),
            pending: state.aggregator.pending_len(),
            histogram: state.aggregator.histogram(),
            acquisition: self.acquirer.stats(),
        }
    }

    pub async fn delete_step(&self, index: usize) -> bool {
        self.state.lock().await.aggregator.delete_step(index)
    }

    pub async fn move_step(&self, from: usize, to: usize) -> bool {
        self.state.lock().await.aggregator.move_step(from, to)
    }

    pub async fn edit_step(&self, index: usize, edit: StepEdit) -> bool {
        self.state.lock().await.aggregator.edit_step(index, edit)
    }

    fn admit(&self, state: &mut SessionState, record: ActionRecord) -> usize {
        if state.aggregator.submit(record) == Admission::Queued {
            self.schedule_flush(state);
        }
        state.aggregator.step_count_estimate()
    }

    /// Replace any pending flush with one `merge_window` from now
    fn schedule_flush(&self, state: &mut SessionState) {
        state.cancel_flush();
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let delay = self.merge_window;

        state.flush_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.lock().await;
            if state.generation != generation {
                return;
            }
            state.flush_task = None;
            let committed = state.aggregator.flush();
            debug!("Merge window elapsed, committed {} steps", committed);
        }));
    }
}

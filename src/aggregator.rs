//! Session aggregation: admission checks, merge windows and the step sequence.
//!
//! Records pass two stages before they become steps:
//!
//! 1. **Admission** rejects near-instant re-fires of the same physical action
//!    (double-fired listeners, bounce), comparing against the last committed
//!    action of the same kind.
//! 2. **Merge flush** collapses a logically continuous action (typing, a burst
//!    of layout notifications) queued during one merge window into a single
//!    representative step.
//!
//! This type has no timers of its own; [`crate::session::CaptureSession`]
//! decides when [`SessionAggregator::flush`] runs.

use crate::config::AggregatorConfig;
use crate::privacy::{SensitiveFieldClassifier, MASKED_VALUE};
use crate::types::{ActionKind, ActionRecord, Step, StepEdit};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Why a record was rejected at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Same URL as the last navigation / UI change
    SameUrl,
    /// Same element on the same page
    SameSubject,
    /// Value continues (or backspaces) the last entry into the same field
    ContinuedTyping,
    /// Same form submitted again
    SameForm,
}

/// Outcome of [`SessionAggregator::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queued for the next merge flush
    Queued,
    /// Dropped as a duplicate
    Rejected(RejectReason),
    /// No active session
    Inactive,
}

/// Last action of one kind, as seen by the duplicate check
#[derive(Debug, Clone)]
struct LastActionMemo {
    timestamp: i64,
    subject_path: Option<String>,
    url: String,
    value: Option<String>,
}

impl LastActionMemo {
    fn from_record(record: &ActionRecord) -> Self {
        Self {
            timestamp: record.time(),
            subject_path: record.subject_path.clone(),
            url: record.url.clone(),
            value: record.value.clone(),
        }
    }

    fn same_target(&self, record: &ActionRecord) -> bool {
        self.subject_path == record.subject_path && self.url == record.url
    }
}

#[derive(Debug)]
struct PendingRecord {
    record: ActionRecord,
    sensitive: bool,
}

/// Owns the canonical step sequence of one capture session
pub struct SessionAggregator {
    config: AggregatorConfig,
    classifier: Arc<dyn SensitiveFieldClassifier>,
    mask_sensitive: bool,
    session_id: Option<String>,
    active: bool,
    steps: Vec<Step>,
    pending: Vec<PendingRecord>,
    memos: HashMap<ActionKind, LastActionMemo>,
}

impl SessionAggregator {
    pub fn new(config: AggregatorConfig, classifier: Arc<dyn SensitiveFieldClassifier>) -> Self {
        Self {
            config,
            classifier,
            mask_sensitive: true,
            session_id: None,
            active: false,
            steps: Vec::new(),
            pending: Vec::new(),
            memos: HashMap::new(),
        }
    }

    /// Whether committed values of sensitive inputs are masked (default: yes)
    pub fn with_masking(mut self, mask_sensitive: bool) -> Self {
        self.mask_sensitive = mask_sensitive;
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Idle -> Active. Returns `false` (and changes nothing) if already active.
    pub fn start(&mut self) -> bool {
        if self.active {
            debug!("Session already active, ignoring start");
            return false;
        }
        self.reset();
        let session_id = uuid::Uuid::new_v4().to_string();
        info!("Capture session {} started", session_id);
        self.session_id = Some(session_id);
        self.active = true;
        true
    }

    /// Active -> Idle, committing anything still pending first.
    /// Returns `false` if no session was active.
    pub fn stop(&mut self) -> bool {
        if !self.active {
            debug!("No active session, ignoring stop");
            return false;
        }
        let flushed = self.flush();
        self.active = false;
        info!(
            "Capture session {} stopped with {} steps ({} flushed on stop)",
            self.session_id.as_deref().unwrap_or("-"),
            self.steps.len(),
            flushed
        );
        true
    }

    /// Discard all session state. Only effective while idle.
    pub fn clear(&mut self) -> bool {
        if self.active {
            debug!("Session active, ignoring clear");
            return false;
        }
        self.reset();
        self.session_id = None;
        true
    }

    fn reset(&mut self) {
        self.steps.clear();
        self.pending.clear();
        self.memos.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Ingest a record using the current wall clock for a missing timestamp
    pub fn submit(&mut self, record: ActionRecord) -> Admission {
        self.submit_at(record, chrono::Utc::now().timestamp_millis())
    }

    /// Ingest a record; `now` stamps records that arrive without a timestamp
    pub fn submit_at(&mut self, mut record: ActionRecord, now: i64) -> Admission {
        if !self.active {
            trace!("Dropping {} record outside a session", record.kind);
            return Admission::Inactive;
        }

        let sensitive = self.classifier.is_sensitive(&record);
        record.normalize(now, sensitive);

        if let Err(reason) = self.admit(&record, sensitive) {
            trace!(
                "Rejected {} on {} as duplicate ({:?})",
                record.kind,
                record.url,
                reason
            );
            return Admission::Rejected(reason);
        }

        trace!("Queued {} on {}", record.kind, record.url);
        self.pending.push(PendingRecord { record, sensitive });
        Admission::Queued
    }

    /// Admission check against the memo (and, for discrete kinds, the newest queued record)
    fn admit(&self, record: &ActionRecord, sensitive: bool) -> Result<(), RejectReason> {
        let window = match self.config.duplicate_window_ms(record.kind) {
            Some(ms) => ms as i64,
            None => return Ok(()),
        };

        let queued = if record.kind.is_discrete() {
            self.pending
                .iter()
                .rev()
                .find(|p| p.record.kind == record.kind)
                .map(|p| LastActionMemo::from_record(&p.record))
        } else {
            None
        };

        for memo in self.memos.get(&record.kind).into_iter().chain(queued.as_ref()) {
            // Observers do not guarantee arrival order, so compare both directions
            if (record.time() - memo.timestamp).abs() >= window {
                continue;
            }
            if let Some(reason) = duplicate_of(record, memo, sensitive) {
                return Err(reason);
            }
        }

        Ok(())
    }

    /// Merge and commit every pending record. Returns the number of steps committed.
    pub fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let pending = std::mem::take(&mut self.pending);
        let queued = pending.len();

        let mut selected: Vec<PendingRecord> = Vec::with_capacity(queued);
        let mut latest: HashMap<(ActionKind, String), usize> = HashMap::new();

        for item in pending {
            let key = match item.record.kind {
                ActionKind::Input => item.record.subject_path.clone().unwrap_or_default(),
                ActionKind::Navigate | ActionKind::UiChange => item.record.url.clone(),
                _ => {
                    selected.push(item);
                    continue;
                }
            };

            match latest.get(&(item.record.kind, key.clone())) {
                Some(&index) => {
                    // Ties go to the later arrival
                    if item.record.time() >= selected[index].record.time() {
                        selected[index] = item;
                    }
                }
                None => {
                    latest.insert((item.record.kind, key), selected.len());
                    selected.push(item);
                }
            }
        }

        // Stable: equal timestamps keep arrival order
        selected.sort_by_key(|item| item.record.time());

        let committed = selected.len();
        for item in selected {
            self.commit(item);
        }

        debug!(
            "Merge flush committed {} of {} queued records ({} steps total)",
            committed,
            queued,
            self.steps.len()
        );
        committed
    }

    fn commit(&mut self, item: PendingRecord) {
        let PendingRecord { record, sensitive } = item;
        self.memos
            .insert(record.kind, LastActionMemo::from_record(&record));

        let mask = (sensitive && self.mask_sensitive).then_some(MASKED_VALUE);
        self.steps.push(Step::from_record(record, mask));
    }

    /// Committed steps, in order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Committed plus queued records
    pub fn step_count_estimate(&self) -> usize {
        self.steps.len() + self.pending.len()
    }

    /// Committed steps per kind
    pub fn histogram(&self) -> BTreeMap<ActionKind, usize> {
        let mut histogram = BTreeMap::new();
        for step in &self.steps {
            *histogram.entry(step.kind).or_insert(0) += 1;
        }
        histogram
    }

    /// Remove a committed step (user edit)
    pub fn delete_step(&mut self, index: usize) -> bool {
        if index >= self.steps.len() {
            return false;
        }
        self.steps.remove(index);
        true
    }

    /// Move a committed step to a new position (user edit)
    pub fn move_step(&mut self, from: usize, to: usize) -> bool {
        if from >= self.steps.len() || to >= self.steps.len() {
            return false;
        }
        let step = self.steps.remove(from);
        self.steps.insert(to, step);
        true
    }

    /// Apply a user edit to a committed step
    pub fn edit_step(&mut self, index: usize, edit: StepEdit) -> bool {
        match self.steps.get_mut(index) {
            Some(step) => {
                edit.apply(step);
                true
            }
            None => false,
        }
    }
}

/// Per-kind duplicate rule, applied only inside the kind's time window
fn duplicate_of(
    record: &ActionRecord,
    memo: &LastActionMemo,
    sensitive: bool,
) -> Option<RejectReason> {
    match record.kind {
        ActionKind::Navigate | ActionKind::UiChange => {
            (record.url == memo.url).then_some(RejectReason::SameUrl)
        }
        ActionKind::Click | ActionKind::Keyboard => {
            memo.same_target(record).then_some(RejectReason::SameSubject)
        }
        ActionKind::Input => {
            if sensitive || !memo.same_target(record) {
                return None;
            }
            let new = record.value.as_deref().unwrap_or_default();
            let old = memo.value.as_deref().unwrap_or_default();
            (new.contains(old) || old.contains(new)).then_some(RejectReason::ContinuedTyping)
        }
        ActionKind::FormSubmit => memo.same_target(record).then_some(RejectReason::SameForm),
        ActionKind::ScreenState | ActionKind::Other => None,
    }
}

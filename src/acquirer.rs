//! Screenshot acquisition engine.
//!
//! All capture requests go through one drain task that owns the capture
//! primitive. Requests are serviced strictly FIFO, one at a time, with a
//! minimum interval between dispatches that depends on the request's
//! throttle class. A capture that looks like the last kept frame is not
//! stored; the caller gets the previous frame back instead.

use crate::capture::CapturePrimitive;
use crate::config::AcquisitionConfig;
use crate::types::{CaptureError, Screenshot, ThrottleClass};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, trace, warn};

/// Acquisition counters, for diagnostics only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionStats {
    /// Requests in a row that ended without a capture
    pub consecutive_failures: u32,
    pub total_failures: u64,
    /// Captures stored as the new reference frame
    pub captures: u64,
    /// Captures answered with the previous frame
    pub reused: u64,
    /// Requests whose caller gave up waiting
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    captures: AtomicU64,
    reused: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> AcquisitionStats {
        AcquisitionStats {
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }
}

struct CaptureRequest {
    class: ThrottleClass,
    force_keep: bool,
    /// The caller stops waiting at this point; no attempt may run past it
    deadline: Instant,
    reply: oneshot::Sender<Option<Screenshot>>,
}

impl CaptureRequest {
    fn remaining(&self) -> Option<Duration> {
        if self.reply.is_closed() {
            return None;
        }
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }
}

enum CaptureOutcome {
    Captured(Vec<u8>),
    Failed,
    /// The caller gave up before a capture succeeded
    Expired,
}

/// Handle to the acquisition engine. Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct ScreenshotAcquirer {
    tx: mpsc::UnboundedSender<CaptureRequest>,
    counters: Arc<Counters>,
    config: Arc<AcquisitionConfig>,
}

impl ScreenshotAcquirer {
    /// Start the drain task. Must be called from within a tokio runtime.
    pub fn spawn(primitive: Arc<dyn CapturePrimitive>, config: AcquisitionConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let config = Arc::new(config);

        let drain = DrainLoop {
            primitive,
            config: Arc::clone(&config),
            counters: Arc::clone(&counters),
            rx,
            last_dispatch: None,
            last_kept: None,
        };
        tokio::spawn(drain.run());

        Self { tx, counters, config }
    }

    /// Acquire a screenshot.
    ///
    /// Returns `None` when every capture attempt failed or the request did not
    /// complete within the configured timeout. With `force_keep` the new
    /// capture is always stored and returned, even if it matches the last one.
    pub async fn acquire(&self, class: ThrottleClass, force_keep: bool) -> Option<Screenshot> {
        let (reply, rx) = oneshot::channel();
        let request = CaptureRequest {
            class,
            force_keep,
            deadline: Instant::now() + self.config.request_timeout(),
            reply,
        };

        if self.tx.send(request).is_err() {
            warn!("Acquisition engine stopped, no screenshot");
            return None;
        }

        match timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(screenshot)) => screenshot,
            Ok(Err(_)) => None,
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Screenshot request timed out after {:?}",
                    self.config.request_timeout()
                );
                None
            }
        }
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.counters.snapshot()
    }

    pub fn failure_count(&self) -> u32 {
        self.counters.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Owns the capture primitive and the last kept frame
struct DrainLoop {
    primitive: Arc<dyn CapturePrimitive>,
    config: Arc<AcquisitionConfig>,
    counters: Arc<Counters>,
    rx: mpsc::UnboundedReceiver<CaptureRequest>,
    last_dispatch: Option<Instant>,
    last_kept: Option<Screenshot>,
}

impl DrainLoop {
    async fn run(mut self) {
        debug!("Screenshot drain loop started");

        while let Some(request) = self.rx.recv().await {
            if request.remaining().is_none() {
                trace!("Dropping abandoned screenshot request");
                continue;
            }

            let screenshot = self.service(&request).await;
            if request.reply.send(screenshot).is_err() {
                trace!("Requester gone before screenshot was delivered");
            }
        }

        debug!("Screenshot drain loop stopped");
    }

    async fn service(&mut self, request: &CaptureRequest) -> Option<Screenshot> {
        match self.capture_with_retry(request).await {
            CaptureOutcome::Captured(data) => {
                self.counters.consecutive_failures.store(0, Ordering::Relaxed);
                Some(self.keep_or_reuse(Screenshot::from_encoded(data), request.force_keep))
            }
            CaptureOutcome::Failed => {
                self.counters.record_failure();
                None
            }
            // Already counted as a timeout by the caller
            CaptureOutcome::Expired => None,
        }
    }

    /// Wait until the throttle interval for `class` has passed since the last dispatch
    async fn wait_for_slot(&self, class: ThrottleClass) {
        if let Some(last) = self.last_dispatch {
            let ready_at = last + self.config.interval(class);
            if ready_at > Instant::now() {
                trace!("Throttling {} capture until {:?}", class.as_str(), ready_at);
                sleep_until(ready_at).await;
            }
        }
    }

    /// Retry up to `max_attempts` times, never past the request's deadline
    async fn capture_with_retry(&mut self, request: &CaptureRequest) -> CaptureOutcome {
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            self.wait_for_slot(request.class).await;
            let Some(remaining) = request.remaining() else {
                debug!("Screenshot request expired after {} attempts", attempt - 1);
                return CaptureOutcome::Expired;
            };
            self.last_dispatch = Some(Instant::now());

            let result = match timeout(
                remaining.min(self.config.request_timeout()),
                self.primitive.capture_visible_area(),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CaptureError::Timeout),
            };

            match result {
                Ok(data) => return CaptureOutcome::Captured(data),
                Err(e) => {
                    warn!("Capture attempt {}/{} failed: {}", attempt, attempts, e);
                    if request.remaining().is_none() {
                        return CaptureOutcome::Expired;
                    }
                    if attempt < attempts {
                        sleep(self.config.retry_backoff()).await;
                    }
                }
            }
        }

        CaptureOutcome::Failed
    }

    /// Store the candidate as the new reference frame, or hand back the previous one
    fn keep_or_reuse(&mut self, candidate: Screenshot, force_keep: bool) -> Screenshot {
        if !force_keep {
            if let Some(last) = &self.last_kept {
                let score = candidate.similarity_to(last);
                if score >= self.config.similarity_threshold {
                    debug!(
                        "Capture {} is {:.1}% similar to {}, reusing",
                        candidate.digest(),
                        score,
                        last.digest()
                    );
                    self.counters.reused.fetch_add(1, Ordering::Relaxed);
                    return last.clone();
                }
            }
        }

        debug!("Keeping capture {}", candidate.digest());
        self.counters.captures.fetch_add(1, Ordering::Relaxed);
        self.last_kept = Some(candidate.clone());
        candidate
    }
}

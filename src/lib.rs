//! Step Recorder - interaction capture to documentation steps
//!
//! This crate turns the stream of raw interaction events emitted by a browser
//! extension (clicks, typing, navigations, shortcuts, form submissions, UI
//! mutations) into a clean, ordered list of documentation steps, each with an
//! instruction and an optional screenshot.
//!
//! # Architecture
//!
//! - **Similarity**: perceptual fingerprints to spot visually identical frames
//! - **Acquirer**: serialized, throttled screenshot capture with reuse of
//!   unchanged frames
//! - **Aggregator**: per-kind duplicate suppression and merge windows over the
//!   canonical step sequence
//! - **Session**: the façade the extension talks to, via the native messaging
//!   host

pub mod acquirer;
pub mod aggregator;
pub mod capture;
pub mod config;
pub mod host;
pub mod privacy;
pub mod session;
pub mod similarity;
pub mod types;

// Re-export commonly used types
pub use acquirer::{AcquisitionStats, ScreenshotAcquirer};
pub use aggregator::{Admission, RejectReason, SessionAggregator};
pub use capture::{CapturePrimitive, CommandCapture, NullCapture};
pub use config::Config;
pub use privacy::{PrivacyFilter, SensitiveFieldClassifier, MASKED_VALUE};
pub use session::{CaptureSession, SessionStatus};
pub use similarity::{compute_fingerprint, hamming_distance, similarity, Fingerprint};
pub use types::{
    ActionKind, ActionRecord, CaptureError, HostError, Screenshot, Step, StepEdit, ThrottleClass,
};

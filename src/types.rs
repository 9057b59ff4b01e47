//! Core types used throughout the step recorder.
//!
//! This module defines the raw action records delivered by the page observers,
//! the screenshot artifact handle, and the committed documentation step.

use crate::similarity::{compute_fingerprint, similarity, Fingerprint};
use base64::Engine;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Kind of user action observed on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Top-level navigation or SPA route change
    Navigate,
    /// Mouse click on an element
    Click,
    /// Text entry into a field
    Input,
    /// Keyboard shortcut
    Keyboard,
    /// Form submission
    FormSubmit,
    /// Significant UI mutation (dialog opened, panel expanded, ...)
    UiChange,
    /// Periodic snapshot of the visible page
    ScreenState,
    /// Anything the observers sent that we do not recognise
    #[default]
    Other,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Input => "input",
            ActionKind::Keyboard => "keyboard",
            ActionKind::FormSubmit => "form_submit",
            ActionKind::UiChange => "ui_change",
            ActionKind::ScreenState => "screen_state",
            ActionKind::Other => "other",
        }
    }

    /// Parse a kind as sent by the observers. Accepts `form_submit`,
    /// `formSubmit` and `form-submit` alike; unknown names map to `Other`.
    pub fn parse_lenient(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "navigate" | "navigation" => ActionKind::Navigate,
            "click" => ActionKind::Click,
            "input" => ActionKind::Input,
            "keyboard" | "shortcut" => ActionKind::Keyboard,
            "formsubmit" | "submit" => ActionKind::FormSubmit,
            "uichange" => ActionKind::UiChange,
            "screenstate" => ActionKind::ScreenState,
            _ => ActionKind::Other,
        }
    }

    /// Discrete user actions: one physical gesture produces one record.
    ///
    /// These are compared against queued records at admission, and their
    /// screenshots are always kept even when the page looks unchanged.
    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::Keyboard | ActionKind::FormSubmit
        )
    }

    /// Whether a capture for this kind should bypass the similarity gate
    pub fn forces_capture(&self) -> bool {
        !matches!(self, ActionKind::UiChange | ActionKind::ScreenState)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name
            .as_deref()
            .map(ActionKind::parse_lenient)
            .unwrap_or_default())
    }
}

/// Throttle class for screenshot acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleClass {
    /// Ordinary pages
    #[default]
    Standard,
    /// Pages known to re-render progressively and need a longer settle window
    Progressive,
}

impl ThrottleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleClass::Standard => "standard",
            ThrottleClass::Progressive => "progressive",
        }
    }
}

/// Raw action record produced by the page observers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    #[serde(default)]
    pub kind: ActionKind,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Wall-clock milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Stable locator of the acted-upon element (form id for `form_submit`)
    #[serde(default)]
    pub subject_path: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub instruction: String,
    /// Producer-side hint that the field holds a secret
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub throttle: ThrottleClass,
    #[serde(skip)]
    pub artifact: Option<Screenshot>,
}

impl ActionRecord {
    pub fn new(kind: ActionKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_subject(mut self, subject_path: impl Into<String>) -> Self {
        self.subject_path = Some(subject_path.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Timestamp, or 0 for a record that was never normalized
    pub fn time(&self) -> i64 {
        self.timestamp.unwrap_or_default()
    }

    /// Substitute defaults for missing fields so the record can always be committed
    pub fn normalize(&mut self, now: i64, sensitive: bool) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
        if self.instruction.trim().is_empty() {
            self.instruction = self.default_instruction(sensitive);
        }
    }

    /// Human-readable instruction derived from the record's fields
    pub fn default_instruction(&self, sensitive: bool) -> String {
        let target = self
            .subject_path
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("element");

        match self.kind {
            ActionKind::Navigate => {
                if self.title.is_empty() {
                    format!("Navigate to {}", self.url)
                } else {
                    format!("Navigate to \"{}\"", self.title)
                }
            }
            ActionKind::Click => format!("Click on {}", target),
            ActionKind::Input => match self.value.as_deref() {
                Some(value) if !sensitive && !value.is_empty() => {
                    format!("Type \"{}\" in {}", value, target)
                }
                _ => format!("Fill in {}", target),
            },
            ActionKind::Keyboard => match self.value.as_deref() {
                Some(keys) if !keys.is_empty() => format!("Press {}", keys),
                _ => "Press a keyboard shortcut".to_string(),
            },
            ActionKind::FormSubmit => "Submit the form".to_string(),
            ActionKind::UiChange => "Page content updated".to_string(),
            ActionKind::ScreenState => {
                if self.title.is_empty() {
                    "Current screen".to_string()
                } else {
                    format!("Current screen: {}", self.title)
                }
            }
            ActionKind::Other => "Perform an action on the page".to_string(),
        }
    }
}

struct ScreenshotInner {
    data: Vec<u8>,
    digest: String,
    dimensions: Option<(u32, u32)>,
    fingerprint: Option<Fingerprint>,
    captured_at: i64,
}

/// Screenshot artifact.
///
/// Cheap to clone: clones share the same encoded payload, and
/// [`Screenshot::same_artifact`] tells whether two handles are one capture.
#[derive(Clone)]
pub struct Screenshot {
    inner: Arc<ScreenshotInner>,
}

impl Screenshot {
    /// Wrap an encoded image, decoding it once to derive dimensions and fingerprint.
    ///
    /// Undecodable payloads are kept without a fingerprint, which makes them
    /// compare as "definitely different" to everything.
    pub fn from_encoded(data: Vec<u8>) -> Self {
        let decoded = image::load_from_memory(&data).ok();
        let dimensions = decoded.as_ref().map(|img| (img.width(), img.height()));
        let fingerprint = decoded.as_ref().map(compute_fingerprint);

        Self {
            inner: Arc::new(ScreenshotInner {
                digest: short_digest(&data),
                data,
                dimensions,
                fingerprint,
                captured_at: chrono::Utc::now().timestamp_millis(),
            }),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// First 12 hex chars of the SHA-256 of the encoded payload
    pub fn digest(&self) -> &str {
        &self.inner.digest
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.inner.dimensions
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.inner.fingerprint.as_ref()
    }

    pub fn captured_at(&self) -> i64 {
        self.inner.captured_at
    }

    /// Percentage similarity to another screenshot; 0 when either lacks a fingerprint
    pub fn similarity_to(&self, other: &Screenshot) -> f64 {
        match (self.fingerprint(), other.fingerprint()) {
            (Some(a), Some(b)) => similarity(a, b),
            _ => 0.0,
        }
    }

    /// Whether both handles refer to the same stored capture
    pub fn same_artifact(&self, other: &Screenshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// `data:` URL for the editor surface
    pub fn data_url(&self) -> String {
        let mime = image::guess_format(&self.inner.data)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(&self.inner.data)
        )
    }
}

impl fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Screenshot")
            .field("digest", &self.inner.digest)
            .field("bytes", &self.inner.data.len())
            .field("dimensions", &self.inner.dimensions)
            .field("fingerprint", &self.inner.fingerprint.as_ref().map(|fp| fp.to_hex()))
            .finish()
    }
}

impl Serialize for Screenshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Screenshot", 5)?;
        state.serialize_field("digest", self.digest())?;
        state.serialize_field("width", &self.dimensions().map(|d| d.0))?;
        state.serialize_field("height", &self.dimensions().map(|d| d.1))?;
        state.serialize_field("capturedAt", &self.captured_at())?;
        state.serialize_field("dataUrl", &self.data_url())?;
        state.end()
    }
}

/// Compute a short hash of an encoded payload for logging and export names
fn short_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let hash = hasher.finalize();
    hash[..6].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Committed documentation step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub kind: ActionKind,
    pub url: String,
    pub title: String,
    pub timestamp: i64,
    pub instruction: String,
    pub value: Option<String>,
    pub subject_path: Option<String>,
    pub artifact: Option<Screenshot>,
}

impl Step {
    /// Build a step from a normalized record; `masked` replaces the value
    pub fn from_record(record: ActionRecord, masked: Option<&str>) -> Self {
        let value = match masked {
            Some(mask) => record.value.as_ref().map(|_| mask.to_string()),
            None => record.value,
        };

        Self {
            kind: record.kind,
            timestamp: record.timestamp.unwrap_or_default(),
            url: record.url,
            title: record.title,
            instruction: record.instruction,
            value,
            subject_path: record.subject_path,
            artifact: record.artifact,
        }
    }
}

/// User edit applied to a committed step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEdit {
    #[serde(default)]
    pub instruction: Option<String>,
    /// Drop the screenshot from the step
    #[serde(default)]
    pub remove_artifact: bool,
}

impl StepEdit {
    pub fn apply(self, step: &mut Step) {
        if let Some(instruction) = self.instruction {
            step.instruction = instruction;
        }
        if self.remove_artifact {
            step.artifact = None;
        }
    }
}

/// Errors from the capture primitive
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture failed: {0}")]
    Failed(String),

    #[error("Capture timed out")]
    Timeout,

    #[error("No capture command configured")]
    NotConfigured,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors on the native-messaging channel
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_bytes(brightness: u8) -> Vec<u8> {
        let img = GrayImage::from_pixel(32, 32, Luma([brightness]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_kind_parse_lenient() {
        assert_eq!(ActionKind::parse_lenient("click"), ActionKind::Click);
        assert_eq!(ActionKind::parse_lenient("formSubmit"), ActionKind::FormSubmit);
        assert_eq!(ActionKind::parse_lenient("form_submit"), ActionKind::FormSubmit);
        assert_eq!(ActionKind::parse_lenient("ui-change"), ActionKind::UiChange);
        assert_eq!(ActionKind::parse_lenient("hover"), ActionKind::Other);
    }

    #[test]
    fn test_record_missing_kind_defaults_to_other() {
        let record: ActionRecord =
            serde_json::from_str(r#"{"url": "https://example.com"}"#).unwrap();
        assert_eq!(record.kind, ActionKind::Other);
        assert!(record.timestamp.is_none());

        let record: ActionRecord =
            serde_json::from_str(r#"{"kind": null, "url": "https://example.com"}"#).unwrap();
        assert_eq!(record.kind, ActionKind::Other);
    }

    #[test]
    fn test_record_camel_case_fields() {
        let record: ActionRecord = serde_json::from_str(
            r##"{"kind": "input", "url": "https://example.com", "subjectPath": "#email", "value": "a@b.c", "timestamp": 42}"##,
        )
        .unwrap();
        assert_eq!(record.kind, ActionKind::Input);
        assert_eq!(record.subject_path.as_deref(), Some("#email"));
        assert_eq!(record.timestamp, Some(42));
        assert_eq!(record.throttle, ThrottleClass::Standard);
    }

    #[test]
    fn test_normalize_stamps_and_describes() {
        let mut record = ActionRecord::new(ActionKind::Input, "https://example.com")
            .with_subject("#name")
            .with_value("Ada");
        record.normalize(1_000, false);
        assert_eq!(record.timestamp, Some(1_000));
        assert_eq!(record.instruction, "Type \"Ada\" in #name");

        // An existing timestamp and instruction are left alone
        let mut record = ActionRecord::new(ActionKind::Click, "https://example.com")
            .at(5)
            .with_instruction("Click Save");
        record.normalize(1_000, false);
        assert_eq!(record.timestamp, Some(5));
        assert_eq!(record.instruction, "Click Save");
    }

    #[test]
    fn test_titled_records_describe_the_page() {
        let record = ActionRecord::new(ActionKind::Navigate, "https://example.com/billing")
            .with_title("Billing");
        assert_eq!(record.default_instruction(false), "Navigate to \"Billing\"");

        let record = ActionRecord::new(ActionKind::Navigate, "https://example.com/billing");
        assert_eq!(
            record.default_instruction(false),
            "Navigate to https://example.com/billing"
        );

        let record = ActionRecord::new(ActionKind::ScreenState, "https://example.com")
            .with_title("Inbox");
        assert_eq!(record.default_instruction(false), "Current screen: Inbox");

        let step = Step::from_record(record.at(3), None);
        assert_eq!(step.title, "Inbox");
    }

    #[test]
    fn test_sensitive_instruction_hides_value() {
        let record = ActionRecord::new(ActionKind::Input, "https://example.com")
            .with_subject("#password")
            .with_value("hunter2");
        let instruction = record.default_instruction(true);
        assert!(!instruction.contains("hunter2"));
        assert_eq!(instruction, "Fill in #password");
    }

    #[test]
    fn test_step_from_record_masks_value() {
        let record = ActionRecord::new(ActionKind::Input, "https://example.com")
            .with_value("hunter2")
            .at(7);
        let step = Step::from_record(record, Some("***"));
        assert_eq!(step.value.as_deref(), Some("***"));
        assert_eq!(step.timestamp, 7);
    }

    #[test]
    fn test_screenshot_from_png() {
        let shot = Screenshot::from_encoded(png_bytes(128));
        assert_eq!(shot.dimensions(), Some((32, 32)));
        assert!(shot.fingerprint().is_some());
        assert_eq!(shot.digest().len(), 12);
        assert!(shot.data_url().starts_with("data:image/png;base64,"));

        let clone = shot.clone();
        assert!(shot.same_artifact(&clone));
        let other = Screenshot::from_encoded(png_bytes(128));
        assert!(!shot.same_artifact(&other));
        assert_eq!(shot.similarity_to(&other), 100.0);
    }

    #[test]
    fn test_undecodable_screenshot_has_no_fingerprint() {
        let shot = Screenshot::from_encoded(b"not an image".to_vec());
        assert!(shot.fingerprint().is_none());
        assert!(shot.dimensions().is_none());
        let png = Screenshot::from_encoded(png_bytes(10));
        assert_eq!(shot.similarity_to(&png), 0.0);
    }

    #[test]
    fn test_step_edit_apply() {
        let mut step = Step::from_record(
            ActionRecord::new(ActionKind::Click, "https://example.com").with_instruction("old"),
            None,
        );
        StepEdit {
            instruction: Some("new".to_string()),
            remove_artifact: true,
        }
        .apply(&mut step);
        assert_eq!(step.instruction, "new");
        assert!(step.artifact.is_none());
    }
}

//! Capture primitive integration.
//!
//! The acquisition engine is the only caller of a [`CapturePrimitive`]; the
//! primitive itself knows nothing about throttling, retries or similarity.

use crate::types::CaptureError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, trace};

/// Grabs the visible area of the recorded page as an encoded image
#[async_trait::async_trait]
pub trait CapturePrimitive: Send + Sync {
    async fn capture_visible_area(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Capture via an external screenshot command that writes an image to stdout
/// (e.g. `grim -`, `screencapture -x -t png /dev/stdout`)
pub struct CommandCapture {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandCapture {
    /// Build from an argv list; `None` when the list is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait::async_trait]
impl CapturePrimitive for CommandCapture {
    async fn capture_visible_area(&self) -> Result<Vec<u8>, CaptureError> {
        trace!("Running capture command {:?} {:?}", self.program, self.args);

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Capture command failed: {}", stderr.trim());
            return Err(CaptureError::Failed(stderr.trim().to_string()));
        }

        if output.stdout.is_empty() {
            return Err(CaptureError::Failed("capture command produced no output".to_string()));
        }

        debug!("Captured {} bytes", output.stdout.len());
        Ok(output.stdout)
    }
}

/// Placeholder used when no capture command is configured
pub struct NullCapture;

#[async_trait::async_trait]
impl CapturePrimitive for NullCapture {
    async fn capture_visible_area(&self) -> Result<Vec<u8>, CaptureError> {
        Err(CaptureError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_argv() {
        assert!(CommandCapture::from_argv(&[]).is_none());

        let capture = CommandCapture::from_argv(&["grim".to_string(), "-".to_string()]).unwrap();
        assert_eq!(capture.program(), &PathBuf::from("grim"));
        assert_eq!(capture.args, vec!["-".to_string()]);
    }

    #[tokio::test]
    async fn test_null_capture_fails() {
        let result = NullCapture.capture_visible_area().await;
        assert!(matches!(result, Err(CaptureError::NotConfigured)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_reads_stdout() {
        let capture = CommandCapture::from_argv(&[
            "sh".to_string(),
            "-c".to_string(),
            "printf frame".to_string(),
        ])
        .unwrap();
        assert_eq!(capture.capture_visible_area().await.unwrap(), b"frame".to_vec());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_failure() {
        let capture = CommandCapture::from_argv(&[
            "sh".to_string(),
            "-c".to_string(),
            "echo boom >&2; exit 3".to_string(),
        ])
        .unwrap();
        match capture.capture_visible_area().await {
            Err(CaptureError::Failed(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_empty_output() {
        let capture = CommandCapture::from_argv(&["true".to_string()]).unwrap();
        assert!(matches!(
            capture.capture_visible_area().await,
            Err(CaptureError::Failed(_))
        ));
    }
}

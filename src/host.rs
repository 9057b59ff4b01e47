//! Native messaging host for the browser extension.
//!
//! Messages use the browser native-messaging framing: a 4-byte little-endian
//! length followed by that many bytes of JSON. Each inbound message gets
//! exactly one response.

use crate::session::{CaptureSession, SessionStatus};
use crate::types::{ActionRecord, HostError, Screenshot, Step, StepEdit, ThrottleClass};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

/// Largest inbound message accepted
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Message from the extension
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Ping,
    Start,
    Stop,
    Clear,
    /// Observed user action; `capture` requests a screenshot before submitting
    Action {
        record: ActionRecord,
        #[serde(default = "default_true")]
        capture: bool,
    },
    Steps,
    Status,
    Acquire {
        #[serde(default)]
        class: ThrottleClass,
        #[serde(default, rename = "forceKeep")]
        force_keep: bool,
    },
    DeleteStep {
        index: usize,
    },
    MoveStep {
        from: usize,
        to: usize,
    },
    EditStep {
        index: usize,
        edit: StepEdit,
    },
}

fn default_true() -> bool {
    true
}

/// Response to the extension
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostResponse {
    Pong,
    Ok {
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(rename = "stepCount")]
        step_count: usize,
    },
    Updated {
        applied: bool,
    },
    Steps {
        steps: Vec<Step>,
    },
    Status {
        status: SessionStatus,
    },
    Screenshot {
        screenshot: Option<Screenshot>,
    },
    Error {
        message: String,
    },
}

impl HostResponse {
    pub fn error(message: impl Into<String>) -> Self {
        HostResponse::Error {
            message: message.into(),
        }
    }
}

/// Read one framed message. Returns `Ok(None)` on a clean end of stream.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, HostError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(HostError::MessageTooLarge(len));
    }

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(Some(buffer))
}

/// Write one framed response
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &HostResponse,
) -> Result<(), HostError> {
    let json = serde_json::to_vec(response)?;
    let len = (json.len() as u32).to_le_bytes();

    writer.write_all(&len).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

/// Handle every message except `action`, which [`run`] processes concurrently
pub async fn dispatch(session: &CaptureSession, message: HostMessage) -> HostResponse {
    match message {
        HostMessage::Ping => HostResponse::Pong,
        HostMessage::Start => {
            let session_id = session.start().await;
            if session_id.is_none() {
                debug!("Start requested while already recording");
            }
            HostResponse::Ok {
                session_id,
                step_count: session.steps().await.len(),
            }
        }
        HostMessage::Stop => HostResponse::Steps {
            steps: session.stop().await,
        },
        HostMessage::Clear => {
            let applied = session.clear().await;
            HostResponse::Updated { applied }
        }
        HostMessage::Action { record, capture } => HostResponse::Ok {
            session_id: None,
            step_count: session.record(record, capture).await,
        },
        HostMessage::Steps => HostResponse::Steps {
            steps: session.steps().await,
        },
        HostMessage::Status => HostResponse::Status {
            status: session.status().await,
        },
        HostMessage::Acquire { class, force_keep } => HostResponse::Screenshot {
            screenshot: session.acquire(class, force_keep).await,
        },
        HostMessage::DeleteStep { index } => HostResponse::Updated {
            applied: session.delete_step(index).await,
        },
        HostMessage::MoveStep { from, to } => HostResponse::Updated {
            applied: session.move_step(from, to).await,
        },
        HostMessage::EditStep { index, edit } => HostResponse::Updated {
            applied: session.edit_step(index, edit).await,
        },
    }
}

/// Serve the extension until the input stream ends.
///
/// `action` messages run on their own tasks so their screenshot requests
/// queue inside the acquirer; lifecycle and read requests wait for those
/// tasks first, so an action received before `stop` is never lost.
pub async fn run<R, W>(session: CaptureSession, mut reader: R, mut writer: W) -> Result<(), HostError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<HostResponse>();

    let writer_task = tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            if let Err(e) = write_message(&mut writer, &response).await {
                error!("Failed to write response: {}", e);
                break;
            }
        }
    });

    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        let buffer = match read_message(&mut reader).await {
            Ok(Some(buffer)) => buffer,
            Ok(None) => {
                debug!("Extension disconnected");
                break;
            }
            Err(HostError::MessageTooLarge(len)) => {
                // The oversized body is still on the stream; framing is lost
                error!("Message of {} bytes exceeds limit, closing", len);
                let _ = response_tx.send(HostResponse::error(format!("message too large: {} bytes", len)));
                break;
            }
            Err(e) => {
                error!("Error reading message: {}", e);
                break;
            }
        };

        let message = match serde_json::from_slice::<HostMessage>(&buffer) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse message: {}", e);
                let _ = response_tx.send(HostResponse::error(format!("parse error: {}", e)));
                continue;
            }
        };

        trace!("Received message: {:?}", message);

        // Reap finished action tasks so the set does not grow unbounded
        while in_flight.try_join_next().is_some() {}

        match message {
            HostMessage::Action { .. } => {
                let session = session.clone();
                let tx = response_tx.clone();
                in_flight.spawn(async move {
                    let response = dispatch(&session, message).await;
                    let _ = tx.send(response);
                });
            }
            other => {
                if !matches!(other, HostMessage::Ping | HostMessage::Acquire { .. }) {
                    while in_flight.join_next().await.is_some() {}
                }
                let response = dispatch(&session, other).await;
                let _ = response_tx.send(response);
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    drop(response_tx);
    if let Err(e) = writer_task.await {
        error!("Response writer failed: {}", e);
    }

    Ok(())
}

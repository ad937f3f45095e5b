//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them
//! into typed [`ComfyUIMessage`] variants, translates the ones that
//! concern the tracked prompt into [`BackendEvent`]s and forwards them
//! to the job's progress channel.

use futures::StreamExt;
use forge_core::progress::BackendEvent;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection, ComfyUIStream};
use crate::events::translate;
use crate::messages::{parse_message, ComfyUIMessage};
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A terminal event for the prompt was forwarded.
    Terminal,
    /// The socket closed or failed before a terminal event.
    Disconnected,
    /// Nobody is listening any more.
    ReceiverGone,
}

/// Process WebSocket messages from a ComfyUI connection.
///
/// Loops until a terminal event for `prompt_id` is forwarded, the
/// WebSocket closes or fails, or the receiver is dropped.
///
/// Binary frames (preview images) are ignored.
pub async fn process_messages(
    ws_stream: &mut ComfyUIStream,
    prompt_id: &str,
    event_tx: &mpsc::Sender<BackendEvent>,
) -> StreamOutcome {
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let Some(event) = handle_text_message(&text, prompt_id) else {
                    continue;
                };
                let terminal = event.is_terminal();
                if event_tx.send(event).await.is_err() {
                    return StreamOutcome::ReceiverGone;
                }
                if terminal {
                    return StreamOutcome::Terminal;
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(prompt_id, ?frame, "ComfyUI WebSocket closed");
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(prompt_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
    StreamOutcome::Disconnected
}

/// Drive one job's progress socket until the prompt ends.
///
/// Reconnects on disconnect per `reconnect`. Returning drops `event_tx`,
/// which closes the channel; the consumer treats a close without a
/// terminal event as a cue to fall back to polling.
pub async fn forward_events(
    client: ComfyUIClient,
    mut connection: ComfyUIConnection,
    prompt_id: String,
    event_tx: mpsc::Sender<BackendEvent>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            _ = event_tx.closed() => return,
            outcome = process_messages(&mut connection.ws_stream, &prompt_id, &event_tx) => outcome,
        };

        match outcome {
            StreamOutcome::Terminal | StreamOutcome::ReceiverGone => return,
            StreamOutcome::Disconnected => {
                match reconnect_loop(&client, &connection.client_id, &reconnect, &cancel).await {
                    Some(conn) => connection = conn,
                    None => {
                        tracing::warn!(prompt_id = %prompt_id, "Progress stream lost");
                        return;
                    }
                }
            }
        }
    }
}

// ---- private helpers ----

/// Parse a text frame and translate it for `prompt_id`.
fn handle_text_message(text: &str, prompt_id: &str) -> Option<BackendEvent> {
    match parse_message(text) {
        Ok(msg) => {
            if let ComfyUIMessage::Status(ref data) = msg {
                tracing::trace!(
                    queue_remaining = data.status.exec_info.queue_remaining,
                    "ComfyUI queue status",
                );
            }
            if let ComfyUIMessage::ExecutionError(ref data) = msg {
                tracing::warn!(
                    prompt_id = %data.prompt_id,
                    node_id = ?data.node_id,
                    node_type = ?data.node_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
            }
            translate(msg, prompt_id)
        }
        Err(e) => {
            // Custom nodes broadcast their own message types.
            tracing::debug!(error = %e, raw_message = %text, "Skipping unrecognised ComfyUI message");
            None
        }
    }
}

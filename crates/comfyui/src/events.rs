//! Translation of raw ComfyUI messages into backend-neutral events.
//!
//! A socket may carry messages for other prompts (server broadcasts, or
//! a reused client id), so every translation is scoped to one prompt.

use forge_core::progress::BackendEvent;

use crate::messages::ComfyUIMessage;

/// Map a message to the event it means for `prompt_id`, or `None` when
/// it concerns another prompt or carries no progress information.
pub fn translate(message: ComfyUIMessage, prompt_id: &str) -> Option<BackendEvent> {
    let ours = |id: &str| id == prompt_id;
    // Older servers omit the prompt id on some messages.
    let ours_opt = |id: &Option<String>| id.as_deref().map_or(true, |id| id == prompt_id);

    match message {
        ComfyUIMessage::Status(_) => None,
        ComfyUIMessage::ExecutionStart(data) => {
            ours(&data.prompt_id).then_some(BackendEvent::ExecutionStarted)
        }
        ComfyUIMessage::ExecutionCached(data) => {
            ours(&data.prompt_id).then_some(BackendEvent::NodesCached {
                node_ids: data.nodes,
            })
        }
        ComfyUIMessage::Executing(data) => {
            if !ours_opt(&data.prompt_id) {
                return None;
            }
            Some(match data.node {
                Some(node_id) => BackendEvent::NodeStarted { node_id },
                None => BackendEvent::ExecutionComplete,
            })
        }
        ComfyUIMessage::Progress(data) => {
            ours_opt(&data.prompt_id).then_some(BackendEvent::StepProgress {
                node_id: data.node,
                value: data.value,
                max: data.max,
            })
        }
        ComfyUIMessage::Executed(data) => {
            ours(&data.prompt_id).then_some(BackendEvent::NodeFinished { node_id: data.node })
        }
        ComfyUIMessage::ExecutionSuccess(data) => {
            ours(&data.prompt_id).then_some(BackendEvent::ExecutionComplete)
        }
        ComfyUIMessage::ExecutionError(data) => {
            ours(&data.prompt_id).then_some(BackendEvent::ExecutionError {
                node_id: data.node_id,
                message: data.exception_message,
                exception_type: data.exception_type,
            })
        }
        ComfyUIMessage::ExecutionInterrupted(data) => {
            ours(&data.prompt_id).then_some(BackendEvent::Interrupted)
        }
    }
}

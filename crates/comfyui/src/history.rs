//! Parsing of `/history/{prompt_id}` documents.
//!
//! ```text
//! {"<prompt_id>": {
//!     "outputs": {"<node>": {"images": [{"filename", "subfolder", "type"}]}},
//!     "status": {"status_str": "success"|"error", "completed": bool,
//!                "messages": [["execution_error", {...}], ...]}
//! }}
//! ```

use forge_core::backend::{OutputRef, RemoteStatus};
use serde_json::Value;

/// Output keys that carry files. `images` also holds animated WEBP
/// output from video nodes.
const OUTPUT_KEYS: &[&str] = &["images", "gifs", "videos", "audio"];

/// Folder type for preview files that are not final outputs.
const TEMP_FOLDER: &str = "temp";

/// Status of `prompt_id` according to a history document, or `None`
/// when the history does not (yet) contain the prompt.
pub fn history_status(history: &Value, prompt_id: &str) -> Option<RemoteStatus> {
    let entry = history.get(prompt_id)?;
    let status = entry.get("status");

    let status_str = status
        .and_then(|s| s.get("status_str"))
        .and_then(|v| v.as_str());
    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if status_str == Some("error") {
        let (node_id, message) = execution_error(status).unwrap_or((None, "Execution failed".into()));
        return Some(RemoteStatus::Failed { message, node_id });
    }
    if completed || status_str == Some("success") {
        return Some(RemoteStatus::Completed);
    }
    // An entry without a final status was interrupted.
    Some(RemoteStatus::Failed {
        message: "Execution did not complete".to_string(),
        node_id: None,
    })
}

/// Final output files of `prompt_id`, ordered by node id.
pub fn history_outputs(history: &Value, prompt_id: &str) -> Vec<OutputRef> {
    let Some(outputs) = history
        .get(prompt_id)
        .and_then(|e| e.get("outputs"))
        .and_then(|o| o.as_object())
    else {
        return Vec::new();
    };

    let mut nodes: Vec<(&String, &Value)> = outputs.iter().collect();
    nodes.sort_by_key(|(id, _)| (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string()));

    let mut refs = Vec::new();
    for (_, node_output) in nodes {
        for key in OUTPUT_KEYS {
            let files = node_output
                .get(*key)
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten();
            for file in files {
                let Some(filename) = file.get("filename").and_then(|v| v.as_str()) else {
                    continue;
                };
                let folder_type = file
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("output");
                if folder_type == TEMP_FOLDER {
                    continue;
                }
                refs.push(OutputRef::Remote {
                    filename: filename.to_string(),
                    subfolder: file
                        .get("subfolder")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    folder_type: folder_type.to_string(),
                });
            }
        }
    }
    refs
}

// ---- private helpers ----

fn execution_error(status: Option<&Value>) -> Option<(Option<String>, String)> {
    let messages = status?.get("messages")?.as_array()?;
    messages.iter().find_map(|m| {
        let pair = m.as_array()?;
        if pair.first()?.as_str()? != "execution_error" {
            return None;
        }
        let data = pair.get(1)?;
        let message = data
            .get("exception_message")
            .and_then(|v| v.as_str())
            .unwrap_or("Execution failed")
            .trim()
            .to_string();
        let node_id = data
            .get("node_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Some((node_id, message))
    })
}

//! Poll loop that waits for a submitted prompt to finish.
//!
//! History mode asks `/history/{id}` for the prompt's status. Queue mode
//! watches `/queue` and reads `/history` once the prompt has left it.
//! Both run a fixed number of attempts with a fixed sleep in between.

use std::time::Duration;

use serde_json::Value;

use crate::config::{GatewayConfig, PollMode};
use crate::error::BackendError;
use crate::services::comfy_client::{ComfyClient, ImageRef};

/// Output nodes tried in order before falling back to any node with images.
pub const OUTPUT_PRIORITY: [&str; 5] = ["524", "540", "562", "89", "15"];

#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub mode: PollMode,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            mode: config.poll_mode,
            interval: Duration::from_secs(config.poll_interval_secs),
            max_attempts: config.poll_max_attempts,
        }
    }
}

/// Result of one poll attempt that reached the backend.
enum Attempt {
    Pending,
    Done(ImageRef),
    Failed(BackendError),
}

/// Wait for `prompt_id` to finish and return its output image.
pub async fn wait_for_output(
    client: &ComfyClient,
    prompt_id: &str,
    save_node: &str,
    settings: PollSettings,
) -> Result<ImageRef, BackendError> {
    let mode = match settings.mode {
        PollMode::History => "history",
        PollMode::Queue => "queue",
    };
    tracing::info!(prompt_id, mode, max_attempts = settings.max_attempts, "Polling for completion");

    for attempt in 1..=settings.max_attempts {
        if settings.mode == PollMode::History {
            tokio::time::sleep(settings.interval).await;
        }
        crate::metrics::poll_attempt(mode);

        let result = match settings.mode {
            PollMode::History => history_attempt(client, prompt_id).await,
            PollMode::Queue => queue_attempt(client, prompt_id, save_node).await,
        };

        match result {
            Ok(Attempt::Done(image)) => {
                tracing::info!(prompt_id, attempt, filename = %image.filename, "Generation finished");
                return Ok(image);
            }
            Ok(Attempt::Failed(e)) => {
                tracing::error!(prompt_id, attempt, "Generation failed: {e}");
                return Err(e);
            }
            Ok(Attempt::Pending) => {
                tracing::debug!(prompt_id, attempt, max_attempts = settings.max_attempts, "Waiting for generation");
            }
            Err(e) => {
                tracing::warn!(prompt_id, attempt, "Polling attempt failed: {e}");
            }
        }

        if settings.mode == PollMode::Queue {
            tokio::time::sleep(settings.interval).await;
        }
    }

    Err(BackendError::Timeout(settings.max_attempts))
}

async fn history_attempt(client: &ComfyClient, prompt_id: &str) -> Result<Attempt, BackendError> {
    let history = client.history_for(prompt_id).await?;
    let Some(entry) = history.get(prompt_id) else {
        return Ok(Attempt::Pending);
    };

    let status = entry.pointer("/status/status_str").and_then(Value::as_str);
    Ok(match status {
        Some("success") => match history_output(entry) {
            Some(image) => Attempt::Done(image),
            None => Attempt::Failed(BackendError::NoOutput),
        },
        Some("error") => Attempt::Failed(BackendError::GenerationFailed(execution_error_message(entry))),
        _ => Attempt::Pending,
    })
}

async fn queue_attempt(
    client: &ComfyClient,
    prompt_id: &str,
    save_node: &str,
) -> Result<Attempt, BackendError> {
    if client.queue().await?.contains(prompt_id) {
        return Ok(Attempt::Pending);
    }

    let history = client.history_all().await?;
    let Some(entry) = history.get(prompt_id) else {
        return Ok(Attempt::Pending);
    };

    Ok(match queue_output(entry, save_node) {
        Some(image) => Attempt::Done(image),
        None => Attempt::Failed(BackendError::NoOutput),
    })
}

fn node_image(outputs: &Value, node: &str) -> Option<ImageRef> {
    let first = outputs.get(node)?.get("images")?.as_array()?.first()?;
    serde_json::from_value(first.clone()).ok()
}

/// First image of any node, scanning node ids in ascending numeric order.
fn any_node_image(outputs: &Value) -> Option<ImageRef> {
    let mut ids: Vec<&String> = outputs.as_object()?.keys().collect();
    ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string()));
    ids.into_iter().find_map(|id| node_image(outputs, id))
}

/// Output image of a successful history entry, by node priority.
pub fn history_output(entry: &Value) -> Option<ImageRef> {
    let outputs = entry.get("outputs")?;
    OUTPUT_PRIORITY
        .iter()
        .find_map(|node| node_image(outputs, node))
        .or_else(|| any_node_image(outputs))
}

/// Output image of a finished entry seen in queue mode: the save node first.
pub fn queue_output(entry: &Value, save_node: &str) -> Option<ImageRef> {
    let outputs = entry.get("outputs")?;
    node_image(outputs, save_node).or_else(|| any_node_image(outputs))
}

/// Text of the `execution_error` messages of a failed entry.
pub fn execution_error_message(entry: &Value) -> String {
    let messages: Vec<String> = entry
        .pointer("/status/messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|msg| {
            let pair = msg.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            Some(match pair.get(1)? {
                Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_default(),
            })
        })
        .collect();

    if messages.is_empty() {
        "Unknown ComfyUI error".to_string()
    } else {
        messages.join("\n")
    }
}

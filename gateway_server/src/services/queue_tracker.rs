//! Best-effort notification of submitted prompts to a queue tracker.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

const TRACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueNotice {
    pub prompt_id: String,
    pub user_id: String,
    pub device_id: String,
    pub environment: String,
    pub style: String,
}

/// Post `notice` to `{tracker_url}/api/queue` in the background.
///
/// Failures are logged and counted, never returned. Returns `None` when no
/// tracker is configured.
pub fn track(tracker_url: Option<&str>, notice: QueueNotice) -> Option<JoinHandle<()>> {
    let url = format!("{}/api/queue", tracker_url?.trim_end_matches('/'));

    Some(tokio::spawn(async move {
        let result = reqwest::Client::new()
            .post(&url)
            .json(&notice)
            .timeout(TRACK_TIMEOUT)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(_) => tracing::debug!(prompt_id = %notice.prompt_id, "Generation tracked in queue"),
            Err(e) => {
                crate::metrics::queue_tracker_failed();
                tracing::warn!(prompt_id = %notice.prompt_id, "Failed to track generation in queue: {e}");
            }
        }
    }))
}

//! Image backend client: status, uploads, prompt submission, history and queue.
//!
//! The backend speaks the ComfyUI HTTP API: workflows go to `/prompt`,
//! results are read back from `/history`, and image bytes from `/view`.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::BackendError;

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);
const QUEUE_TIMEOUT: Duration = Duration::from_secs(10);
const VIEW_TIMEOUT: Duration = Duration::from_secs(30);

/// Reachability of the backend as seen from `/system_stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Running,
    Error(String),
    Offline(String),
}

/// One image entry of a node's `outputs.images` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_image_type")]
    pub kind: String,
}

fn default_image_type() -> String {
    "output".to_string()
}

impl ImageRef {
    fn query_pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("filename", self.filename.as_str()),
            ("subfolder", self.subfolder.as_str()),
            ("type", self.kind.as_str()),
        ]
    }

    fn encoded_query(&self) -> String {
        let Ok(mut url) = Url::parse("http://localhost/") else {
            return String::new();
        };
        url.query_pairs_mut().extend_pairs(self.query_pairs());
        url.query().unwrap_or_default().to_string()
    }

    /// Relative URL of this image behind the gateway's `/api/image` proxy.
    pub fn proxy_url(&self) -> String {
        format!("/api/image?{}", self.encoded_query())
    }
}

/// Prompt ids currently in the backend queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub running: Vec<String>,
    pub pending: Vec<String>,
}

impl QueueSnapshot {
    pub fn contains(&self, prompt_id: &str) -> bool {
        self.running.iter().chain(&self.pending).any(|id| id == prompt_id)
    }

    /// Queue entries are `[number, prompt_id, prompt, extra, outputs]` tuples.
    fn from_value(value: &Value) -> Self {
        let ids = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get(1)?.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            running: ids("queue_running"),
            pending: ids("queue_pending"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ComfyClient {
    http: Client,
    base_url: String,
}

impl ComfyClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Absolute backend URL of an output image.
    pub fn view_url(&self, image: &ImageRef) -> String {
        format!("{}/view?{}", self.base_url, image.encoded_query())
    }

    pub async fn system_stats(&self) -> Result<Value, BackendError> {
        let resp = self
            .http
            .get(self.url("/system_stats"))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    pub async fn check_status(&self) -> BackendStatus {
        tracing::debug!(url = %self.base_url, "Checking backend status");
        let result = self
            .http
            .get(self.url("/system_stats"))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => BackendStatus::Running,
            Ok(resp) => {
                tracing::warn!(status = resp.status().as_u16(), "Backend responded with error status");
                BackendStatus::Error(format!("ComfyUI returned status {}", resp.status().as_u16()))
            }
            Err(e) => {
                tracing::warn!("Backend connection failed: {e}");
                BackendStatus::Offline(e.to_string())
            }
        }
    }

    /// Upload an input image; returns the name the backend stored it under.
    pub async fn upload_image(
        &self,
        filename: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| BackendError::Upload(e.to_string()))?;
        let form = Form::new().part("image", part).text("overwrite", "true");

        tracing::info!(filename, size, "Uploading image to backend");

        let resp = self
            .http
            .post(self.url("/upload/image"))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackendError::Upload(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BackendError::Upload(format!(
                "Image upload failed: HTTP {}",
                resp.status().as_u16()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| BackendError::Upload(e.to_string()))?;
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Upload("upload response carried no name".to_string()))?;

        tracing::info!(name, "Image uploaded");
        Ok(name.to_string())
    }

    /// Queue a workflow; returns the backend's prompt id.
    pub async fn submit_prompt(
        &self,
        workflow: &Map<String, Value>,
        client_id: &str,
    ) -> Result<String, BackendError> {
        let payload = json!({ "prompt": workflow, "client_id": client_id });

        let resp = self
            .http
            .post(self.url("/prompt"))
            .json(&payload)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackendError::Submit(e.to_string()))?;

        let status = resp.status();
        tracing::debug!(status = status.as_u16(), "Prompt submission response");
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "Backend rejected prompt: {body}");
            return Err(BackendError::Submit(format!("HTTP {}: {body}", status.as_u16())));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| BackendError::Submit(e.to_string()))?;
        body.get("prompt_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::Submit("No prompt_id received from ComfyUI".to_string()))
    }

    pub async fn history_for(&self, prompt_id: &str) -> Result<Value, BackendError> {
        let resp = self
            .http
            .get(self.url(&format!("/history/{prompt_id}")))
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    pub async fn history_all(&self) -> Result<Value, BackendError> {
        let resp = self
            .http
            .get(self.url("/history"))
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    /// The `limit` most recent history entries.
    pub async fn recent_history(&self, limit: usize) -> Result<Value, BackendError> {
        let resp = self
            .http
            .get(self.url("/history"))
            .query(&[("max_items", limit)])
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    pub async fn queue(&self) -> Result<QueueSnapshot, BackendError> {
        let resp = self
            .http
            .get(self.url("/queue"))
            .timeout(QUEUE_TIMEOUT)
            .send()
            .await?;
        let body: Value = ensure_success(resp).await?.json().await?;
        Ok(QueueSnapshot::from_value(&body))
    }

    /// Fetch image bytes and their content type from `/view`.
    pub async fn view_bytes(
        &self,
        image: &ImageRef,
    ) -> Result<(Option<String>, Vec<u8>), BackendError> {
        let resp = self
            .http
            .get(self.url("/view"))
            .query(&image.query_pairs())
            .timeout(VIEW_TIMEOUT)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?;
        Ok((content_type, bytes.to_vec()))
    }
}

async fn ensure_success(resp: Response) -> Result<Response, BackendError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn image(filename: &str, subfolder: &str) -> ImageRef {
        ImageRef {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind: "output".into(),
        }
    }

    #[test]
    fn image_ref_defaults_missing_fields() {
        let img: ImageRef = serde_json::from_value(json!({ "filename": "a.jpg" })).unwrap();
        assert_eq!(img, image("a.jpg", ""));
    }

    #[test]
    fn view_url_encodes_query() {
        let client = ComfyClient::new("http://backend:8188/");
        assert_eq!(
            client.view_url(&image("shot 1.jpg", "sess/a")),
            "http://backend:8188/view?filename=shot+1.jpg&subfolder=sess%2Fa&type=output"
        );
    }

    #[test]
    fn proxy_url_is_relative() {
        assert_eq!(
            image("out.jpg", "").proxy_url(),
            "/api/image?filename=out.jpg&subfolder=&type=output"
        );
    }

    #[test]
    fn queue_snapshot_reads_prompt_ids() {
        let raw = json!({
            "queue_running": [[3, "p-run", {}, {}, []]],
            "queue_pending": [[4, "p-wait", {}, {}, []], [5, "p-next"]],
        });
        let snapshot = QueueSnapshot::from_value(&raw);
        assert_eq!(snapshot.running, vec!["p-run"]);
        assert_eq!(snapshot.pending, vec!["p-wait", "p-next"]);
        assert!(snapshot.contains("p-next"));
        assert!(!snapshot.contains("p-done"));
    }
}

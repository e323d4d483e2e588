//! In-process stand-in for the image backend, shared by the test modules.

use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const PROMPT_ID: &str = "p-1";

#[derive(Clone, Default)]
pub struct FakeBackend {
    /// Body of `GET /history`; `GET /history/{id}` returns the matching entry only.
    pub history: Value,
    /// Body of `GET /queue`; empty queue when null.
    pub queue: Value,
    /// Answer `/system_stats` with 500.
    pub stats_failing: bool,
    pub submitted: Arc<Mutex<Vec<Value>>>,
    pub uploads: Arc<Mutex<Vec<String>>>,
    pub tracked: Arc<Mutex<Vec<Value>>>,
}

impl FakeBackend {
    /// A backend whose prompt `p-1` finished with one image on `node`.
    pub fn finished(node: &str, filename: &str) -> Self {
        Self {
            history: json!({
                PROMPT_ID: {
                    "status": { "status_str": "success", "completed": true, "messages": [] },
                    "outputs": {
                        node: { "images": [{ "filename": filename, "subfolder": "", "type": "output" }] }
                    }
                }
            }),
            ..Default::default()
        }
    }

    /// A backend whose prompt `p-1` ended in an execution error.
    pub fn failed(message: &str) -> Self {
        Self {
            history: json!({
                PROMPT_ID: {
                    "status": {
                        "status_str": "error",
                        "completed": false,
                        "messages": [
                            ["execution_start", { "prompt_id": PROMPT_ID }],
                            ["execution_error", { "exception_message": message }]
                        ]
                    },
                    "outputs": {}
                }
            }),
            ..Default::default()
        }
    }

    /// Bind to an ephemeral port and return the base URL.
    pub async fn spawn(self) -> String {
        let app = Router::new()
            .route("/system_stats", get(system_stats))
            .route("/upload/image", post(upload))
            .route("/prompt", post(prompt))
            .route("/history", get(history_all))
            .route("/history/{id}", get(history_one))
            .route("/queue", get(queue))
            .route("/view", get(view))
            .route("/api/queue", post(track))
            .with_state(self);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

/// An address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn system_stats(State(fake): State<FakeBackend>) -> impl IntoResponse {
    if fake.stats_failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response();
    }
    Json(json!({ "system": { "os": "posix", "comfyui_version": "test" }, "devices": [] }))
        .into_response()
}

async fn upload(State(fake): State<FakeBackend>, mut multipart: Multipart) -> Json<Value> {
    let mut name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("image") {
            name = field.file_name().unwrap_or_default().to_string();
            let _ = field.bytes().await.unwrap();
        }
    }
    fake.uploads.lock().unwrap().push(name.clone());
    Json(json!({ "name": name, "subfolder": "", "type": "input" }))
}

async fn prompt(State(fake): State<FakeBackend>, Json(body): Json<Value>) -> Json<Value> {
    fake.submitted.lock().unwrap().push(body);
    Json(json!({ "prompt_id": PROMPT_ID, "number": 1, "node_errors": {} }))
}

async fn history_all(State(fake): State<FakeBackend>) -> Json<Value> {
    Json(if fake.history.is_null() { json!({}) } else { fake.history })
}

async fn history_one(State(fake): State<FakeBackend>, Path(id): Path<String>) -> Json<Value> {
    match fake.history.get(&id) {
        Some(entry) => Json(json!({ id: entry })),
        None => Json(json!({})),
    }
}

async fn queue(State(fake): State<FakeBackend>) -> Json<Value> {
    if fake.queue.is_null() {
        return Json(json!({ "queue_running": [], "queue_pending": [] }));
    }
    Json(fake.queue)
}

async fn view() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], b"jpeg-bytes".to_vec())
}

async fn track(State(fake): State<FakeBackend>, Json(body): Json<Value>) -> StatusCode {
    fake.tracked.lock().unwrap().push(body);
    StatusCode::OK
}

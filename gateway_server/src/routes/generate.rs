//! `/api/generate`: headshot generation endpoint and liveness probe.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::routes::AppState;
use crate::services::generation_service::{self, GenerationRequest};

pub const ALLOWED_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Fields collected from the multipart body.
#[derive(Default)]
struct GenerateForm {
    environment: Option<String>,
    style: Option<String>,
    user_id: Option<String>,
    device_id: Option<String>,
    censored: bool,
    image: Option<UploadedImage>,
}

struct UploadedImage {
    name: String,
    mime: String,
    bytes: Vec<u8>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address from `x-forwarded-for` (first hop), then `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> String {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header_str(headers, "x-real-ip"))
        .unwrap_or("unknown")
        .to_string()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn too_large(limit: usize) -> ApiError {
    ApiError::BadRequest(format!(
        "File too large. Maximum size is {}MB.",
        limit / (1024 * 1024)
    ))
}

fn multipart_error(e: MultipartError, limit: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(limit)
    } else {
        ApiError::Internal(e.body_text())
    }
}

async fn read_form(multipart: &mut Multipart, limit: usize) -> Result<GenerateForm, ApiError> {
    let mut form = GenerateForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let file_name = field.file_name().unwrap_or("upload.jpg").to_string();
            let mime = field.content_type().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
            form.image = Some(UploadedImage {
                name: file_name,
                mime,
                bytes: bytes.to_vec(),
            });
            continue;
        }

        let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
        match name.as_str() {
            "environment" => form.environment = non_empty(text),
            "style" => form.style = non_empty(text),
            "userId" => form.user_id = non_empty(text),
            "deviceId" => form.device_id = non_empty(text),
            "censored" => form.censored = matches!(text.trim(), "true" | "1" | "on"),
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

/// `POST /api/generate`
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let limit = state.config.max_upload_bytes;
    let form = read_form(&mut multipart, limit).await?;

    let user_id = form
        .user_id
        .or_else(|| header_str(&headers, "x-user-id").map(str::to_string));
    let device_id = form
        .device_id
        .or_else(|| header_str(&headers, "x-device-id").map(str::to_string));

    let (Some(environment), Some(style), Some(user_id), Some(device_id), Some(image)) =
        (form.environment, form.style, user_id, device_id, form.image)
    else {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    };

    if !ALLOWED_TYPES.contains(&image.mime.as_str()) {
        return Err(ApiError::BadRequest(
            "Invalid file type. Please upload JPG, PNG, or WebP images only.".to_string(),
        ));
    }
    if image.bytes.len() > limit {
        return Err(too_large(limit));
    }

    let request = GenerationRequest {
        environment,
        style,
        user_id,
        device_id,
        censored: form.censored,
        image_name: image.name,
        image_mime: image.mime,
        image_bytes: image.bytes,
        client_ip: client_ip(&headers),
    };

    let outcome =
        generation_service::run(&state.config, &state.comfy, &state.store, request).await?;

    Ok(Json(json!({
        "success": true,
        "imageUrl": outcome.image_url,
        "creditsRemaining": outcome.credits_remaining,
        "message": "Professional headshot generated successfully",
    })))
}

/// `GET /api/generate`
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "API is running",
        "timestamp": chrono::Utc::now(),
        "comfyuiUrl": state.config.comfy_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::models::user::{UserMap, UserRecord};
    use crate::routes::tests::body_json;
    use crate::routes::{app_router, AppState};
    use crate::test_support::{closed_port_url, FakeBackend};
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    const BOUNDARY: &str = "gateway-test-boundary";

    struct Part<'a> {
        name: &'a str,
        value: &'a [u8],
        file: Option<(&'a str, &'a str)>,
    }

    fn text<'a>(name: &'a str, value: &'a str) -> Part<'a> {
        Part {
            name,
            value: value.as_bytes(),
            file: None,
        }
    }

    fn file<'a>(mime: &'a str, value: &'a [u8]) -> Part<'a> {
        Part {
            name: "image",
            value,
            file: Some(("face.jpg", mime)),
        }
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part.file {
                Some((filename, mime)) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n",
                        part.name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
                ),
            }
            body.extend_from_slice(part.value);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn post() -> axum::http::request::Builder {
        Request::post("/api/generate")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
    }

    async fn app_with_user(backend_url: &str, credits: i64) -> (tempfile::TempDir, axum::Router) {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::local(dir.path(), backend_url);
        let state = AppState::new(config);

        let mut users = UserMap::new();
        users.insert(
            "u1".into(),
            UserRecord {
                user_id: "u1".into(),
                credits,
                ..Default::default()
            },
        );
        state.store.save_users(users).await.unwrap();

        let workflow = json!({
            "525": { "inputs": { "image": "" } },
            "320": { "inputs": { "text": "" } },
            "12": { "inputs": { "text": "" } },
            "524": { "inputs": {} },
            "14": { "inputs": {} },
        });
        std::fs::write(
            &state.config.workflow_path,
            serde_json::to_vec(&workflow).unwrap(),
        )
        .unwrap();

        (dir, app_router(state))
    }

    fn full_form<'a>(mime: &'a str, image: &'a [u8]) -> Vec<Part<'a>> {
        vec![
            text("environment", "office"),
            text("style", "suit"),
            text("userId", "u1"),
            text("deviceId", "d1"),
            file(mime, image),
        ]
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.0.0.2");
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[tokio::test]
    async fn status_reports_backend_url() {
        let (_dir, app) = app_with_user("http://backend:8188", 1).await;
        let resp = app
            .oneshot(Request::get("/api/generate").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_json(resp).await;
        assert_eq!(body["status"], "API is running");
        assert_eq!(body["comfyuiUrl"], "http://backend:8188");
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let (_dir, app) = app_with_user("http://127.0.0.1:9", 1).await;
        let parts = [text("environment", "office"), file("image/png", b"png")];

        let resp = app
            .oneshot(post().body(Body::from(multipart_body(&parts))).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "Missing required fields");
    }

    #[tokio::test]
    async fn identity_headers_fill_missing_fields() {
        let (_dir, app) = app_with_user(&closed_port_url().await, 0).await;
        let parts = [
            text("environment", "office"),
            text("style", "suit"),
            file("image/png", b"png"),
        ];

        let resp = app
            .oneshot(
                post()
                    .header("x-user-id", "u1")
                    .header("x-device-id", "d1")
                    .body(Body::from(multipart_body(&parts)))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Passed validation and reached the credit check.
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body_json(resp).await["error"], "Insufficient credits");
    }

    #[tokio::test]
    async fn unsupported_type_is_rejected() {
        let (_dir, app) = app_with_user("http://127.0.0.1:9", 1).await;
        let parts = full_form("image/gif", b"gif");

        let resp = app
            .oneshot(post().body(Body::from(multipart_body(&parts))).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await["error"],
            "Invalid file type. Please upload JPG, PNG, or WebP images only."
        );
    }

    #[tokio::test]
    async fn oversized_image_is_rejected() {
        let (_dir, app) = app_with_user("http://127.0.0.1:9", 1).await;
        let big = vec![0u8; 10 * 1024 * 1024 + 1];
        let parts = full_form("image/jpeg", &big);

        let resp = app
            .oneshot(post().body(Body::from(multipart_body(&parts))).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "File too large. Maximum size is 10MB.");
    }

    #[tokio::test]
    async fn successful_generation_returns_image_and_credits() {
        let url = FakeBackend::finished("524", "result.jpg").spawn().await;
        let (_dir, app) = app_with_user(&url, 4).await;
        let parts = full_form("image/jpeg", b"jpeg");

        let resp = app
            .oneshot(
                post()
                    .header("x-forwarded-for", "198.51.100.4")
                    .body(Body::from(multipart_body(&parts)))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["creditsRemaining"], 3);
        assert!(body["imageUrl"].as_str().unwrap().ends_with("filename=result.jpg&subfolder=&type=output"));
    }

    #[tokio::test]
    async fn backend_failure_maps_to_generation_failed() {
        let url = FakeBackend::failed("sampler crashed").spawn().await;
        let (_dir, app) = app_with_user(&url, 4).await;
        let parts = full_form("image/webp", b"webp");

        let resp = app
            .oneshot(post().body(Body::from(multipart_body(&parts))).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "GENERATION_FAILED");
        assert_eq!(body["error"], "Professional headshot generation failed. Please try again.");
        assert!(body["details"].as_str().unwrap().contains("sampler crashed"));
    }
}

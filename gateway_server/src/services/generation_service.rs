//! Orchestration of one headshot generation request.
//!
//! Checks the user, uploads the face image, patches and submits the template
//! workflow, polls for the result, then settles credits and usage records.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;

use rand::Rng;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::config::{GatewayConfig, ImageUrlMode};
use crate::error::{BackendError, GenerationError, StoreError};
use crate::models::generation::GenerationDetails;
use crate::services::comfy_client::{BackendStatus, ComfyClient, ImageRef};
use crate::services::data_store::DataStore;
use crate::services::poller::{self, PollSettings};
use crate::services::queue_tracker::{self, QueueNotice};
use crate::services::workflow_service::{self, HeadshotPatch, SessionValues};
use crate::services::{activity_service, prompt_catalog, user_service};

pub const EVENT_STARTED: &str = "professional_headshot_generation_started";
pub const EVENT_COMPLETED: &str = "professional_headshot_generation_completed";
pub const EVENT_FAILED: &str = "professional_headshot_generation_failed";

static EXTENSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.[A-Za-z0-9]{1,8}$").unwrap());

/// A validated generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub environment: String,
    pub style: String,
    pub user_id: String,
    pub device_id: String,
    pub censored: bool,
    pub image_name: String,
    pub image_mime: String,
    pub image_bytes: Vec<u8>,
    pub client_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub image_url: String,
    pub credits_remaining: i64,
}

/// Upload name `{site}_face_{epoch_ms}_{9 base-36 chars}{ext}`.
///
/// The extension comes from the client's file name when it looks like one,
/// otherwise `.jpg`.
pub fn upload_name(site: &str, original: &str) -> String {
    let ext = Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .filter(|e| EXTENSION_REGEX.is_match(e))
        .unwrap_or_else(|| ".jpg".to_string());

    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| char::from_digit(rng.random_range(0..36), 36).unwrap_or('0'))
        .collect();

    format!(
        "{site}_face_{}_{suffix}{}",
        chrono::Utc::now().timestamp_millis(),
        ext.to_ascii_lowercase()
    )
}

/// Run a generation end to end.
pub async fn run(
    config: &GatewayConfig,
    client: &ComfyClient,
    store: &DataStore,
    req: GenerationRequest,
) -> Result<GenerationOutcome, GenerationError> {
    let started = Instant::now();
    let site = config.site.as_str();

    let user = user_service::get_user(store, &req.user_id).await;
    let Some(user) = user.filter(|u| u.credits >= 1) else {
        tracing::info!(user_id = %req.user_id, "Insufficient credits");
        crate::metrics::generation_finished(site, "insufficient_credits");
        return Err(GenerationError::InsufficientCredits);
    };
    if user.is_blocked {
        tracing::info!(user_id = %req.user_id, "Blocked user attempted generation");
        crate::metrics::generation_finished(site, "blocked");
        return Err(GenerationError::Blocked);
    }

    tracing::info!(
        user_id = %req.user_id,
        environment = %req.environment,
        style = %req.style,
        "Headshot generation started"
    );
    log_event(
        store,
        &req,
        site,
        EVENT_STARTED,
        json!({
            "environment": req.environment,
            "style": req.style,
            "imageSize": req.image_bytes.len(),
            "ipAddress": req.client_ip,
        }),
    )
    .await;

    let template_path = select_template(config, req.censored);
    let result = generate(config, client, &req, template_path).await;
    crate::metrics::generation_duration(started.elapsed().as_millis() as u64);

    match result {
        Ok(image_url) => {
            let credits_remaining = match user_service::consume_credit(store, &req.user_id, site).await {
                Ok(Some(remaining)) => remaining,
                Ok(None) => (user.credits - 1).max(0),
                Err(e) => {
                    tracing::error!(user_id = %req.user_id, "Failed to consume credit: {e}");
                    (user.credits - 1).max(0)
                }
            };

            let details = GenerationDetails {
                environment: Some(req.environment.clone()),
                style: Some(req.style.clone()),
                error: None,
                ip_address: Some(req.client_ip.clone()),
                workflow_used: template_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
            };
            record(store, &req, site, true, details).await;
            log_event(
                store,
                &req,
                site,
                EVENT_COMPLETED,
                json!({
                    "environment": req.environment,
                    "style": req.style,
                    "success": true,
                    "imageUrl": image_url,
                    "ipAddress": req.client_ip,
                }),
            )
            .await;

            crate::metrics::generation_finished(site, "success");
            tracing::info!(user_id = %req.user_id, credits_remaining, "Headshot generation successful");
            Ok(GenerationOutcome {
                image_url,
                credits_remaining,
            })
        }
        Err(e) => {
            let message = e.to_string();
            let details = GenerationDetails {
                environment: Some(req.environment.clone()),
                style: Some(req.style.clone()),
                error: Some(message.clone()),
                ip_address: Some(req.client_ip.clone()),
                workflow_used: None,
            };
            record(store, &req, site, false, details).await;
            log_event(
                store,
                &req,
                site,
                EVENT_FAILED,
                json!({
                    "environment": req.environment,
                    "style": req.style,
                    "error": message,
                    "ipAddress": req.client_ip,
                }),
            )
            .await;

            crate::metrics::generation_finished(site, "failed");
            tracing::error!(user_id = %req.user_id, "Headshot generation failed: {message}");
            Err(e)
        }
    }
}

fn select_template(config: &GatewayConfig, censored: bool) -> &Path {
    match (&config.censored_workflow_path, censored) {
        (Some(path), true) => path,
        _ => &config.workflow_path,
    }
}

/// Backend part of the pipeline: everything between the user checks and the
/// bookkeeping. Returns the image URL handed to the client.
async fn generate(
    config: &GatewayConfig,
    client: &ComfyClient,
    req: &GenerationRequest,
    template_path: &Path,
) -> Result<String, GenerationError> {
    match client.check_status().await {
        BackendStatus::Running => {}
        BackendStatus::Error(reason) | BackendStatus::Offline(reason) => {
            return Err(BackendError::Unavailable(reason).into());
        }
    }

    let template = workflow_service::load_template(template_path).await?;

    let filename = upload_name(&config.site, &req.image_name);
    let uploaded = client
        .upload_image(&filename, &req.image_mime, req.image_bytes.clone())
        .await?;

    let patch = HeadshotPatch {
        uploaded_image: uploaded,
        prompts: prompt_catalog::headshot_prompts(&req.environment, &req.style),
        session: SessionValues::random(&config.site),
    };
    let workflow = workflow_service::patch_headshot(&template, &patch);
    let save_node = workflow_service::save_node_id(&workflow);
    tracing::info!(
        session_id = %patch.session.session_id,
        seed = patch.session.seed,
        "Workflow patched"
    );

    let client_id = format!("{}_{}", config.site, uuid::Uuid::new_v4());
    let prompt_id = client.submit_prompt(&workflow, &client_id).await?;
    tracing::info!(prompt_id = %prompt_id, client_id = %client_id, "Workflow submitted");

    queue_tracker::track(
        config.queue_tracker_url.as_deref(),
        QueueNotice {
            prompt_id: prompt_id.clone(),
            user_id: req.user_id.clone(),
            device_id: req.device_id.clone(),
            environment: req.environment.clone(),
            style: req.style.clone(),
        },
    );

    let image = poller::wait_for_output(
        client,
        &prompt_id,
        save_node,
        PollSettings::from_config(config),
    )
    .await?;

    Ok(image_url(config, client, &image))
}

fn image_url(config: &GatewayConfig, client: &ComfyClient, image: &ImageRef) -> String {
    match config.image_url_mode {
        ImageUrlMode::Direct => client.view_url(image),
        ImageUrlMode::Proxy => image.proxy_url(),
    }
}

async fn record(store: &DataStore, req: &GenerationRequest, site: &str, success: bool, details: GenerationDetails) {
    let result =
        activity_service::record_generation(store, &req.user_id, &req.device_id, site, success, details).await;
    warn_on_store_error(result.map(|_| ()), "record generation");
}

async fn log_event(store: &DataStore, req: &GenerationRequest, site: &str, action: &str, metadata: Value) {
    let metadata = match metadata {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let result =
        activity_service::log_user_event(store, &req.user_id, &req.device_id, action, site, metadata).await;
    warn_on_store_error(result.map(|_| ()), action);
}

fn warn_on_store_error(result: Result<(), StoreError>, what: &str) {
    if let Err(e) = result {
        tracing::warn!("Failed to {what}: {e}");
    }
}

//! `/api/admin`: admin dashboard API behind a bearer shared secret.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::dashboard::kpi;
use crate::error::{ApiError, BackendError};
use crate::routes::AppState;
use crate::services::{activity_service, retention_service, user_service};

type HmacSha256 = Hmac<Sha256>;

const AUTH_CONTEXT: &[u8] = b"studio-gateway-admin";
const MAX_CREDITS_PER_GRANT: i64 = 1000;
const RECENT_LIMIT: usize = 10;
const RECENT_COMPLETED_LIMIT: usize = 10;

/// Compare two secrets through their HMAC tags so timing does not leak the match length.
fn secret_matches(expected: &str, provided: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(AUTH_CONTEXT);
    let tag = mac.finalize().into_bytes();

    let Ok(mut mac) = HmacSha256::new_from_slice(provided.as_bytes()) else {
        return false;
    };
    mac.update(AUTH_CONTEXT);
    mac.verify_slice(&tag).is_ok()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let authorized = match (&state.config.admin_password, bearer_token(headers)) {
        (Some(expected), Some(provided)) => secret_matches(expected, provided),
        _ => false,
    };
    if authorized {
        Ok(())
    } else {
        tracing::warn!("Rejected admin request");
        Err(ApiError::Unauthorized("Unauthorized"))
    }
}

/// `POST /api/admin/verify`
pub async fn verify(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let Some(provided) = bearer_token(&headers) else {
        return Err(ApiError::Unauthorized("Authorization header required"));
    };
    let Some(expected) = &state.config.admin_password else {
        tracing::error!("ADMIN_PASSWORD not set");
        return Err(ApiError::Misconfigured("Admin authentication not configured"));
    };
    if !secret_matches(expected, provided) {
        tracing::warn!("Invalid admin password provided");
        return Err(ApiError::Unauthorized("Invalid password"));
    }

    crate::metrics::admin_action("verify");
    Ok(Json(json!({ "success": true, "message": "Authentication successful" })))
}

#[derive(Debug, Deserialize)]
pub struct TypeQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// `GET /api/admin?type=`
pub async fn query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TypeQuery>,
) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let site = state.config.site.as_str();
    let kind = query.kind.unwrap_or_default();
    crate::metrics::admin_action(&format!("get_{kind}"));

    let response = match kind.as_str() {
        "stats" => Json(kpi::query_site_stats(&state.store, site).await).into_response(),
        "users" => Json(user_service::list_users(&state.store).await).into_response(),
        "generations" => {
            let all = activity_service::list_generations(&state.store).await;
            Json(activity_service::generations_for_site(all, site)).into_response()
        }
        "userEvents" => {
            let all = activity_service::list_events(&state.store).await;
            Json(activity_service::events_for_site(all, site)).into_response()
        }
        "queue" => Json(queue_status(&state).await).into_response(),
        _ => return Err(ApiError::BadRequest("Invalid type parameter".to_string())),
    };
    Ok(response)
}

/// Live view of the backend queue for the dashboard.
async fn queue_status(state: &AppState) -> Value {
    let snapshot = match state.comfy.queue().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!("Backend queue unavailable: {e}");
            return json!({
                "comfyuiStatus": "offline",
                "queue": { "running": [], "pending": [], "recentCompleted": [], "totalInQueue": 0 },
                "timestamp": chrono::Utc::now(),
            });
        }
    };

    let recent_completed: Vec<Value> = match state.comfy.recent_history(RECENT_COMPLETED_LIMIT).await {
        Ok(Value::Object(entries)) => entries
            .iter()
            .map(|(prompt_id, entry)| {
                json!({
                    "promptId": prompt_id,
                    "status": entry.pointer("/status/status_str").cloned().unwrap_or(Value::Null),
                    "completed": entry.pointer("/status/completed").cloned().unwrap_or(Value::Null),
                })
            })
            .collect(),
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::debug!("Backend history unavailable: {e}");
            Vec::new()
        }
    };

    let total = snapshot.running.len() + snapshot.pending.len();
    json!({
        "comfyuiStatus": if total > 0 { "processing" } else { "idle" },
        "queue": {
            "running": snapshot.running,
            "pending": snapshot.pending,
            "recentCompleted": recent_completed,
            "totalInQueue": total,
        },
        "timestamp": chrono::Utc::now(),
    })
}

/// Body of `POST /api/admin`; each action reads the fields it needs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAction {
    pub action: Option<String>,
    pub user_id: Option<String>,
    /// Raw JSON so malformed numbers reach the action's own validation.
    pub amount: Option<Value>,
    pub blocked: Option<bool>,
    pub credits: Option<Value>,
}

impl AdminAction {
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }

    fn amount(&self) -> Option<i64> {
        self.amount.as_ref().and_then(Value::as_i64)
    }

    fn credits(&self) -> Option<i64> {
        self.credits.as_ref().and_then(Value::as_i64)
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e.body_text())))
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".to_string())
}

/// `POST /api/admin`
pub async fn action(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AdminAction>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;
    let body = json_body(body)?;
    let action = body.action.clone().unwrap_or_default();
    crate::metrics::admin_action(&action);
    tracing::info!(action = %action, user_id = ?body.user_id, "Admin action");

    let store = &state.store;
    let site = state.config.site.as_str();

    match action.as_str() {
        "addCredits" => {
            let (Some(user_id), Some(amount)) = (body.user_id(), body.amount().filter(|a| *a > 0)) else {
                return Err(ApiError::BadRequest("Missing userId or invalid amount".to_string()));
            };
            if amount > MAX_CREDITS_PER_GRANT {
                return Err(ApiError::BadRequest(
                    "Cannot add more than 1000 credits at once".to_string(),
                ));
            }
            if !user_service::add_credits(store, user_id, amount).await? {
                return Err(user_not_found());
            }
            Ok(Json(json!({
                "success": true,
                "message": format!("Successfully added {amount} credits to user"),
            })))
        }
        "blockUser" => {
            let (Some(user_id), Some(blocked)) = (body.user_id(), body.blocked) else {
                return Err(ApiError::BadRequest("Missing userId or blocked status".to_string()));
            };
            if !user_service::set_blocked(store, user_id, blocked).await? {
                return Err(user_not_found());
            }
            Ok(Json(json!({
                "success": true,
                "message": format!("User {} successfully", if blocked { "blocked" } else { "unblocked" }),
            })))
        }
        "cleanOldData" => {
            let result = retention_service::clean_old_data(store).await?;
            Ok(Json(json!({
                "success": true,
                "result": result,
                "message": format!(
                    "Cleaned {} events and {} generations",
                    result.events_removed, result.generations_removed
                ),
            })))
        }
        "updateCredits" => {
            let (Some(user_id), Some(credits)) = (body.user_id(), body.credits().filter(|c| *c >= 0)) else {
                return Err(ApiError::BadRequest(
                    "Missing userId or invalid credits value".to_string(),
                ));
            };
            if !user_service::set_credits(store, user_id, credits).await? {
                return Err(user_not_found());
            }
            Ok(Json(json!({
                "success": true,
                "message": format!("Successfully set credits to {credits}"),
            })))
        }
        "getUserDetails" => {
            let Some(user_id) = body.user_id() else {
                return Err(ApiError::BadRequest("Missing userId".to_string()));
            };
            let Some(user) = user_service::get_user(store, user_id).await else {
                return Err(user_not_found());
            };
            let generations = activity_service::list_generations(store).await;
            let events = activity_service::list_events(store).await;
            Ok(Json(json!({
                "success": true,
                "user": user,
                "recentGenerations": activity_service::recent_generations_for_user(&generations, user_id, site, RECENT_LIMIT),
                "recentEvents": activity_service::recent_events_for_user(&events, user_id, site, RECENT_LIMIT),
            })))
        }
        "getSystemInfo" => {
            let config = &state.config;
            Ok(Json(json!({
                "success": true,
                "systemInfo": {
                    "timestamp": chrono::Utc::now(),
                    "hasAdminPassword": config.admin_password.is_some(),
                    "hasComfyUrl": config.comfy_url_configured,
                    "comfyUrl": if config.comfy_url_configured { config.comfy_url.as_str() } else { "Not set" },
                    "uptime": state.started_at.elapsed().as_secs_f64(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "site": config.site,
                    "dataDir": store.data_dir().await.display().to_string(),
                },
            })))
        }
        "testComfyUI" => {
            let comfy_url = state.comfy.base_url();
            Ok(Json(match state.comfy.system_stats().await {
                Ok(stats) => json!({
                    "success": true,
                    "message": "ComfyUI is accessible",
                    "comfyStats": stats,
                }),
                Err(BackendError::Status { status, .. }) => json!({
                    "success": false,
                    "message": format!("ComfyUI returned HTTP {status}"),
                    "comfyUrl": comfy_url,
                }),
                Err(e) => json!({
                    "success": false,
                    "message": "Cannot connect to ComfyUI",
                    "error": e.to_string(),
                    "comfyUrl": comfy_url,
                }),
            }))
        }
        _ => Err(ApiError::BadRequest("Invalid action".to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActionQuery {
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub user_id: Option<String>,
    pub credits: Option<i64>,
    pub is_blocked: Option<bool>,
}

/// `PUT /api/admin?action=user`
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
    body: Result<Json<UserUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;
    if query.action.as_deref() != Some("user") {
        return Err(ApiError::BadRequest("Invalid PUT action".to_string()));
    }
    let body = json_body(body)?;
    crate::metrics::admin_action("updateUser");

    let Some(user_id) = body.user_id.as_deref().filter(|id| !id.is_empty()) else {
        return Err(ApiError::BadRequest("Missing userId".to_string()));
    };

    let mut updated = true;
    if let Some(credits) = body.credits {
        updated = updated && user_service::set_credits(&state.store, user_id, credits).await?;
    }
    if let Some(blocked) = body.is_blocked {
        updated = updated && user_service::set_blocked(&state.store, user_id, blocked).await?;
    }
    if body.credits.is_none() && body.is_blocked.is_none() {
        updated = user_service::get_user(&state.store, user_id).await.is_some();
    }

    if !updated {
        return Err(ApiError::NotFound("User not found or update failed".to_string()));
    }
    Ok(Json(json!({ "success": true, "message": "User updated successfully" })))
}

/// `DELETE /api/admin?action=oldData`
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;
    if query.action.as_deref() != Some("oldData") {
        return Err(ApiError::BadRequest("Invalid DELETE action".to_string()));
    }
    crate::metrics::admin_action("deleteOldData");

    let result = retention_service::clean_old_data(&state.store).await?;
    Ok(Json(json!({
        "success": true,
        "result": result,
        "message": format!(
            "Deleted {} old events and {} old generations",
            result.events_removed, result.generations_removed
        ),
    })))
}

//! Image proxy: serves backend output images to the sites.

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};

use crate::error::{ApiError, BackendError};
use crate::routes::AppState;
use crate::services::comfy_client::ImageRef;

/// `GET /api/image?filename&subfolder&type`: stream an output image from the backend.
pub async fn proxy(
    State(state): State<AppState>,
    Query(image): Query<ImageRef>,
) -> Result<Response, ApiError> {
    let (content_type, bytes) = match state.comfy.view_bytes(&image).await {
        Ok(found) => found,
        Err(BackendError::Status { status: 404, .. }) => {
            return Err(ApiError::NotFound("Image not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let content_type = content_type.unwrap_or_else(|| "image/png".to_string());
    Ok(([(CONTENT_TYPE, content_type)], bytes).into_response())
}

use axum::{
    extract::{Multipart, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    middleware::auth::AuthenticatedUser,
    models::UploadedFile,
    services::QuotaManager,
};

#[derive(Debug, Deserialize)]
pub struct DescribeRequest {
    pub make: String,
    pub model: String,
    pub year: i32,
}

fn ensure_configured(state: &AppState) -> Result<()> {
    if state.ai.is_configured() {
        Ok(())
    } else {
        Err(AppError::ExternalService(
            "AI service is not configured".to_string(),
        ))
    }
}

fn record<T>(state: &AppState, operation: &str, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(AppError::ExternalService(_)) => "upstream_error",
        Err(_) => "error",
    };
    state.metrics.record_ai_request(operation, outcome);
}

#[tracing::instrument(skip(state, user, multipart), fields(user_id = user.id))]
pub async fn analyze_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed form data: {}", e)))?
    {
        if field.name() == Some("image") {
            let content_type = field.content_type().map(|s| s.to_string());
            let file_name = field.file_name().map(|s| s.to_string());
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
            upload = Some(UploadedFile {
                data,
                content_type,
                file_name,
            });
            break;
        }
    }

    let upload = upload.ok_or_else(|| AppError::Validation("image is required".to_string()))?;
    let mime_type = state.uploads.validate(&upload)?;
    ensure_configured(&state)?;

    let quota = state.quota.consume(user.id, QuotaManager::today()).await?;
    let result = state
        .ai
        .analyze_image(&upload.data, mime_type.essence_str())
        .await;
    record(&state, "analyze_image", &result);

    Ok(Json(json!({
        "data": result?,
        "quota": quota
    })))
}

pub async fn describe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<DescribeRequest>,
) -> Result<Json<serde_json::Value>> {
    let make = request.make.trim();
    let model = request.model.trim();
    if make.is_empty() || model.is_empty() {
        return Err(AppError::Validation(
            "make and model are required".to_string(),
        ));
    }
    ensure_configured(&state)?;

    let quota = state.quota.consume(user.id, QuotaManager::today()).await?;
    let result = state.ai.generate_description(make, model, request.year).await;
    record(&state, "describe", &result);

    Ok(Json(json!({
        "data": { "description": result? },
        "quota": quota
    })))
}

pub async fn quota(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>> {
    let status = state.quota.status(user.id, QuotaManager::today()).await?;
    Ok(Json(json!({ "data": status })))
}

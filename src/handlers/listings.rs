use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::json;
use std::collections::HashMap;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    middleware::auth::AuthenticatedUser,
    models::{DeleteOutcome, ListingFilter, NewListing, UpdateListing, UploadedFile},
    services::QuotaManager,
};

/// Form fields that carry listing photos.
const IMAGE_FIELDS: &[&str] = &["images", "image", "images[]"];

pub async fn browse(
    State(state): State<AppState>,
    Query(filter): Query<ListingFilter>,
) -> Result<Json<serde_json::Value>> {
    let listings = state.listings.list_all(&filter).await?;
    Ok(Json(json!({ "data": listings })))
}

#[tracing::instrument(skip(state, user, multipart), fields(user_id = user.id))]
pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let (fields, images) = read_listing_form(multipart).await?;
    let listing = NewListing::from_fields(&fields)?;

    let created = state.listings.create(user.id, listing, &images).await?;
    state.metrics.record_listing_created();

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Listing created",
            "data": created
        })),
    ))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let details = state.listings.view(id).await?;
    Ok(Json(json!({ "data": details })))
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(changes): Json<UpdateListing>,
) -> Result<Json<serde_json::Value>> {
    let car = state.listings.update(id, user.id, changes).await?;
    Ok(Json(json!({
        "message": "Listing updated",
        "data": car
    })))
}

/// A refused delete answers like a no-op rather than an error.
pub async fn delete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    match state.listings.delete(id, user.id).await? {
        DeleteOutcome::Deleted { files_removed } => {
            state.metrics.record_listing_deleted();
            Ok(Json(json!({
                "deleted": true,
                "files_removed": files_removed
            })))
        }
        DeleteOutcome::Refused => Ok(Json(json!({ "deleted": false }))),
    }
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let favorited = state.favorites.toggle(user.id, id).await?;
    state.metrics.record_favorite_toggle(favorited);
    Ok(Json(json!({ "favorited": favorited })))
}

/// Asks the model for a price range and stores it on the listing.
pub async fn valuation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let car = state.listings.get(id).await?;
    if car.user_id != user.id && !user.is_admin {
        return Err(AppError::Forbidden);
    }
    if !state.ai.is_configured() {
        return Err(AppError::ExternalService(
            "AI service is not configured".to_string(),
        ));
    }

    let quota = state.quota.consume(user.id, QuotaManager::today()).await?;
    let valuation = match state.ai.estimate_value(&car).await {
        Ok(valuation) => {
            state.metrics.record_ai_request("valuation", "ok");
            valuation
        }
        Err(e) => {
            state.metrics.record_ai_request("valuation", "error");
            return Err(e);
        }
    };

    state
        .listings
        .set_valuation(id, &serde_json::to_string(&valuation)?)
        .await?;

    Ok(Json(json!({
        "data": valuation,
        "quota": quota
    })))
}

pub async fn my_listings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>> {
    let listings = state.listings.list_by_owner(user.id).await?;
    Ok(Json(json!({ "data": listings })))
}

pub async fn my_favorites(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>> {
    let listings = state.favorites.list(user.id).await?;
    Ok(Json(json!({ "data": listings })))
}

pub async fn user_listings(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let listings = state.listings.list_by_owner(user_id).await?;
    Ok(Json(json!({ "data": listings })))
}

/// Splits a create-listing form into text fields and photos. Empty file parts
/// (a file input left blank) are dropped.
async fn read_listing_form(
    mut multipart: Multipart,
) -> Result<(HashMap<String, String>, Vec<UploadedFile>)> {
    let mut fields = HashMap::new();
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed form data: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        let file_name = field.file_name().map(|s| s.to_string());

        if IMAGE_FIELDS.contains(&name.as_str()) || file_name.is_some() {
            let content_type = field.content_type().map(|s| s.to_string());
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
            if data.is_empty() {
                continue;
            }
            images.push(UploadedFile {
                data,
                content_type,
                file_name,
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::Validation(format!("Failed to read field {}: {}", name, e)))?;
            fields.insert(name, value);
        }
    }

    Ok((fields, images))
}

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use flate2::{write::GzEncoder, Compression};
use serde_json::json;
use std::io::Write;

use crate::{
    database::queries::{CarQueries, FavoriteQueries, ImageQueries, UserQueries},
    errors::{AppError, Result},
    handlers::AppState,
    middleware::auth::AdminUser,
    models::UserResponse,
};

/// Every table as JSON. Password hashes are left out.
#[tracing::instrument(skip(state, admin), fields(admin_id = admin.0.id))]
pub async fn export_data(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Json<serde_json::Value>> {
    let pool = state.database.pool();
    let users: Vec<UserResponse> = UserQueries::all(pool)
        .await?
        .into_iter()
        .map(UserResponse::from)
        .collect();
    let cars = CarQueries::all(pool).await?;
    let images = ImageQueries::all(pool).await?;
    let favorites = FavoriteQueries::all(pool).await?;

    tracing::info!(users = users.len(), cars = cars.len(), "data export");

    Ok(Json(json!({
        "users": users,
        "cars": cars,
        "images": images,
        "favorites": favorites,
        "exported_at": Utc::now().to_rfc3339()
    })))
}

/// Gzipped snapshot of the whole database file.
#[tracing::instrument(skip(state, admin), fields(admin_id = admin.0.id))]
pub async fn export_database(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<impl IntoResponse> {
    let dir = tempfile::tempdir()?;
    let snapshot = dir.path().join("snapshot.db");
    let snapshot_path = snapshot
        .to_str()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Snapshot path is not valid UTF-8")))?
        .to_string();

    sqlx::query("VACUUM INTO ?")
        .bind(&snapshot_path)
        .execute(state.database.pool())
        .await?;

    let raw = tokio::fs::read(&snapshot).await?;
    let compressed = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        encoder.finish()
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))??;

    tracing::info!(bytes = compressed.len(), "database export");

    let filename = format!(
        "attachment; filename=\"cars-{}.db.gz\"",
        Utc::now().format("%Y%m%dT%H%M%S")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        compressed,
    ))
}

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub car_id: i64,
    /// Public URL path, e.g. `/static/uploads/<token>.jpg`.
    pub path: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Favorite {
    pub user_id: i64,
    pub car_id: i64,
}

/// An image received from a client, before it is stored.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub data: axum::body::Bytes,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub key: String,
    pub url: String,
}

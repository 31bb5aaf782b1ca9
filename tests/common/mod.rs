#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use car_classifieds::{
    config::{AiConfig, Config, SessionConfig, SweeperConfig},
    create_app,
    database::{queries::UserQueries, Database},
    handlers::AppState,
    models::User,
    storage::{LocalStorage, Storage},
};
use std::{path::Path, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "X-CAR-CLASSIFIEDS-BOUNDARY";
pub const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00\x01\x01\x00\x00\x01";

pub fn test_config(root: &Path, ai_base_url: &str, ai_api_key: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: format!("sqlite://{}", root.join("test.db").display()),
        upload_dir: root.join("uploads").display().to_string(),
        public_upload_prefix: "/static/uploads".to_string(),
        max_file_size: 1024 * 1024,
        max_images_per_listing: 5,
        allowed_mime_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
        admin_user_id: 1,
        session: SessionConfig {
            secret: "integration-secret".to_string(),
            cookie_name: "session".to_string(),
            ttl_hours: 1,
        },
        ai: AiConfig {
            base_url: ai_base_url.to_string(),
            api_key: ai_api_key.to_string(),
            model: "test-model".to_string(),
            timeout_secs: 2,
            daily_limit: 2,
        },
        sweeper: SweeperConfig {
            enabled: false,
            retention_days: 30,
            interval_secs: 3600,
        },
    }
}

pub async fn migrated_database(root: &Path) -> Database {
    let url = format!("sqlite://{}", root.join("test.db").display());
    let database = Database::new(&url).await.unwrap();
    database.migrate().await.unwrap();
    database
}

pub fn local_storage(root: &Path) -> Arc<dyn Storage> {
    Arc::new(LocalStorage::new(root.join("uploads")).unwrap())
}

pub async fn create_user(database: &Database, username: &str) -> User {
    UserQueries::create(
        database.pool(),
        username,
        &format!("{}@example.com", username),
        "not-a-real-hash",
        "Vilnius",
    )
    .await
    .unwrap()
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub app: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_ai("http://127.0.0.1:9", "").await
    }

    pub async fn with_ai(base_url: &str, api_key: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), base_url, api_key);
        let database = migrated_database(dir.path()).await;
        let storage = local_storage(dir.path());
        let state = AppState::from_parts(config, database, storage).unwrap();
        let app = create_app(state.clone());
        Self { dir, state, app }
    }

    pub fn upload_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("uploads")
    }

    /// Creates a user and returns it with a bearer token for it.
    pub async fn user(&self, username: &str) -> (User, String) {
        let user = create_user(&self.state.database, username).await;
        let token = self.state.sessions.issue(user.id).unwrap();
        (user, token)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, _, body) = self.send(request).await;
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        field: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                field,
                file_name,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        field, file_name, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, token: Option<&str>, parts: &[Part<'_>]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(multipart_body(parts))).unwrap()
}

pub fn listing_fields() -> Vec<Part<'static>> {
    vec![
        Part::Text("make", "Toyota"),
        Part::Text("model", "Corolla"),
        Part::Text("year", "2015"),
        Part::Text("price", "9500"),
        Part::Text("phone", "+370 600 00000"),
        Part::Text("mileage", "120000"),
        Part::Text("fuel_type", "petrol"),
    ]
}

use serde::Deserialize;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub cookie_name: String,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Requests per user per UTC calendar day.
    pub daily_limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub retention_days: i64,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub upload_dir: String,
    pub public_upload_prefix: String,
    pub max_file_size: usize,
    pub max_images_per_listing: usize,
    pub allowed_mime_types: Vec<String>,
    pub admin_user_id: i64,
    pub session: SessionConfig,
    pub ai: AiConfig,
    pub sweeper: SweeperConfig,
}

impl Config {
    /// Defaults, then `config/default` and `config/local` if present, then
    /// the environment (`AI__API_KEY`, `SWEEPER__RETENTION_DAYS`, ...).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 3000)?
            .set_default("database_url", "sqlite://cars.db")?
            .set_default("upload_dir", "./static/uploads")?
            .set_default("public_upload_prefix", "/static/uploads")?
            .set_default("max_file_size", 10 * 1024 * 1024)?
            .set_default("max_images_per_listing", 10)?
            .set_default(
                "allowed_mime_types",
                vec!["image/jpeg", "image/png", "image/webp", "image/gif"],
            )?
            .set_default("admin_user_id", 1)?
            .set_default("session.secret", "")?
            .set_default("session.cookie_name", "session")?
            .set_default("session.ttl_hours", 24 * 7)?
            .set_default("ai.base_url", "https://generativelanguage.googleapis.com")?
            .set_default("ai.api_key", "")?
            .set_default("ai.model", "gemini-1.5-flash")?
            .set_default("ai.timeout_secs", 30)?
            .set_default("ai.daily_limit", 10)?
            .set_default("sweeper.enabled", true)?
            .set_default("sweeper.retention_days", 30)?
            .set_default("sweeper.interval_secs", 60 * 60)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("allowed_mime_types")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.secret.trim().is_empty() {
            return Err(AppError::Config(
                "SESSION__SECRET must be set".to_string(),
            ));
        }
        if self.sweeper.retention_days <= 0 {
            return Err(AppError::Config(
                "sweeper.retention_days must be positive".to_string(),
            ));
        }
        let prefix = self.public_upload_prefix.trim_end_matches('/');
        if !prefix.is_empty() && !prefix.starts_with('/') {
            return Err(AppError::Config(
                "public_upload_prefix must start with '/'".to_string(),
            ));
        }
        if self.ai.daily_limit < 0 {
            return Err(AppError::Config(
                "ai.daily_limit must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ai_enabled(&self) -> bool {
        !self.ai.api_key.trim().is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_config(root: &std::path::Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: format!("sqlite://{}", root.join("test.db").display()),
        upload_dir: root.join("uploads").display().to_string(),
        public_upload_prefix: "/static/uploads".to_string(),
        max_file_size: 1024 * 1024,
        max_images_per_listing: 10,
        allowed_mime_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
        admin_user_id: 1,
        session: SessionConfig {
            secret: "test-secret".to_string(),
            cookie_name: "session".to_string(),
            ttl_hours: 1,
        },
        ai: AiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: String::new(),
            model: "test-model".to_string(),
            timeout_secs: 1,
            daily_limit: 3,
        },
        sweeper: SweeperConfig {
            enabled: false,
            retention_days: 30,
            interval_secs: 3600,
        },
    }
}

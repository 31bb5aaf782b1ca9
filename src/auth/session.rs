use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::errors::{AppError, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: i64,
    pub iat: i64,
}

/// Signs and checks the session token carried in the session cookie.
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    cookie_name: String,
    ttl: Duration,
}

impl SessionService {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            cookie_name: config.cookie_name.clone(),
            ttl: Duration::hours(config.ttl_hours),
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to sign session: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<i64> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| AppError::Auth(format!("Invalid session: {}", e)))?;

        Ok(token_data.claims.sub)
    }

    pub fn set_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            token,
            self.ttl.num_seconds()
        )
    }

    pub fn clear_cookie(&self) -> String {
        format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", self.cookie_name)
    }

    /// Session token from the cookie, else from an `Authorization: Bearer` header.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        let from_cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.cookie_name && !value.is_empty())
            .map(|(_, value)| value.to_string());

        from_cookie.or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> SessionService {
        SessionService::new(&SessionConfig {
            secret: "test-secret".to_string(),
            cookie_name: "session".to_string(),
            ttl_hours: 1,
        })
    }

    #[test]
    fn test_issue_and_verify() {
        let sessions = service();
        let token = sessions.issue(42).unwrap();
        assert_eq!(sessions.verify(&token).unwrap(), 42);
        assert!(sessions.verify("garbage").is_err());
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let other = SessionService::new(&SessionConfig {
            secret: "other-secret".to_string(),
            cookie_name: "session".to_string(),
            ttl_hours: 1,
        });
        let token = other.issue(1).unwrap();
        assert!(matches!(service().verify(&token), Err(AppError::Auth(_))));
    }

    #[test]
    fn test_token_from_cookie_or_bearer() {
        let sessions = service();

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc"));
        assert_eq!(sessions.token_from_headers(&headers).as_deref(), Some("abc"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(sessions.token_from_headers(&headers).as_deref(), Some("xyz"));

        assert!(sessions.token_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_cookie_strings() {
        let sessions = service();
        let cookie = sessions.set_cookie("abc");
        assert!(cookie.starts_with("session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(sessions.clear_cookie().contains("Max-Age=0"));
    }
}

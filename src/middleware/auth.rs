use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::{
    database::queries::UserQueries,
    errors::AppError,
    handlers::AppState,
};

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

/// An authenticated user whose id is the configured super-admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = state
            .sessions
            .token_from_headers(&parts.headers)
            .ok_or_else(|| AppError::Auth("Authentication required".to_string()))?;

        let user_id = state.sessions.verify(&token)?;

        // The account may have been removed since the session was issued.
        let user = UserQueries::find_by_id(state.database.pool(), user_id)
            .await?
            .ok_or_else(|| AppError::Auth("User not found".to_string()))?;

        Ok(AuthenticatedUser {
            id: user.id,
            username: user.username,
            is_admin: user.id == state.config.admin_user_id,
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            tracing::warn!(user_id = user.id, "non-admin attempted an admin action");
            return Err(AppError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

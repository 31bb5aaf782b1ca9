use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::{
    auth::PasswordService,
    database::queries::UserQueries,
    errors::{AppError, Result},
    handlers::AppState,
    middleware::auth::AuthenticatedUser,
    models::{AuthResponse, CreateUserRequest, LoginRequest, UserResponse},
    services::QuotaManager,
};

#[tracing::instrument(skip(state, request), fields(username = %request.username))]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    let username = request.username.trim();
    let email = request.email.trim();

    PasswordService::validate_username(username)?;
    PasswordService::validate_email(email)?;
    PasswordService::validate_password_strength(&request.password)?;

    let password_hash = PasswordService::hash_password(&request.password)?;

    let user = UserQueries::create(
        state.database.pool(),
        username,
        email,
        &password_hash,
        request.location.trim(),
    )
    .await
    .map_err(|e| match e {
        AppError::Database(ref db)
            if db
                .as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false) =>
        {
            AppError::Validation("Username or email is already registered".to_string())
        }
        other => other,
    })?;

    let token = state.sessions.issue(user.id)?;
    let cookie = state.sessions.set_cookie(&token);
    tracing::info!(user_id = user.id, "user registered");

    let response = AuthResponse {
        token,
        user: UserResponse::from(user),
    };

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "message": "User registered successfully",
            "data": response
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let invalid = || AppError::Auth("Invalid username or password".to_string());

    let user = UserQueries::find_by_login(state.database.pool(), request.login.trim())
        .await?
        .ok_or_else(invalid)?;

    if !PasswordService::verify_password(&request.password, &user.password_hash) {
        tracing::info!(user_id = user.id, "failed login");
        return Err(invalid());
    }

    let token = state.sessions.issue(user.id)?;
    let cookie = state.sessions.set_cookie(&token);

    let response = AuthResponse {
        token,
        user: UserResponse::from(user),
    };

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "message": "Login successful",
            "data": response
        })),
    ))
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, state.sessions.clear_cookie())],
        Json(json!({ "message": "Logged out" })),
    )
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>> {
    let account = UserQueries::find_by_id(state.database.pool(), user.id)
        .await?
        .ok_or(AppError::NotFound)?;
    let quota = state.quota.status(user.id, QuotaManager::today()).await?;

    Ok(Json(json!({
        "data": {
            "user": UserResponse::from(account),
            "is_admin": user.is_admin,
            "ai_quota": quota
        }
    })))
}

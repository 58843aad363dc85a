use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState,
    errors::AppError,
    middleware::auth::{BearerToken, CurrentUser, bearer_token},
};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Deserialize)]
pub struct RegisterRequest {
    email: String,
    name: String,
    password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&payload.email);
    let name = payload.name.trim();

    if email.is_empty() || name.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation("email, name and password are required".to_string()));
    }
    if !is_plausible_email(&email) {
        return Err(AppError::Validation("invalid email format".to_string()));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }

    let (user, tokens) = state.auth.register(&email, name, &payload.password).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "user": user,
            "tokens": tokens,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation("email and password are required".to_string()));
    }

    let (user, tokens) = state.auth.login(&email, &payload.password).await?;

    Ok(Json(json!({
        "message": "Login successful",
        "user": user,
        "tokens": tokens,
    })))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.refresh_token.trim().is_empty() {
        return Err(AppError::Validation("refresh token is required".to_string()));
    }

    let grant = state.credentials.refresh(payload.refresh_token.trim()).await?;

    Ok(Json(json!({
        "message": "Token refreshed successfully",
        "tokens": grant,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;

    state.credentials.revoke(token).await;

    Ok(Json(json!({ "message": "Logout successful" })))
}

pub async fn logout_all(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.revoke_all(user.id).await?;
    state.credentials.revoke(&token).await;

    Ok(Json(json!({ "message": "All sessions revoked" })))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.current_password.is_empty() || payload.new_password.is_empty() {
        return Err(AppError::Validation(
            "current password and new password are required".to_string(),
        ));
    }
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "new password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }

    state
        .auth
        .change_password(&user, &payload.current_password, &payload.new_password, &token)
        .await?;

    Ok(Json(json!({ "message": "Password changed successfully" })))
}

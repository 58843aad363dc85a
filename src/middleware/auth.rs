use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::{AppState, errors::AppError, models::user::Principal};

#[derive(Clone)]
pub struct CurrentUser(pub Principal);

/// The raw bearer token the current request was authenticated with.
#[derive(Clone)]
pub struct BearerToken(pub String);

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .ok_or(AppError::Unauthorized)?
        .to_string();

    let user = state.credentials.identity_from_token(&token).await?;

    request.extensions_mut().insert(CurrentUser(user));
    request.extensions_mut().insert(BearerToken(token));

    Ok(next.run(request).await)
}

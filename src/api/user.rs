use axum::{Json, extract::Extension, response::IntoResponse};
use serde_json::json;

use crate::middleware::auth::CurrentUser;

pub async fn get_current_user(Extension(CurrentUser(user)): Extension<CurrentUser>) -> impl IntoResponse {
    Json(json!({ "user": user }))
}

pub mod auth_service;
pub mod credential_service;
pub mod identity;
pub mod rate_limit_service;

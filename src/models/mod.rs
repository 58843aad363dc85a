pub mod jwt;
pub mod rate_limit;
pub mod user;

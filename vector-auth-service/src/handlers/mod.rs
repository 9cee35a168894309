//! HTTP handlers for vector-auth-service.

pub mod auth;
pub mod metrics;
pub mod user;

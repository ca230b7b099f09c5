//! Courier API - HTTP control surface
//!
//! This crate exposes the campaign lifecycle operations, campaign reports
//! and the provider webhook intake over HTTP.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

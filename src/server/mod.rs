//! HTTP ingress for the gateway.
//!
//! # Endpoints
//!
//! - `GET  /health`              — liveness probe
//! - `POST /v1/chat/completions` — OpenAI-compatible chat API
//! - `POST /v1/messages`         — Anthropic-compatible messages API

pub mod routes;

pub use routes::{app_router, AppState};

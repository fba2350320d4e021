//! luthien-gateway HTTP server binary.
//!
//! Starts the axum gateway with the policy, upstream provider, and event
//! sinks configured from the environment.
//!
//! # Environment Variables
//!
//! - `GATEWAY_PORT` — HTTP port (default: 8000)
//! - `PROXY_API_KEY` — credential clients must present (unset disables auth)
//! - `POLICY_CONFIG` — path to the policy YAML (default policy: NoOp)
//! - `POLICY_TIMEOUT_SECONDS` — policy inactivity timeout (unset disables)
//! - `UPSTREAM_BASE_URL` — OpenAI-compatible upstream (default: api.openai.com/v1)
//! - `UPSTREAM_API_KEY` / `OPENAI_API_KEY` — upstream credential
//! - `REDIS_URL` — enables the Redis pub/sub sink
//! - `DATABASE_URL` — enables the Postgres sink (requires `--features postgres`)
//! - `OTEL_ENDPOINT` — OTLP collector endpoint
//! - `MAX_REQUEST_SIZE` — request body cap in bytes (default: 10 MiB)
//! - `RUST_LOG` — tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! # or with the database sink:
//! cargo run --bin server --features postgres
//! ```

use std::sync::Arc;

use anyhow::Context;

use luthien_gateway::config::{load_policy_from_yaml, GatewayConfig};
use luthien_gateway::llm::provider::OpenAiCompatProvider;
use luthien_gateway::observability::emitter::{EventEmitter, EventSink};
use luthien_gateway::observability::sinks::{RedisSink, SpanSink, StdoutSink};
use luthien_gateway::policy::noop::NoOpPolicy;
use luthien_gateway::policy::Policy;
use luthien_gateway::server::{app_router, AppState};
use luthien_gateway::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("reading configuration")?;
    telemetry::init(config.otel_endpoint.as_deref());

    let policy: Arc<dyn Policy> = match &config.policy_config {
        Some(path) => load_policy_from_yaml(path).context("loading policy config")?,
        None => Arc::new(NoOpPolicy),
    };
    tracing::info!(policy = policy.name(), "policy loaded");

    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(StdoutSink), Box::new(SpanSink)];
    if let Some(redis_url) = &config.redis_url {
        match RedisSink::connect(redis_url).await {
            Ok(sink) => {
                tracing::info!("redis sink connected");
                sinks.push(Box::new(sink));
            }
            Err(err) => tracing::warn!(%err, "redis sink unavailable, continuing without it"),
        }
    }
    #[cfg(feature = "postgres")]
    if let Some(database_url) = &config.database_url {
        match sqlx::PgPool::connect(database_url).await {
            Ok(pool) => {
                tracing::info!("database sink connected");
                sinks.push(Box::new(
                    luthien_gateway::observability::sinks::DatabaseSink::new(pool),
                ));
            }
            Err(err) => tracing::warn!(%err, "database sink unavailable, continuing without it"),
        }
    }
    #[cfg(not(feature = "postgres"))]
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL set but the 'postgres' feature is not enabled");
    }
    let emitter = EventEmitter::new(sinks);

    let provider = Arc::new(OpenAiCompatProvider::new(
        config.upstream_base_url.clone(),
        config.upstream_api_key.clone(),
    ));

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let state = AppState {
        config: Arc::new(config),
        policy,
        provider,
        emitter,
    };
    let app = app_router(state);

    tracing::info!("luthien-gateway starting on {bind_addr}");
    tracing::info!("  GET  /health              — liveness probe");
    tracing::info!("  POST /v1/chat/completions — OpenAI-compatible chat");
    tracing::info!("  POST /v1/messages         — Anthropic-compatible messages");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server failed")?;

    Ok(())
}

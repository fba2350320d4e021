//! Env-driven gateway configuration and the YAML policy loader.
//!
//! The policy file is a mapping:
//!
//! ```yaml
//! policy:
//!   class: "luthien_gateway::policy::sql_protection:SqlProtectionPolicy"
//!   config: {}
//! ```
//!
//! Rust has no dynamic import, so the class path resolves against a registry
//! of compiled-in policy constructors; the final `:<Class>` segment selects
//! the constructor.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::policy::all_caps::AllCapsPolicy;
use crate::policy::noop::NoOpPolicy;
use crate::policy::sql_protection::SqlProtectionPolicy;
use crate::policy::Policy;

/// Default maximum HTTP request payload size (10 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Default gateway listen port.
pub const DEFAULT_GATEWAY_PORT: u16 = 8000;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Redis connection URL for the pub/sub sink.
    pub redis_url: Option<String>,
    /// Postgres connection URL for the database sink.
    pub database_url: Option<String>,
    /// Credential clients must present; `None` disables auth.
    pub proxy_api_key: Option<String>,
    /// Credential for admin endpoints.
    pub admin_api_key: Option<String>,
    /// OTLP collector endpoint.
    pub otel_endpoint: Option<String>,
    /// Path to the policy YAML.
    pub policy_config: Option<PathBuf>,
    /// Maximum request body size in bytes.
    pub max_request_size: usize,
    /// Upstream base URL (OpenAI-compatible).
    pub upstream_base_url: String,
    /// Upstream API key.
    pub upstream_api_key: Option<String>,
    /// Policy inactivity timeout.
    pub policy_timeout: Option<Duration>,
    /// Listen port.
    pub port: u16,
}

impl GatewayConfig {
    /// Read configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let max_request_size = match env::var("MAX_REQUEST_SIZE") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| GatewayError::Config(format!("MAX_REQUEST_SIZE is not a size: {raw}")))?,
            Err(_) => DEFAULT_MAX_REQUEST_SIZE,
        };
        let port = match env::var("GATEWAY_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| GatewayError::Config(format!("GATEWAY_PORT is not a port: {raw}")))?,
            Err(_) => DEFAULT_GATEWAY_PORT,
        };
        let policy_timeout = match env::var("POLICY_TIMEOUT_SECONDS") {
            Ok(raw) => {
                let seconds: f64 = raw.parse().map_err(|_| {
                    GatewayError::Config(format!("POLICY_TIMEOUT_SECONDS is not a number: {raw}"))
                })?;
                Some(Duration::from_secs_f64(seconds))
            }
            Err(_) => None,
        };

        Ok(Self {
            redis_url: env::var("REDIS_URL").ok(),
            database_url: env::var("DATABASE_URL").ok(),
            proxy_api_key: env::var("PROXY_API_KEY").ok(),
            admin_api_key: env::var("ADMIN_API_KEY").ok(),
            otel_endpoint: env::var("OTEL_ENDPOINT").ok(),
            policy_config: env::var("POLICY_CONFIG").ok().map(PathBuf::from),
            max_request_size,
            upstream_base_url: env::var("UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            upstream_api_key: env::var("UPSTREAM_API_KEY")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok(),
            policy_timeout,
            port,
        })
    }
}

// ---------------------------------------------------------------------------
// Policy YAML loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PolicyFile {
    policy: PolicySection,
}

#[derive(Debug, Deserialize)]
struct PolicySection {
    class: String,
    #[serde(default)]
    config: Value,
}

/// Load a policy from a YAML config file.
pub fn load_policy_from_yaml(path: &Path) -> Result<Arc<dyn Policy>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::Config(format!("policy config not found at {}: {e}", path.display()))
    })?;
    let file: PolicyFile = serde_yaml::from_str(&raw)
        .map_err(|e| GatewayError::Config(format!("invalid policy config {}: {e}", path.display())))?;
    build_policy(&file.policy.class, &file.policy.config)
}

/// Resolve a `module.path:ClassName` reference against the registry of
/// compiled-in policies.
pub fn build_policy(class_ref: &str, config: &Value) -> Result<Arc<dyn Policy>> {
    let class_name = class_ref
        .rsplit(':')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            GatewayError::Config(format!(
                "policy class reference must be 'module:ClassName', got: {class_ref}"
            ))
        })?;

    if !config.is_null() && config.as_object().is_some_and(|m| !m.is_empty()) {
        tracing::debug!(class = class_name, ?config, "policy config supplied");
    }

    match class_name {
        "NoOpPolicy" => Ok(Arc::new(NoOpPolicy)),
        "AllCapsPolicy" => Ok(Arc::new(AllCapsPolicy)),
        "SqlProtectionPolicy" => Ok(Arc::new(SqlProtectionPolicy)),
        other => Err(GatewayError::Config(format!(
            "unknown policy class '{other}' (known: NoOpPolicy, AllCapsPolicy, SqlProtectionPolicy)"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

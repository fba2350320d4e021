//! # Luthien Gateway
//!
//! An AI-control proxy gateway that sits between untrusted clients and an
//! LLM provider, enforcing pluggable policies on every request and response,
//! including streaming responses, and emitting observability events to
//! external sinks.
//!
//! The streaming pipeline is the heart of the crate: upstream chunks in a
//! common intermediate representation flow through a stateful block
//! assembler, a policy executor with a keepalive-based inactivity timeout,
//! and a client formatter that re-serializes to OpenAI or Anthropic SSE.
//! Stages are connected by bounded channels and supervised so a failure in
//! any stage tears down the others.

pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod orchestration;
pub mod policy;
pub mod server;
pub mod streaming;
pub mod telemetry;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use llm::{ChatChunk, FinishReason, FullResponse, Request, UpstreamProvider};
pub use observability::{EventEmitter, TransactionRecorder};
pub use orchestration::PolicyOrchestrator;
pub use policy::{Policy, PolicyContext, StreamingPolicyContext};
pub use streaming::{ClientFormat, StreamAssembler, StreamingPolicyExecutor};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

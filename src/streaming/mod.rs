//! The streaming policy pipeline: block assembly, policy execution, and
//! client formatting.
//!
//! Stages are connected by bounded channels whose `None` item is the
//! end-of-stream sentinel:
//!
//! ```text
//! upstream chunks -> executor (assembler + hooks + keepalive) -> egress
//!                 -> client formatter (OpenAI / Anthropic SSE) -> sse queue
//! ```

pub mod assembler;
pub mod blocks;
pub mod executor;
pub mod formatter;
pub mod state;

pub use assembler::StreamAssembler;
pub use blocks::{ContentBlock, StreamBlock, ToolCallBlock};
pub use executor::{KeepaliveHandle, StreamingPolicyExecutor};
pub use formatter::{AnthropicFormatter, ClientFormat, ClientFormatter, OpenAiFormatter};
pub use state::StreamState;

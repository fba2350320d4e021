//! Common-format LLM types and the upstream provider boundary.
//!
//! Everything the pipeline moves around lives here: the IR chunk, the
//! normalized request and full response, the fabricated-chunk builders, the
//! Anthropic wire-format conversions, and the pluggable upstream provider.

pub mod anthropic;
pub mod chunk;
pub mod chunk_builders;
pub mod provider;
pub mod request;
pub mod response;

pub use chunk::{ChatChunk, ChunkChoice, Delta, FinishReason, FunctionFragment, ToolCallFragment};
pub use provider::{ChunkStream, CredentialCache, NoopCredentialCache, UpstreamProvider};
pub use request::{Message, MessageContent, Request, Role, ToolCall, ToolDefinition};
pub use response::{FullResponse, ResponseChoice, ResponseMessage, Usage};

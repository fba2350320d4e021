//! Observability: event emission, sinks, and transaction recording.

pub mod emitter;
pub mod recorder;
pub mod sinks;

pub use emitter::{safe_serialize, EventEmitter, EventRecord, EventSink, SinkError};
pub use recorder::{reconstruct_response, TransactionRecorder, DEFAULT_MAX_CHUNKS_QUEUED};
pub use sinks::{RedisSink, SpanSink, StdoutSink, ACTIVITY_CHANNEL};

#[cfg(feature = "postgres")]
pub use sinks::DatabaseSink;

//! Sink implementations for the event emitter.
//!
//! - [`StdoutSink`] — JSON lines with trace context, for log aggregators.
//! - [`RedisSink`] — pub/sub on the `luthien:activity` channel.
//! - [`SpanSink`] — attaches record type and transaction id to the active trace.
//! - [`DatabaseSink`] — Postgres `conversation_events` (feature `postgres`).
//!
//! Every sink is best-effort: failures are logged and never raised.

use std::io::Write;

use async_trait::async_trait;
use opentelemetry::trace::TraceContextExt;
use serde_json::json;

use crate::observability::emitter::{EventRecord, EventSink, SinkError};

/// Redis channel activity events are published on.
pub const ACTIVITY_CHANNEL: &str = "luthien:activity";

// ---------------------------------------------------------------------------
// StdoutSink
// ---------------------------------------------------------------------------

/// Writes one JSON object per line to stdout, carrying the current trace and
/// span ids so log aggregators can correlate with traces.
pub struct StdoutSink;

impl StdoutSink {
    fn trace_context() -> (String, String) {
        let cx = opentelemetry::Context::current();
        let span_context = cx.span().span_context().clone();
        if span_context.is_valid() {
            (
                format!("{:032x}", span_context.trace_id()),
                format!("{:016x}", span_context.span_id()),
            )
        } else {
            ("0".repeat(32), "0".repeat(16))
        }
    }
}

#[async_trait]
impl EventSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        let (trace_id, span_id) = Self::trace_context();
        let line = json!({
            "timestamp": record.timestamp.to_rfc3339(),
            "trace_id": trace_id,
            "span_id": span_id,
            "record_type": record.record_type,
            "transaction_id": record.transaction_id,
            "data": record.data,
        });
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|e| SinkError(e.to_string()))?;
        stdout.flush().map_err(|e| SinkError(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RedisSink
// ---------------------------------------------------------------------------

/// Publishes events to Redis pub/sub for live consumers (monitoring UIs).
pub struct RedisSink {
    connection: redis::aio::ConnectionManager,
}

impl RedisSink {
    /// Connect to Redis at the given URL.
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let client = redis::Client::open(url).map_err(|e| SinkError(e.to_string()))?;
        let connection = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl EventSink for RedisSink {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        let message = json!({
            "call_id": record.transaction_id,
            "event_type": record.record_type,
            "timestamp": record.timestamp.to_rfc3339(),
            "data": record.data,
        });
        let mut connection = self.connection.clone();
        let _: () = redis::AsyncCommands::publish(
            &mut connection,
            ACTIVITY_CHANNEL,
            message.to_string(),
        )
        .await
        .map_err(|e| SinkError(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SpanSink
// ---------------------------------------------------------------------------

/// Attaches each record to the active trace as a structured tracing event.
pub struct SpanSink;

#[async_trait]
impl EventSink for SpanSink {
    fn name(&self) -> &'static str {
        "span"
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        tracing::info!(
            target: "luthien::activity",
            record_type = %record.record_type,
            transaction_id = %record.transaction_id,
            "activity event",
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DatabaseSink (feature = "postgres")
// ---------------------------------------------------------------------------

#[cfg(feature = "postgres")]
pub use postgres_sink::DatabaseSink;

#[cfg(feature = "postgres")]
mod postgres_sink {
    use super::*;
    use sqlx::PgPool;
    use tokio::sync::mpsc;

    /// How many records may be queued before the sink starts dropping.
    const QUEUE_CAPACITY: usize = 1024;

    /// Persists events to the `conversation_events` table.
    ///
    /// Writes go through an internal queue drained by a worker task so a slow
    /// database never blocks the request path. Sequence numbers are assigned
    /// per transaction under an advisory lock: with N concurrent writers for
    /// one transaction id, the persisted sequences are exactly 1..=N.
    pub struct DatabaseSink {
        queue: mpsc::Sender<EventRecord>,
    }

    impl DatabaseSink {
        /// Start the worker and return the sink handle.
        pub fn new(pool: PgPool) -> Self {
            let (queue, mut receiver) = mpsc::channel::<EventRecord>(QUEUE_CAPACITY);
            tokio::spawn(async move {
                while let Some(record) = receiver.recv().await {
                    if let Err(err) = insert_event(&pool, &record).await {
                        tracing::warn!(%err, "database sink insert failed");
                    }
                }
            });
            Self { queue }
        }
    }

    /// Insert one record, assigning the next per-transaction sequence number.
    ///
    /// The advisory transaction lock on the transaction id serializes
    /// concurrent writers for the same transaction, making the
    /// `MAX(sequence) + 1` assignment gap-free.
    pub async fn insert_event(pool: &PgPool, record: &EventRecord) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&record.transaction_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO conversation_events \
             (transaction_id, sequence, record_type, payload, created_at) \
             VALUES ($1, \
                     (SELECT COALESCE(MAX(sequence), 0) + 1 \
                        FROM conversation_events WHERE transaction_id = $1), \
                     $2, $3, $4)",
        )
        .bind(&record.transaction_id)
        .bind(&record.record_type)
        .bind(&record.data)
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }

    #[async_trait]
    impl EventSink for DatabaseSink {
        fn name(&self) -> &'static str {
            "database"
        }

        async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
            self.queue
                .try_send(record.clone())
                .map_err(|e| SinkError(format!("event queue full or closed: {e}")))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn sample_record() -> EventRecord {
        EventRecord {
            timestamp: Utc::now(),
            record_type: "test.event".to_string(),
            transaction_id: "tx-1".to_string(),
            data: json!({"k": "v"}),
        }
    }

    #[test]
    fn test_trace_context_defaults_to_zeros() {
        let (trace_id, span_id) = StdoutSink::trace_context();
        assert_eq!(trace_id.len(), 32);
        assert_eq!(span_id.len(), 16);
    }

    #[tokio::test]
    async fn test_stdout_sink_writes() {
        // Writing to a captured stdout is not practical here; the contract is
        // just that write succeeds and never raises.
        assert!(StdoutSink.write(&sample_record()).await.is_ok());
    }

    #[tokio::test]
    async fn test_span_sink_writes() {
        assert!(SpanSink.write(&sample_record()).await.is_ok());
    }
}

//! Event emitter: safe serialization and fan-out to sinks.
//!
//! Policies and the transaction recorder hand arbitrary payloads to the
//! emitter; it normalizes them to JSON-safe values and delivers them to every
//! configured sink. Sinks are best-effort: a failing sink is logged and never
//! fails the request.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One structured event on its way to the sinks.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event type, e.g. `transaction.request_recorded`.
    pub record_type: String,
    /// Transaction the event belongs to.
    pub transaction_id: String,
    /// JSON-safe payload.
    pub data: Value,
}

/// Failure writing to a sink. Logged, never propagated.
#[derive(Debug)]
pub struct SinkError(pub String);

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SinkError {}

impl From<String> for SinkError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SinkError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A consumer of emitter events.
///
/// Implementations must be safe for concurrent use; the emitter is shared
/// process-wide while every other pipeline object is per-request.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Sink name for failure logs.
    fn name(&self) -> &'static str;

    /// Deliver one record.
    async fn write(&self, record: &EventRecord) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// Safe serialization
// ---------------------------------------------------------------------------

/// Serialize any value to a JSON-safe [`Value`], never failing.
///
/// Successful serialization passes through (chrono datetimes are already
/// ISO-8601 under serde). Inputs `serde_json` rejects — non-finite floats,
/// maps with unstringifiable keys — fall back to a `<unserializable: …>`
/// string so the emitter stays total over everything its API accepts.
pub fn safe_serialize<T: Serialize>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(err) => Value::String(format!("<unserializable: {err}>")),
    }
}

/// Encode raw bytes for event payloads as `b64:<base64>`.
pub fn encode_bytes(data: &[u8]) -> Value {
    Value::String(format!("b64:{}", base64::engine::general_purpose::STANDARD.encode(data)))
}

// ---------------------------------------------------------------------------
// EventEmitter
// ---------------------------------------------------------------------------

/// Fan-out emitter shared by every transaction in the process.
///
/// `emit` awaits delivery; `record` is fire-and-forget and never blocks the
/// request path.
#[derive(Clone)]
pub struct EventEmitter {
    sinks: Arc<Vec<Box<dyn EventSink>>>,
}

impl EventEmitter {
    /// Emitter delivering to the given sinks.
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks: Arc::new(sinks) }
    }

    /// Emitter that discards everything. Used in tests and as a default.
    pub fn null() -> Self {
        Self::new(Vec::new())
    }

    /// Serialize `data` and deliver it to every sink, awaiting each write.
    pub async fn emit<T: Serialize>(&self, transaction_id: &str, record_type: &str, data: &T) {
        let record = EventRecord {
            timestamp: Utc::now(),
            record_type: record_type.to_string(),
            transaction_id: transaction_id.to_string(),
            data: safe_serialize(data),
        };
        for sink in self.sinks.iter() {
            if let Err(err) = sink.write(&record).await {
                tracing::warn!(sink = sink.name(), %err, "event sink write failed");
            }
        }
    }

    /// Fire-and-forget variant: spawns the emit on the current runtime.
    ///
    /// Outside a tokio runtime (plain sync tests) the event is dropped with a
    /// debug log rather than panicking.
    pub fn record<T: Serialize>(&self, transaction_id: &str, record_type: &str, data: &T) {
        let emitter = self.clone();
        let transaction_id = transaction_id.to_string();
        let record_type = record_type.to_string();
        let data = safe_serialize(data);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    emitter.emit(&transaction_id, &record_type, &data).await;
                });
            }
            Err(_) => {
                tracing::debug!(record_type, "no runtime; dropping recorded event");
            }
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Sink that captures records for assertions.
    pub(crate) struct CaptureSink {
        pub records: Arc<Mutex<Vec<EventRecord>>>,
    }

    #[async_trait]
    impl EventSink for CaptureSink {
        fn name(&self) -> &'static str {
            "capture"
        }

        async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
            self.records.lock().push(record.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn write(&self, _record: &EventRecord) -> Result<(), SinkError> {
            Err("disk on fire".into())
        }
    }

    fn capture_emitter() -> (EventEmitter, Arc<Mutex<Vec<EventRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let emitter = EventEmitter::new(vec![Box::new(CaptureSink {
            records: records.clone(),
        })]);
        (emitter, records)
    }

    #[test]
    fn test_safe_serialize_primitives() {
        assert_eq!(safe_serialize(&Value::Null), Value::Null);
        assert_eq!(safe_serialize(&true), json!(true));
        assert_eq!(safe_serialize(&42), json!(42));
        assert_eq!(safe_serialize(&"hello"), json!("hello"));
    }

    #[test]
    fn test_safe_serialize_datetime_is_iso() {
        let dt: DateTime<Utc> = "2024-01-15T10:30:00Z".parse().unwrap();
        let v = safe_serialize(&dt);
        assert_eq!(v, json!("2024-01-15T10:30:00Z"));
    }

    #[test]
    fn test_safe_serialize_nested_structures() {
        #[derive(Serialize)]
        struct Inner {
            tags: std::collections::BTreeSet<&'static str>,
            pair: (u32, u32),
        }
        let v = safe_serialize(&Inner {
            tags: ["c", "a", "b"].into_iter().collect(),
            pair: (1, 2),
        });
        // Sets become sorted lists, tuples become lists.
        assert_eq!(v["tags"], json!(["a", "b", "c"]));
        assert_eq!(v["pair"], json!([1, 2]));
    }

    #[test]
    fn test_safe_serialize_non_finite_float_falls_back() {
        let v = safe_serialize(&f64::NAN);
        let s = v.as_str().expect("fallback should be a string");
        assert!(s.starts_with("<unserializable:"));
        // The output must itself be JSON-encodable.
        serde_json::to_string(&v).unwrap();
    }

    #[test]
    fn test_safe_serialize_output_always_json_encodable() {
        #[derive(Serialize)]
        struct Mixed {
            when: DateTime<Utc>,
            raw: Vec<u8>,
            bad: f64,
        }
        let v = safe_serialize(&Mixed {
            when: Utc::now(),
            raw: vec![1, 2, 3],
            bad: f64::INFINITY,
        });
        serde_json::to_string(&v).unwrap();
    }

    #[test]
    fn test_encode_bytes_prefix() {
        assert_eq!(encode_bytes(b"hello world"), json!("b64:aGVsbG8gd29ybGQ="));
    }

    #[tokio::test]
    async fn test_emit_reaches_sinks() {
        let (emitter, records) = capture_emitter();
        emitter.emit("tx-123", "test.event", &json!({"key": "value"})).await;

        let records = records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transaction_id, "tx-123");
        assert_eq!(records[0].record_type, "test.event");
        assert_eq!(records[0].data["key"], "value");
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_propagate() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let emitter = EventEmitter::new(vec![
            Box::new(FailingSink),
            Box::new(CaptureSink {
                records: records.clone(),
            }),
        ]);
        emitter.emit("tx", "t", &json!({})).await;
        // The failing sink did not stop delivery to the healthy one.
        assert_eq!(records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_record_is_fire_and_forget() {
        let (emitter, records) = capture_emitter();
        emitter.record("tx", "bg.event", &json!({"n": 1}));

        // Give the spawned task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(records.lock().len(), 1);
    }

    #[test]
    fn test_record_outside_runtime_is_safe() {
        let (emitter, records) = capture_emitter();
        emitter.record("tx", "t", &json!({}));
        assert_eq!(records.lock().len(), 0);
    }
}

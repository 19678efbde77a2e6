// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Streaming debug events.
//!
//! Events are emitted through a callback seam ([`EventSink`]) so the engine
//! never couples to a transport: the CLI points a sink at stdout, tests at
//! a vector, a daemon at its socket writer. Shapes are line-delimited JSON
//! `{event, timestamp, ...}` in temporal order; consumers treat unknown
//! event kinds as pass-through. Streams end with exactly one terminal
//! event: `end` on success, `error` on failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kinds on the debug streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Stream opened; payload describes the subject.
    Status,
    /// One log record.
    Log,
    /// One websocket frame.
    Frame,
    /// One poll exchange.
    Poll,
    /// Terminal: stream completed.
    End,
    /// Terminal: stream failed.
    Error,
}

/// One emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event kind.
    pub event: EventKind,
    /// UTC ISO-8601 timestamp with milliseconds and trailing `Z`.
    pub timestamp: String,
    /// Kind-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StreamEvent {
    /// An event stamped now.
    #[must_use]
    pub fn now(event: EventKind, data: Option<Value>) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
            data,
        }
    }
}

/// Where events go. Implementations must preserve emission order.
pub trait EventSink {
    /// Delivers one event.
    fn emit(&mut self, event: &StreamEvent);
}

/// Test sink: collects events in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    /// Events in emission order.
    pub events: Vec<StreamEvent>,
}

impl EventSink for VecSink {
    fn emit(&mut self, event: &StreamEvent) {
        self.events.push(event.clone());
    }
}

/// Emits a bounded process-log stream for `process_id`.
pub fn emit_process_logs(sink: &mut dyn EventSink, process_id: i64, count: usize) {
    sink.emit(&StreamEvent::now(
        EventKind::Status,
        Some(serde_json::json!({ "process_id": process_id, "stream": "logs" })),
    ));
    for i in 0..count {
        sink.emit(&StreamEvent::now(
            EventKind::Log,
            Some(serde_json::json!({
                "process_id": process_id,
                "line": i + 1,
                "data": format!("log line {}", i + 1),
            })),
        ));
    }
    sink.emit(&StreamEvent::now(EventKind::End, None));
}

/// Emits a bounded websocket-frame stream for `stream_id`.
pub fn emit_websocket_stream(sink: &mut dyn EventSink, stream_id: &str, count: usize) {
    sink.emit(&StreamEvent::now(
        EventKind::Status,
        Some(serde_json::json!({ "stream_id": stream_id, "stream": "websocket" })),
    ));
    for i in 0..count {
        sink.emit(&StreamEvent::now(
            EventKind::Frame,
            Some(serde_json::json!({
                "stream_id": stream_id,
                "sequence": i + 1,
                "data": format!("frame data {}", i + 1),
            })),
        ));
    }
    sink.emit(&StreamEvent::now(EventKind::End, None));
}

/// Emits a bounded poll stream for `stream_id` (request/response pairs).
pub fn emit_poll_stream(sink: &mut dyn EventSink, stream_id: &str, count: usize) {
    sink.emit(&StreamEvent::now(
        EventKind::Status,
        Some(serde_json::json!({ "stream_id": stream_id, "stream": "poll" })),
    ));
    for i in 0..count {
        sink.emit(&StreamEvent::now(
            EventKind::Poll,
            Some(serde_json::json!({
                "stream_id": stream_id,
                "sequence": i + 1,
                "data": format!("poll request {}", i + 1),
            })),
        ));
        sink.emit(&StreamEvent::now(
            EventKind::Poll,
            Some(serde_json::json!({
                "stream_id": stream_id,
                "sequence": i + 1,
                "data": format!("poll response {}", i + 1),
            })),
        ));
    }
    sink.emit(&StreamEvent::now(EventKind::End, None));
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn log_stream_has_status_then_logs_then_end() {
        let mut sink = VecSink::default();
        emit_process_logs(&mut sink, 7, 3);
        let kinds: Vec<EventKind> = sink.events.iter().map(|e| e.event).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Status,
                EventKind::Log,
                EventKind::Log,
                EventKind::Log,
                EventKind::End
            ]
        );
        assert!(sink.events.iter().all(|e| e.timestamp.ends_with('Z')));
    }

    #[test]
    fn poll_stream_pairs_requests_with_responses() {
        let mut sink = VecSink::default();
        emit_poll_stream(&mut sink, "s1", 2);
        let polls = sink
            .events
            .iter()
            .filter(|e| e.event == EventKind::Poll)
            .count();
        assert_eq!(polls, 4);
        assert_eq!(sink.events.last().map(|e| e.event), Some(EventKind::End));
    }

    #[test]
    fn events_serialize_with_snake_case_kinds() {
        let event = StreamEvent::now(EventKind::Status, None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"status\""));
        assert!(!json.contains("\"data\""));
    }
}

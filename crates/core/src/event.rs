//! Flow-level streaming events.
//!
//! `FlowStreamEvent` is the frame type the stream emitter multiplexes into
//! one ordered output stream; the gateway forwards each as a named SSE
//! event.

use serde::{Deserialize, Serialize};

/// Events emitted during a streamed flow run.
///
/// Wire protocol (SSE event names):
/// - `metadata` — sent once, before any answer fragment
/// - `status`   — a node started running (progress display)
/// - `answer`   — one answer fragment
/// - `error`    — terminal, the run failed after streaming started
/// - `done`     — terminal, the run completed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowStreamEvent {
    /// Run metadata, always the first frame.
    Metadata {
        conversation_id: String,
        quote_count: usize,
    },

    /// A node entered its executor.
    Status { node_id: String, name: String },

    /// One answer fragment, in completion order.
    Answer { content: String },

    /// The run failed after streaming began.
    Error { message: String },

    /// The run reached quiescence.
    Done {
        conversation_id: String,
        total_tokens: u32,
    },
}

impl FlowStreamEvent {
    /// SSE event name for this frame.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Metadata { .. } => "metadata",
            Self::Status { .. } => "status",
            Self::Answer { .. } => "answer",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_answer() {
        let event = FlowStreamEvent::Answer {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"answer""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_metadata() {
        let event = FlowStreamEvent::Metadata {
            conversation_id: "abc".into(),
            quote_count: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"metadata""#));
        assert!(json.contains(r#""quote_count":3"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            FlowStreamEvent::Metadata {
                conversation_id: "c".into(),
                quote_count: 0
            }
            .event_type(),
            "metadata"
        );
        assert_eq!(
            FlowStreamEvent::Status {
                node_id: "n".into(),
                name: "N".into()
            }
            .event_type(),
            "status"
        );
        assert_eq!(
            FlowStreamEvent::Answer {
                content: "x".into()
            }
            .event_type(),
            "answer"
        );
        assert_eq!(
            FlowStreamEvent::Error {
                message: "boom".into()
            }
            .event_type(),
            "error"
        );
        assert_eq!(
            FlowStreamEvent::Done {
                conversation_id: "c".into(),
                total_tokens: 10
            }
            .event_type(),
            "done"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"answer","content":"hi"}"#;
        let event: FlowStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            FlowStreamEvent::Answer { content } => assert_eq!(content, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}

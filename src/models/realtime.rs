//! Frames pushed over the generation-jobs WebSocket.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound realtime frame, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeMessage {
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    Heartbeat {
        #[serde(default)]
        timestamp: Option<String>,
    },
    JobProgress {
        job_id: Uuid,
        progress: f32,
        #[serde(default)]
        stage: Option<String>,
        #[serde(default)]
        estimated_time_remaining: Option<u32>,
    },
    JobCompleted {
        job_id: Uuid,
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
    JobFailed {
        job_id: Uuid,
        #[serde(default = "unknown_error")]
        error: String,
    },
    CharacterStatusUpdate {
        character_id: Uuid,
        #[serde(default)]
        status: Option<String>,
    },
}

fn unknown_error() -> String {
    "Generation failed".to_string()
}

/// Subscription key for one message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connected,
    Heartbeat,
    JobProgress,
    JobCompleted,
    JobFailed,
    CharacterStatusUpdate,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Connected => "connected",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::JobProgress => "job_progress",
            MessageKind::JobCompleted => "job_completed",
            MessageKind::JobFailed => "job_failed",
            MessageKind::CharacterStatusUpdate => "character_status_update",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RealtimeMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            RealtimeMessage::Connected { .. } => MessageKind::Connected,
            RealtimeMessage::Heartbeat { .. } => MessageKind::Heartbeat,
            RealtimeMessage::JobProgress { .. } => MessageKind::JobProgress,
            RealtimeMessage::JobCompleted { .. } => MessageKind::JobCompleted,
            RealtimeMessage::JobFailed { .. } => MessageKind::JobFailed,
            RealtimeMessage::CharacterStatusUpdate { .. } => MessageKind::CharacterStatusUpdate,
        }
    }

    /// Job the frame refers to, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            RealtimeMessage::JobProgress { job_id, .. }
            | RealtimeMessage::JobCompleted { job_id, .. }
            | RealtimeMessage::JobFailed { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_progress() {
        let job_id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"job_progress","job_id":"{job_id}","progress":42.5,"stage":"drafting","estimated_time_remaining":30}}"#
        );
        let msg: RealtimeMessage = serde_json::from_str(&text).unwrap();

        assert_eq!(msg.kind(), MessageKind::JobProgress);
        assert_eq!(msg.job_id(), Some(job_id));
        match msg {
            RealtimeMessage::JobProgress {
                progress, stage, ..
            } => {
                assert_eq!(progress, 42.5);
                assert_eq!(stage.as_deref(), Some("drafting"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_heartbeat_without_fields() {
        let msg: RealtimeMessage = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::Heartbeat);
        assert_eq!(msg.job_id(), None);
    }

    #[test]
    fn test_job_failed_default_error() {
        let text = format!(r#"{{"type":"job_failed","job_id":"{}"}}"#, Uuid::nil());
        let msg: RealtimeMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(
            msg,
            RealtimeMessage::JobFailed {
                job_id: Uuid::nil(),
                error: "Generation failed".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<RealtimeMessage>(r#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn test_kind_names_match_wire_tags() {
        let msg = RealtimeMessage::CharacterStatusUpdate {
            character_id: Uuid::nil(),
            status: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.kind().as_str());
    }
}

//! Persistence snapshot of a dispatched message.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::context::MessageContext;
use super::message::{Message, MessageKind, ProcessingStatus};

/// A snapshot of a message after dispatch, as handed to a repository.
///
/// Records are plain data: the core creates them and never changes them
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub kind: MessageKind,
    pub content_type: String,
    /// JSON form of the payload, when the payload is serializable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub execution_duration_ms: u64,
    pub status: ProcessingStatus,
}

impl MessageRecord {
    /// Snapshots a context, usually after the chain has executed.
    pub fn from_context(ctx: &MessageContext) -> Self {
        Self {
            id: ctx.id(),
            kind: ctx.kind(),
            content_type: ctx.content_type().to_string(),
            content: ctx.content().to_json(),
            data: ctx.data().clone(),
            error_message: ctx.failure().map(|f| f.message()),
            error_type: ctx.failure().map(|f| f.type_name().to_string()),
            created_at: ctx.created_at(),
            execution_duration_ms: ctx.execution_duration_ms(),
            status: ctx.status(),
        }
    }

    /// Snapshots a message.
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id(),
            kind: message.kind(),
            content_type: message.content_type().to_string(),
            content: message.content().to_json(),
            data: message.data().clone(),
            error_message: message.error_message().map(str::to_string),
            error_type: message.error_type().map(str::to_string),
            created_at: message.created_at(),
            execution_duration_ms: message.execution_duration_ms(),
            status: message.status(),
        }
    }
}

impl From<&MessageContext> for MessageRecord {
    fn from(ctx: &MessageContext) -> Self {
        Self::from_context(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::error::Failure;
    use std::fmt;

    #[derive(Debug, Serialize)]
    struct Deposit {
        account: String,
        amount: u64,
    }

    #[derive(Debug)]
    struct Overdrawn;

    impl fmt::Display for Overdrawn {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("account overdrawn")
        }
    }

    impl std::error::Error for Overdrawn {}

    #[test]
    fn test_record_from_failed_context() {
        let message = Message::command(Deposit {
            account: "acc-1".into(),
            amount: 40,
        });
        let mut ctx = MessageContext::new(message);
        ctx.fail(Failure::new(Overdrawn));

        let record = MessageRecord::from_context(&ctx);
        assert_eq!(record.id, ctx.id());
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("account overdrawn"));
        assert!(record.error_type.as_deref().is_some_and(|t| t.ends_with("Overdrawn")));
        assert_eq!(
            record.content,
            Some(serde_json::json!({ "account": "acc-1", "amount": 40 }))
        );
    }

    #[test]
    fn test_record_serializes() {
        let record = MessageRecord::from_message(&Message::event(Deposit {
            account: "acc-2".into(),
            amount: 1,
        }));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], 3);
        assert_eq!(json["status"], "NotInitialized");
        assert!(json.get("error_message").is_none());

        let back: MessageRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, record);

        let mut unknown = json;
        unknown["kind"] = serde_json::json!(9);
        assert!(serde_json::from_value::<MessageRecord>(unknown).is_err());
    }
}

//! Outbound message records.

use serde::{Deserialize, Serialize};

/// A message the caller failed to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub recipient_id: String,
    pub booking_id: Option<String>,
    pub car_id: Option<String>,
    pub body: String,
}

impl NewMessage {
    pub fn new(recipient_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            booking_id: None,
            car_id: None,
            body: body.into(),
        }
    }

    pub fn for_booking(mut self, booking_id: impl Into<String>) -> Self {
        self.booking_id = Some(booking_id.into());
        self
    }

    pub fn for_car(mut self, car_id: impl Into<String>) -> Self {
        self.car_id = Some(car_id.into());
        self
    }
}

/// A persisted outbox record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub recipient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_id: Option<String>,
    pub body: String,
    pub enqueued_at_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub last_attempt_at_ms: Option<u64>,
}

impl QueuedMessage {
    pub fn from_new(id: String, message: NewMessage, enqueued_at_ms: u64) -> Self {
        Self {
            id,
            recipient_id: message.recipient_id,
            booking_id: message.booking_id,
            car_id: message.car_id,
            body: message.body,
            enqueued_at_ms,
            retries: 0,
            last_attempt_at_ms: None,
        }
    }

    pub fn is_dead_lettered(&self, max_retries: u32) -> bool {
        self.retries >= max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_context_is_omitted_on_disk() {
        let message = QueuedMessage::from_new(
            "m-1".into(),
            NewMessage::new("user-2", "Hola").for_booking("b-9"),
            42,
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["booking_id"], "b-9");
        assert!(json.get("car_id").is_none());

        let back: QueuedMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_dead_letter_threshold() {
        let mut message = QueuedMessage::from_new("m".into(), NewMessage::new("u", "b"), 0);
        message.retries = 4;
        assert!(!message.is_dead_lettered(5));
        message.retries = 5;
        assert!(message.is_dead_lettered(5));
    }
}

//! ABOUTME: Domain events, broker abstraction and event publishing
//! ABOUTME: Carries user events from the services to the notification consumer

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod broker;
pub mod publisher;
pub mod retry;
pub mod topology;

pub use broker::{Broker, BrokerError, Delivery, InMemoryBroker, Message, Subscription};
pub use publisher::{BrokerPublisher, PublishError, Publisher};
pub use retry::{RetryConfig, RetryPublisher};
pub use topology::{QueueBinding, Topology};

/// Routing key for [`Event::UserCreated`]
pub const USER_CREATED_KEY: &str = "user.created";
/// Routing key for [`Event::UserCreationFailed`]
pub const USER_CREATION_FAILED_KEY: &str = "user.created.failed";

/// A completed or failed user action, routed through the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    UserCreated {
        name: String,
        email: String,
    },
    UserCreationFailed {
        #[serde(rename = "attemptedEmail")]
        attempted_email: String,
        reason: String,
    },
}

impl Event {
    pub fn user_created(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::UserCreated {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn user_creation_failed(
        attempted_email: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UserCreationFailed {
            attempted_email: attempted_email.into(),
            reason: reason.into(),
        }
    }

    /// Routing key the broker uses to pick the destination queue
    pub fn routing_key(&self) -> &'static str {
        match self {
            Event::UserCreated { .. } => USER_CREATED_KEY,
            Event::UserCreationFailed { .. } => USER_CREATION_FAILED_KEY,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Errors raised while turning broker messages back into events
#[derive(Error, Debug)]
pub enum ConsumeError {
    #[error("Failed to deserialize event: {0}")]
    Deserialization(#[from] serde_json::Error),
}

/// Decode a broker payload into an event
pub fn decode(payload: &[u8]) -> Result<Event, ConsumeError> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::{user_created_json, user_creation_failed_json};

    #[test]
    fn routing_keys_per_variant() {
        assert_eq!(Event::user_created("Al", "al@x.com").routing_key(), "user.created");
        assert_eq!(
            Event::user_creation_failed("al@x.com", "taken").routing_key(),
            "user.created.failed"
        );
    }

    #[test]
    fn wire_form_is_internally_tagged() {
        let json: serde_json::Value = serde_json::from_slice(
            &Event::user_creation_failed("al@x.com", "Email already registered")
                .to_json()
                .unwrap(),
        )
        .unwrap();

        assert_eq!(json["type"], "user_creation_failed");
        assert_eq!(json["attemptedEmail"], "al@x.com");
        assert_eq!(json["reason"], "Email already registered");
    }

    #[test]
    fn decodes_payloads_from_other_producers() {
        assert_eq!(
            decode(&user_created_json("Al", "al@x.com")).unwrap(),
            Event::user_created("Al", "al@x.com")
        );
        assert_eq!(
            decode(&user_creation_failed_json("al@x.com", "taken")).unwrap(),
            Event::user_creation_failed("al@x.com", "taken")
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"type":"user_deleted","id":"1"}"#).is_err());
        assert!(decode(br#"{"type":"user_created","name":"Al"}"#).is_err());
    }
}

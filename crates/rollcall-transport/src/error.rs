use thiserror::Error;

/// Errors raised by a publish/subscribe channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker connection is down.
    #[error("Broker offline")]
    Offline,

    /// The broker refused or dropped a publication.
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Topic or filter is malformed.
    #[error("Invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: String },

    /// The subscription stream ended.
    #[error("Subscription to {filter} closed")]
    SubscriptionClosed { filter: String },

    /// No publication arrived in time.
    #[error("No message within {0}ms")]
    Timeout(u64),
}

impl TransportError {
    pub fn publish_failed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn subscription_closed(filter: impl Into<String>) -> Self {
        Self::SubscriptionClosed {
            filter: filter.into(),
        }
    }

    /// True for [`TransportError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

//! Request/response correlation over a publish/subscribe channel.
//!
//! A request is correlated with its response through a deterministic
//! response topic known to both sides. The response subscription is opened
//! before the request is published so that a fast responder cannot be
//! missed, and it is dropped on every exit path.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::channel::{PubSubChannel, Publication};
use crate::error::Result;

/// Publish `payload` on `request_topic` once and wait for the first
/// publication on `response_topic`.
///
/// # Errors
///
/// - [`TransportError::Timeout`](crate::TransportError::Timeout) if nothing
///   arrives within `timeout`.
/// - Any subscribe or publish error from the channel. Nothing is retried.
pub async fn request<C: PubSubChannel>(
    channel: &C,
    request_topic: &str,
    payload: Bytes,
    response_topic: &str,
    timeout: Duration,
) -> Result<Publication> {
    let mut responses = channel.subscribe(response_topic).await?;
    trace!(topic = %response_topic, "awaiting correlated response");

    channel.publish(request_topic, payload).await?;
    debug!(topic = %request_topic, "request published");

    match responses.recv_timeout(timeout).await {
        Ok(publication) => {
            trace!(topic = %publication.topic, bytes = publication.payload.len(), "response received");
            Ok(publication)
        }
        Err(e) => {
            warn!(topic = %response_topic, error = %e, "no correlated response");
            Err(e)
        }
    }
}

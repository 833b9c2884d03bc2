//! The publish/subscribe contract used by the kiosk.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Result, TransportError};

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: Bytes,
}

impl Publication {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A publish/subscribe transport.
///
/// Implementations are shared by every task of the kiosk and must be cheap
/// to call concurrently. Topic filters follow the rules in
/// [`topics`](crate::topics).
pub trait PubSubChannel: Send + Sync + 'static {
    /// Publish `payload` on `topic` once.
    fn publish(&self, topic: &str, payload: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to every topic matching `filter`.
    ///
    /// The subscription is active when the returned future completes and is
    /// removed when the [`Subscription`] is dropped.
    fn subscribe(&self, filter: &str) -> impl Future<Output = Result<Subscription>> + Send;
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// A live subscription.
///
/// Yields publications in arrival order, either through [`recv`] or as a
/// [`Stream`]. Dropping it unsubscribes.
///
/// [`recv`]: Subscription::recv
pub struct Subscription {
    filter: String,
    rx: mpsc::Receiver<Publication>,
    unsubscribe: Option<Unsubscribe>,
}

impl Subscription {
    /// Build a subscription fed by `rx`.
    ///
    /// `unsubscribe` runs exactly once, when the subscription is dropped.
    pub fn new(
        filter: impl Into<String>,
        rx: mpsc::Receiver<Publication>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            filter: filter.into(),
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Wait for the next publication. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Publication> {
        self.rx.recv().await
    }

    /// Wait at most `timeout` for the next publication.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if nothing arrives in time, or
    /// [`TransportError::SubscriptionClosed`] if the channel went away.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Publication> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(publication)) => Ok(publication),
            Ok(None) => Err(TransportError::subscription_closed(&self.filter)),
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Take a publication if one is already queued.
    pub fn try_recv(&mut self) -> Option<Publication> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Publication;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            trace!(filter = %self.filter, "unsubscribing");
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

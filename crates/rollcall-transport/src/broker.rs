//! In-process broker.
//!
//! [`LocalBroker`] routes publications to matching subscriptions inside one
//! process. It backs the tests and the simulator, and can be taken offline
//! to exercise transport failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::channel::{PubSubChannel, Publication, Subscription};
use crate::error::{Result, TransportError};
use crate::topics;

/// Per-subscription queue depth. Publications beyond it are dropped for that
/// subscriber only.
pub const SUBSCRIPTION_QUEUE_DEPTH: usize = 64;

/// Number of publications kept for [`LocalBroker::published`].
pub const PUBLISHED_LOG_DEPTH: usize = 1024;

#[derive(Debug)]
struct Subscriber {
    filter: String,
    tx: mpsc::Sender<Publication>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
    offline: bool,
    published: VecDeque<Publication>,
}

/// In-process publish/subscribe broker.
///
/// Cloning yields another handle to the same broker.
///
/// # Examples
///
/// ```
/// use rollcall_transport::{LocalBroker, PubSubChannel};
///
/// #[tokio::main]
/// async fn main() -> rollcall_transport::Result<()> {
///     let broker = LocalBroker::new();
///     let mut subscription = broker.subscribe("devices/+/control").await?;
///
///     broker
///         .publish("devices/4/control", r#"{"action":"start-check-in"}"#.into())
///         .await?;
///
///     let publication = subscription.recv().await.unwrap();
///     assert_eq!(publication.topic, "devices/4/control");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the broker connection.
    pub fn set_offline(&self, offline: bool) {
        debug!(offline, "local broker connectivity changed");
        self.lock().offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.lock().offline
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Most recent publications, oldest first.
    pub fn published(&self) -> Vec<Publication> {
        self.lock().published.iter().cloned().collect()
    }

    /// Publications on topics matching `filter`, oldest first.
    pub fn published_matching(&self, filter: &str) -> Vec<Publication> {
        self.lock()
            .published
            .iter()
            .filter(|p| topics::matches(filter, &p.topic))
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        lock_inner(&self.inner)
    }

    fn route(&self, topic: &str, payload: Bytes) -> Result<usize> {
        topics::validate_topic(topic)?;

        let mut inner = self.lock();
        if inner.offline {
            return Err(TransportError::Offline);
        }

        let publication = Publication::new(topic, payload);
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, subscriber) in &inner.subscribers {
            if !topics::matches(&subscriber.filter, topic) {
                continue;
            }
            match subscriber.tx.try_send(publication.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        filter = %subscriber.filter,
                        topic,
                        "subscriber queue full, dropping publication"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            inner.subscribers.remove(&id);
        }

        if inner.published.len() == PUBLISHED_LOG_DEPTH {
            inner.published.pop_front();
        }
        inner.published.push_back(publication);

        Ok(delivered)
    }

    fn register(&self, filter: &str) -> Result<Subscription> {
        topics::validate_filter(filter)?;

        let mut inner = self.lock();
        if inner.offline {
            return Err(TransportError::Offline);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE_DEPTH);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(
            id,
            Subscriber {
                filter: filter.to_string(),
                tx,
            },
        );
        debug!(filter, id, "subscribed");

        let weak: Weak<Mutex<BrokerInner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(filter, rx, move || {
            if let Some(inner) = weak.upgrade() {
                lock_inner(&inner).subscribers.remove(&id);
            }
        }))
    }
}

fn lock_inner(inner: &Mutex<BrokerInner>) -> MutexGuard<'_, BrokerInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PubSubChannel for LocalBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let delivered = self.route(topic, payload)?;
        trace!(topic, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription> {
        self.register(filter)
    }
}

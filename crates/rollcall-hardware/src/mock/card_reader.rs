//! Mock card reader for testing and development.
//!
//! Cards and faults are queued through a [`MockCardReaderHandle`] and come
//! out of [`CardReaderDriver::poll_once`] in order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::{CardData, HardwareError, Result, traits::CardReaderDriver};

/// Event queued for the reader.
#[derive(Debug, Clone)]
enum ReaderEvent {
    Card(CardData),
    Fault(String),
}

#[derive(Debug, Default)]
struct ReaderState {
    polls: u64,
    reinitializations: u32,
    fail_reinitialize: bool,
    faulty: bool,
}

/// Mock card reader.
///
/// # Examples
///
/// ```
/// use rollcall_hardware::mock::MockCardReader;
/// use rollcall_hardware::traits::CardReaderDriver;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> rollcall_hardware::Result<()> {
///     let (mut reader, handle) = MockCardReader::new();
///     handle.present_card(&[12, 34, 56]).await?;
///
///     let card = reader.poll_once(Duration::from_millis(100)).await?;
///     assert_eq!(card.unwrap().uid_dashed(), "12-34-56");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockCardReader {
    event_rx: mpsc::Receiver<ReaderEvent>,
    state: Arc<Mutex<ReaderState>>,
}

impl MockCardReader {
    /// Create a new mock reader and the handle that drives it.
    pub fn new() -> (Self, MockCardReaderHandle) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let state = Arc::new(Mutex::new(ReaderState::default()));

        let reader = Self {
            event_rx,
            state: Arc::clone(&state),
        };
        let handle = MockCardReaderHandle { event_tx, state };

        (reader, handle)
    }

    fn state(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CardReaderDriver for MockCardReader {
    async fn poll_once(&mut self, timeout: Duration) -> Result<Option<CardData>> {
        let faulty = {
            let mut state = self.state();
            state.polls += 1;
            state.faulty
        };
        if faulty {
            // Real readers take a moment to report a dead antenna.
            tokio::time::sleep(timeout).await;
            return Err(HardwareError::card_read("reader not responding"));
        }

        match tokio::time::timeout(timeout, self.event_rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(ReaderEvent::Card(card))) => Ok(Some(card)),
            Ok(Some(ReaderEvent::Fault(message))) => Err(HardwareError::card_read(message)),
            Ok(None) => {
                tokio::time::sleep(timeout).await;
                Err(HardwareError::disconnected("mock card reader"))
            }
        }
    }

    async fn reinitialize(&mut self) -> Result<()> {
        let mut state = self.state();
        state.reinitializations += 1;
        debug!(attempt = state.reinitializations, "mock reader reinitialize");
        if state.fail_reinitialize {
            return Err(HardwareError::initialization_failed(
                "mock reader refused to reset",
            ));
        }
        state.faulty = false;
        Ok(())
    }
}

/// Handle for scripting a [`MockCardReader`].
#[derive(Debug, Clone)]
pub struct MockCardReaderHandle {
    event_tx: mpsc::Sender<ReaderEvent>,
    state: Arc<Mutex<ReaderState>>,
}

impl MockCardReaderHandle {
    /// Present a card with the given UID bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the UID is invalid or the reader was dropped.
    pub async fn present_card(&self, uid: &[u8]) -> Result<()> {
        let card = CardData::new(uid.to_vec())?;
        self.send(ReaderEvent::Card(card)).await
    }

    /// Make the next poll fail with a read error.
    pub async fn inject_fault(&self, message: impl Into<String>) -> Result<()> {
        self.send(ReaderEvent::Fault(message.into())).await
    }

    /// Make every poll fail until a successful reinitialization.
    pub fn set_faulty(&self, faulty: bool) {
        self.state().faulty = faulty;
    }

    /// Make reinitialization fail.
    pub fn fail_reinitialize(&self, fail: bool) {
        self.state().fail_reinitialize = fail;
    }

    /// Number of `reinitialize` calls so far.
    pub fn reinitialize_count(&self) -> u32 {
        self.state().reinitializations
    }

    /// Number of `poll_once` calls so far.
    pub fn poll_count(&self) -> u64 {
        self.state().polls
    }

    async fn send(&self, event: ReaderEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| HardwareError::disconnected("mock card reader"))
    }

    fn state(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

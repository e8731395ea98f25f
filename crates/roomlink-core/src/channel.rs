//! Fan-out of "link changed" events to every open display surface.

use serde::{Serialize, Serializer};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::link::CanonicalUrl;
use crate::settings::DEFAULT_CHANNEL_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeCause {
    Generated,
    ManualSet,
    Loaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    #[serde(serialize_with = "url_as_str")]
    pub url: CanonicalUrl,
    pub caused_by: ChangeCause,
    /// Revision of the link slot; strictly increasing per manager.
    pub seq: u64,
}

fn url_as_str<S: Serializer>(url: &CanonicalUrl, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(url.as_str())
}

#[derive(Clone)]
pub struct LinkChannel {
    tx: broadcast::Sender<ChangeEvent>,
}

impl LinkChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Never blocks. Returns how many subscribers the event reached.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let seq = event.seq;
        let cause = event.caused_by;
        match self.tx.send(event) {
            Ok(n) => {
                debug!(seq, ?cause, subscribers = n, "link change published");
                n
            }
            Err(_) => {
                debug!(seq, ?cause, "link change published with no subscribers");
                0
            }
        }
    }

    /// Receives every event published from now on.
    pub fn subscribe(&self) -> LinkSubscription {
        LinkSubscription {
            rx: self.tx.subscribe(),
            last_seq: None,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LinkChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// One subscriber's view of the channel.
///
/// Events arrive in publish order. An event whose `seq` is not newer than the
/// last one delivered has been superseded and is dropped, so the latest event
/// a subscriber sees always matches the stored link.
pub struct LinkSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
    last_seq: Option<u64>,
}

impl LinkSubscription {
    /// Waits for the next event; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(event) = self.accept(event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "link subscriber lagged, skipping to newer events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next pending event without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(event) = self.accept(event) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "link subscriber lagged, skipping to newer events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Blocking variant for display threads outside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.blocking_recv() {
                Ok(event) => {
                    if let Some(event) = self.accept(event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "link subscriber lagged, skipping to newer events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    fn accept(&mut self, event: ChangeEvent) -> Option<ChangeEvent> {
        if let Some(last) = self.last_seq {
            if event.seq <= last {
                debug!(seq = event.seq, last, "dropping superseded link event");
                return None;
            }
        }
        self.last_seq = Some(event.seq);
        Some(event)
    }
}

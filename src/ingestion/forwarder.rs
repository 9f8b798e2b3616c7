use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Log one warning per this many drops.
const DROP_LOG_EVERY: u64 = 1_000;

/// Non-blocking hand-off into a bounded queue. When the queue is full the
/// new item is dropped and counted; the caller never waits.
#[derive(Debug)]
pub struct Forwarder<T> {
    tx: mpsc::Sender<T>,
    source: &'static str,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for Forwarder<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            source: self.source,
            dropped: self.dropped.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Sent,
    Dropped,
    Closed,
}

impl<T> Forwarder<T> {
    pub fn new(tx: mpsc::Sender<T>, source: &'static str) -> Self {
        Self {
            tx,
            source,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bounded channel plus its forwarder.
    pub fn channel(capacity: usize, source: &'static str) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, source), rx)
    }

    pub fn forward(&self, item: T) -> Forwarded {
        match self.tx.try_send(item) {
            Ok(()) => Forwarded::Sent,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!("frames_dropped_total", "source" => self.source).increment(1);
                if total == 1 || total % DROP_LOG_EVERY == 0 {
                    tracing::warn!(source = self.source, dropped = total, "Queue full, dropping newest frame");
                }
                Forwarded::Dropped
            }
            Err(TrySendError::Closed(_)) => Forwarded::Closed,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drops_newest_when_full() {
        let (fwd, mut rx) = Forwarder::channel(2, "test");
        assert_eq!(fwd.forward(1), Forwarded::Sent);
        assert_eq!(fwd.forward(2), Forwarded::Sent);
        assert_eq!(fwd.forward(3), Forwarded::Dropped);
        assert_eq!(fwd.dropped(), 1);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(fwd.forward(4), Forwarded::Sent);
        assert_eq!(rx.recv().await, Some(4));
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (fwd, rx) = Forwarder::<u32>::channel(2, "test");
        drop(rx);
        assert_eq!(fwd.forward(1), Forwarded::Closed);
        assert!(fwd.is_closed());
    }
}

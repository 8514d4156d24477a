//! Bounded event relay between the orchestrator and one transport
//! subscription.
//!
//! The orchestrator must never block on a slow client: `send` enqueues and
//! returns immediately. The buffer holds at most `capacity` frames; on
//! overflow the oldest frame is dropped and a congestion counter incremented.
//! Dropping the receiver closes the relay, which the orchestrator observes as
//! a disconnected client (it keeps streaming, discarding events).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::ports::{counters, MetricsSink};

use super::events::TurnEvent;

/// Default per-subscription buffer, in frames.
pub const DEFAULT_RELAY_CAPACITY: usize = 1_024;

struct Shared {
    queue: Mutex<VecDeque<TurnEvent>>,
    notify: Notify,
    sender_closed: AtomicBool,
    receiver_closed: AtomicBool,
    capacity: usize,
    metrics: Arc<dyn MetricsSink>,
}

/// Sending half, held by the orchestrator.
pub struct RelaySender {
    shared: Arc<Shared>,
}

/// Receiving half, held by one transport subscription.
pub struct RelayReceiver {
    shared: Arc<Shared>,
}

/// The send failed because the subscriber is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayClosed;

/// Creates a relay with the given buffer capacity.
pub fn relay(capacity: usize, metrics: Arc<dyn MetricsSink>) -> (RelaySender, RelayReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        notify: Notify::new(),
        sender_closed: AtomicBool::new(false),
        receiver_closed: AtomicBool::new(false),
        capacity,
        metrics,
    });

    (
        RelaySender {
            shared: shared.clone(),
        },
        RelayReceiver { shared },
    )
}

impl RelaySender {
    /// Enqueues an event without blocking.
    ///
    /// On a full buffer the oldest frame is dropped (the terminal frame is
    /// enqueued regardless, so a congested client still observes the turn
    /// end). Returns `Err(RelayClosed)` once the receiver is gone.
    pub fn send(&self, event: TurnEvent) -> Result<(), RelayClosed> {
        if self.shared.receiver_closed.load(Ordering::Acquire) {
            return Err(RelayClosed);
        }

        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.metrics.increment(counters::RELAY_CONGESTION);
                tracing::warn!("relay buffer full, dropped oldest frame");
            }
            queue.push_back(event);
        }

        self.shared.notify.notify_one();
        Ok(())
    }

    /// Returns true once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.receiver_closed.load(Ordering::Acquire)
    }
}

impl Drop for RelaySender {
    fn drop(&mut self) {
        self.shared.sender_closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl RelayReceiver {
    /// Awaits the next event.
    ///
    /// Returns `None` after the sender is dropped and the buffer drained.
    pub async fn recv(&mut self) -> Option<TurnEvent> {
        loop {
            let notified = self.shared.notify.notified();

            if let Some(event) = self.shared.queue.lock().unwrap().pop_front() {
                return Some(event);
            }
            if self.shared.sender_closed.load(Ordering::Acquire) {
                // Re-check: the sender may have enqueued between the pop and
                // the flag read.
                return self.shared.queue.lock().unwrap().pop_front();
            }

            notified.await;
        }
    }

    /// Drains everything until the relay closes.
    pub async fn collect(mut self) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }
}

impl Drop for RelayReceiver {
    fn drop(&mut self) {
        self.shared.receiver_closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::MessageId;
    use crate::ports::InMemoryMetrics;

    fn token(content: &str) -> TurnEvent {
        TurnEvent::Token {
            content: content.to_string(),
            message_id: MessageId::new(),
        }
    }

    fn metrics() -> Arc<InMemoryMetrics> {
        Arc::new(InMemoryMetrics::new())
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut rx) = relay(16, metrics());

        tx.send(token("a")).unwrap();
        tx.send(token("b")).unwrap();
        tx.send(token("c")).unwrap();

        for expected in ["a", "b", "c"] {
            match rx.recv().await.unwrap() {
                TurnEvent::Token { content, .. } => assert_eq!(content, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn recv_returns_none_after_sender_drops() {
        let (tx, mut rx) = relay(16, metrics());
        tx.send(token("a")).unwrap();
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts_congestion() {
        let m = metrics();
        let (tx, rx) = relay(3, m.clone());

        for i in 0..5 {
            tx.send(token(&i.to_string())).unwrap();
        }

        let events = rx.collect_now();
        let contents: Vec<_> = events
            .iter()
            .map(|e| match e {
                TurnEvent::Token { content, .. } => content.clone(),
                _ => unreachable!(),
            })
            .collect();

        // "0" and "1" were dropped.
        assert_eq!(contents, vec!["2", "3", "4"]);
        assert_eq!(m.get(counters::RELAY_CONGESTION), 2);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_dropped() {
        let (tx, rx) = relay(16, metrics());
        assert!(!tx.is_closed());

        drop(rx);

        assert!(tx.is_closed());
        assert_eq!(tx.send(token("late")), Err(RelayClosed));
    }

    #[tokio::test]
    async fn recv_wakes_on_late_send() {
        let (tx, mut rx) = relay(16, metrics());

        let handle = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tx.send(token("late")).unwrap();

        let received = handle.await.unwrap();
        assert!(received.is_some());
    }

    impl RelayReceiver {
        /// Test helper: drain whatever is buffered without waiting.
        fn collect_now(self) -> Vec<TurnEvent> {
            let mut out = Vec::new();
            let mut queue = self.shared.queue.lock().unwrap();
            while let Some(e) = queue.pop_front() {
                out.push(e);
            }
            drop(queue);
            out
        }
    }
}

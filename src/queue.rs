//! Subscription Queue: single-reader FIFO with overflow policy and
//! conflation, fed by any number of producers.
//!
//! Construction picks bounded or unbounded. Bounded queues never block a
//! publisher: `publish` always calls `try_send`, and a failure is handled
//! by the subscription's overflow policy rather than by waiting. This
//! trades publisher latency for the three policies below.
//!
//! `ConflateAndSkipUpdates` is not merely an overflow fallback: every
//! message for that policy lands in a `key -> Msg` buffer (last write per
//! key wins), and the consumer loop drains the whole buffer on a fixed
//! `conflation_interval` timer instead of reading the FIFO directly.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::msg::Msg;
use crate::stats::SubscriptionStats;

/// What to do when a bounded queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the new message, increment `dropped`.
    SkipUpdates,
    /// Transition the subscription to failed; its consumer loop terminates.
    FailSubscription,
    /// Conflate by key into a buffer flushed on `conflation_interval`.
    ConflateAndSkipUpdates,
}

#[derive(Clone, Copy, Debug)]
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

enum Sender<B> {
    Bounded(mpsc::Sender<Msg<B>>),
    Unbounded(mpsc::UnboundedSender<Msg<B>>),
    Conflating(Arc<std::sync::Mutex<HashMap<String, Msg<B>>>>),
}

pub enum Receiver<B> {
    Bounded(mpsc::Receiver<Msg<B>>),
    Unbounded(mpsc::UnboundedReceiver<Msg<B>>),
    Conflating {
        buffer: Arc<std::sync::Mutex<HashMap<String, Msg<B>>>>,
        interval: Duration,
        pending: VecDeque<Msg<B>>,
    },
}

impl<B> Receiver<B> {
    pub async fn recv(&mut self) -> Option<Msg<B>> {
        match self {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Unbounded(rx) => rx.recv().await,
            Receiver::Conflating {
                buffer,
                interval,
                pending,
            } => {
                loop {
                    if let Some(msg) = pending.pop_front() {
                        return Some(msg);
                    }
                    tokio::time::sleep(*interval).await;
                    let mut guard = buffer.lock().expect("conflation buffer lock poisoned");
                    pending.extend(guard.drain().map(|(_, v)| v));
                }
            }
        }
    }
}

/// Producer handle shared by every publisher fanning into one subscription.
pub struct QueueWriter<B> {
    sender: Sender<B>,
    policy: OverflowPolicy,
    stats: Arc<SubscriptionStats>,
}

pub fn channel<B>(
    capacity: Capacity,
    policy: OverflowPolicy,
    conflation_interval: Duration,
    stats: Arc<SubscriptionStats>,
) -> (QueueWriter<B>, Receiver<B>) {
    let (sender, receiver) = if matches!(policy, OverflowPolicy::ConflateAndSkipUpdates) {
        let buffer = Arc::new(std::sync::Mutex::new(HashMap::new()));
        (
            Sender::Conflating(Arc::clone(&buffer)),
            Receiver::Conflating {
                buffer,
                interval: conflation_interval,
                pending: VecDeque::new(),
            },
        )
    } else {
        match capacity {
            Capacity::Bounded(n) => {
                let (tx, rx) = mpsc::channel(n.max(1));
                (Sender::Bounded(tx), Receiver::Bounded(rx))
            }
            Capacity::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Sender::Unbounded(tx), Receiver::Unbounded(rx))
            }
        }
    };
    (
        QueueWriter {
            sender,
            policy,
            stats,
        },
        receiver,
    )
}

/// Outcome of a single enqueue attempt; the caller (the router's fan-out)
/// uses `Failed` to drive the subscription's failed-state transition.
pub enum EnqueueOutcome {
    Delivered,
    Dropped,
    Conflated,
    Failed,
}

impl<B> QueueWriter<B> {
    /// `enqueued` counts every attempt, not just ones that landed in the
    /// queue: `enqueued = dequeued + dropped` must hold for an overloaded
    /// `SkipUpdates` subscription, which only works if drops are still
    /// attempts.
    pub fn try_enqueue(&self, msg: Msg<B>) -> EnqueueOutcome {
        let outcome = self.try_send(msg);
        self.stats.record_enqueue();
        match outcome {
            EnqueueOutcome::Dropped => self.stats.record_dropped(),
            EnqueueOutcome::Conflated => self.stats.record_conflated(),
            EnqueueOutcome::Delivered | EnqueueOutcome::Failed => {}
        }
        outcome
    }

    fn try_send(&self, msg: Msg<B>) -> EnqueueOutcome {
        match &self.sender {
            Sender::Unbounded(tx) => {
                let _ = tx.send(msg);
                EnqueueOutcome::Delivered
            }
            Sender::Bounded(tx) => match tx.try_send(msg) {
                Ok(()) => EnqueueOutcome::Delivered,
                Err(mpsc::error::TrySendError::Full(msg)) => self.handle_overflow(msg),
                Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Failed,
            },
            Sender::Conflating(buffer) => match &msg.key {
                Some(key) => {
                    buffer
                        .lock()
                        .expect("conflation buffer lock poisoned")
                        .insert(key.clone(), msg);
                    EnqueueOutcome::Conflated
                }
                // Messages lacking a key cannot be conflated: SkipUpdates.
                None => EnqueueOutcome::Dropped,
            },
        }
    }

    fn handle_overflow(&self, _msg: Msg<B>) -> EnqueueOutcome {
        match self.policy {
            OverflowPolicy::SkipUpdates => EnqueueOutcome::Dropped,
            OverflowPolicy::FailSubscription => EnqueueOutcome::Failed,
            OverflowPolicy::ConflateAndSkipUpdates => unreachable!("conflating queues never use the bounded sender"),
        }
    }
}

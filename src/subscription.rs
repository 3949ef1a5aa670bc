//! Subscription: one consumer task per registration, draining its queue in
//! arrival order and invoking the user's handler with the monotonicity,
//! suspend/resume, and timeout discipline described below.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::msg::Msg;
use crate::observability::SubscriptionMetrics;
use crate::queue::{self, Capacity, OverflowPolicy, QueueWriter, Receiver};
use crate::stats::{StatsOpts, SubscriptionStats};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What the handler reports back for a single message. Never propagated to
/// the publisher; only observed by the subscription's own stats/logging.
pub enum HandlerOutcome {
    Ok,
    Err(String),
}

pub type Handler<B> = Arc<dyn Fn(Msg<B>) -> BoxFuture<HandlerOutcome> + Send + Sync>;
pub type OnTimeout<B> = Arc<dyn Fn(Msg<B>) + Send + Sync>;

pub struct SubscriptionOpts<B> {
    pub name: Option<String>,
    pub fetch_state: bool,
    pub overflow: OverflowPolicy,
    pub buffer_capacity: Capacity,
    pub conflation_interval: Duration,
    pub stats_opts: StatsOpts,
    pub handler_timeout: Option<Duration>,
    pub on_timeout: Option<OnTimeout<B>>,
}

impl<B> Default for SubscriptionOpts<B> {
    fn default() -> Self {
        Self {
            name: None,
            fetch_state: false,
            overflow: OverflowPolicy::SkipUpdates,
            buffer_capacity: Capacity::Bounded(1024),
            conflation_interval: Duration::from_millis(0),
            stats_opts: StatsOpts::default(),
            handler_timeout: None,
            on_timeout: None,
        }
    }
}

/// A registered handler for one channel or wildcard pattern.
///
/// Owned by the Router's channel (or wildcard registry) entry; the
/// subscriber holds a clone of this `Arc` to call `suspend`/`resume`/
/// `dispose` and to read `statistics()`.
pub struct Subscription<B> {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
    pub channel_or_pattern: String,
    writer: QueueWriter<B>,
    handler: Handler<B>,
    handler_timeout: Option<Duration>,
    on_timeout: Option<OnTimeout<B>>,
    suspended: AtomicBool,
    resume_notify: Notify,
    detached: AtomicBool,
    disposed: AtomicBool,
    pub fetch_state: bool,
    last_sent_seq: AtomicI64,
    cancel: CancellationToken,
    clock: quanta::Clock,
    stats: Arc<SubscriptionStats>,
}

impl<B: Send + Sync + 'static> Subscription<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i64,
        channel_or_pattern: impl Into<String>,
        handler: Handler<B>,
        opts: SubscriptionOpts<B>,
        created_at: i64,
        clock: quanta::Clock,
    ) -> (Arc<Self>, Receiver<B>) {
        let stats = Arc::new(SubscriptionStats::new(opts.stats_opts));
        let (writer, receiver) = queue::channel(
            opts.buffer_capacity,
            opts.overflow,
            opts.conflation_interval,
            Arc::clone(&stats),
        );
        let channel_or_pattern = channel_or_pattern.into();
        let name = opts.name.unwrap_or_else(|| format!("sub-{id}"));
        let sub = Arc::new(Self {
            id,
            name,
            created_at,
            channel_or_pattern,
            writer,
            handler,
            handler_timeout: opts.handler_timeout,
            on_timeout: opts.on_timeout,
            suspended: AtomicBool::new(false),
            resume_notify: Notify::new(),
            detached: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            fetch_state: opts.fetch_state,
            last_sent_seq: AtomicI64::new(i64::MIN),
            cancel: CancellationToken::new(),
            clock,
            stats,
        });
        (sub, receiver)
    }

    pub fn writer(&self) -> &QueueWriter<B> {
        &self.writer
    }

    /// Called once by the router before the consumer loop starts draining
    /// ordinary traffic, after the Message Store snapshot has been queued.
    pub fn seed_last_sent_seq(&self, max_snapshot_id: i64) {
        self.last_sent_seq.fetch_max(max_snapshot_id, Ordering::SeqCst);
    }

    pub fn last_sent_seq(&self) -> i64 {
        self.last_sent_seq.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    /// Blocks the consumer loop between messages, never mid-handler: the
    /// gate is only checked right before the next `recv`.
    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
    }

    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub fn get_timeout_count(&self) -> u64 {
        self.stats.counters.timed_out.load(Ordering::Relaxed)
    }

    pub fn statistics(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// Snapshot row for the metrics export envelope.
    pub fn metrics(&self) -> SubscriptionMetrics {
        let stats = &self.stats;
        SubscriptionMetrics {
            id: self.id,
            name: self.name.clone(),
            channel_or_pattern: self.channel_or_pattern.clone(),
            enqueued: stats.counters.enqueued.load(Ordering::Relaxed),
            dequeued: stats.counters.dequeued.load(Ordering::Relaxed),
            processed: stats.counters.processed.load(Ordering::Relaxed),
            dropped: stats.counters.dropped.load(Ordering::Relaxed),
            timed_out: stats.counters.timed_out.load(Ordering::Relaxed),
            conflated: stats.counters.conflated.load(Ordering::Relaxed),
            conflation_ratio: stats.conflation_ratio(),
            latency_mean_nanos: stats.latency_mean_nanos(),
            latency_percentile_nanos: stats.latency_percentile_nanos(),
            service_time_mean_nanos: stats.service_time_mean_nanos(),
            service_time_percentile_nanos: stats.service_time_percentile_nanos(),
            suspended: self.is_suspended(),
        }
    }

    /// Zeroes this subscription's interval counters and timing trackers.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Idempotent: a second call observes `disposed` already true and is a
    /// no-op beyond cancelling the token again (cheap).
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        self.resume_notify.notify_waiters();
    }

    /// Drains `receiver` until dispose, cancellation, or a fatal
    /// `FailSubscription` overflow. Consumes `self` by `Arc` so the task can
    /// hold the only strong reference needed to keep stats/handler alive.
    pub async fn run_loop(self: Arc<Self>, mut receiver: Receiver<B>) {
        loop {
            while self.suspended.load(Ordering::SeqCst) && !self.disposed.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = self.resume_notify.notified() => {}
                }
            }
            if self.disposed.load(Ordering::SeqCst) {
                return;
            }

            let msg = tokio::select! {
                _ = self.cancel.cancelled() => return,
                m = receiver.recv() => m,
            };
            let Some(msg) = msg else { return };

            if msg.id <= self.last_sent_seq.load(Ordering::SeqCst) {
                // Superseded by a state snapshot or an earlier delivery;
                // monotonicity invariant forbids handing this one out.
                continue;
            }

            let now_ticks = self.clock.raw();
            let latency_nanos = self
                .clock
                .delta(msg.inception_ticks as u64, now_ticks)
                .as_nanos() as f64;
            self.stats.record_dequeue(latency_nanos);
            self.last_sent_seq.store(msg.id, Ordering::SeqCst);

            let service_start = self.clock.raw();
            let handler = Arc::clone(&self.handler);
            let fut = handler(msg.clone());

            let outcome = match self.handler_timeout {
                Some(timeout) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        res = tokio::time::timeout(timeout, fut) => res,
                    }
                }
                None => Ok(fut.await),
            };

            match outcome {
                Ok(HandlerOutcome::Ok) => {
                    let service_nanos = self.clock.delta(service_start, self.clock.raw()).as_nanos() as f64;
                    self.stats.record_processed(service_nanos);
                }
                Ok(HandlerOutcome::Err(e)) => {
                    let service_nanos = self.clock.delta(service_start, self.clock.raw()).as_nanos() as f64;
                    self.stats.record_processed(service_nanos);
                    log::warn!(
                        "subscription {} handler error on channel {}: {e}",
                        self.id,
                        self.channel_or_pattern
                    );
                }
                Err(_elapsed) => {
                    self.stats.record_timed_out();
                    if let Some(cb) = &self.on_timeout {
                        cb(msg);
                    }
                    log::warn!(
                        "subscription {} handler timed out on channel {}",
                        self.id,
                        self.channel_or_pattern
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::MsgType;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    fn msg(id: i64, body: i32) -> Msg<i32> {
        Msg {
            id,
            timestamp: id,
            msg_type: MsgType::ChannelUpdate,
            correlation_id: None,
            key: None,
            inception_ticks: quanta::Clock::new().raw() as i64,
            from: None,
            body,
            tag_a: 0,
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_skips_non_monotonic_ids() {
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_handler = Arc::clone(&received);
        let handler: Handler<i32> = Arc::new(move |m: Msg<i32>| {
            let received_handler = Arc::clone(&received_handler);
            Box::pin(async move {
                received_handler.lock().unwrap().push(m.body);
                HandlerOutcome::Ok
            })
        });

        let (sub, receiver) = Subscription::new(
            1,
            "num.inc",
            handler,
            SubscriptionOpts::default(),
            0,
            quanta::Clock::new(),
        );
        sub.seed_last_sent_seq(2);

        let writer = sub.writer();
        writer.try_enqueue(msg(1, 100)); // stale, must be skipped
        writer.try_enqueue(msg(2, 200)); // stale, must be skipped
        writer.try_enqueue(msg(3, 300));
        writer.try_enqueue(msg(4, 400));

        let sub_for_loop = Arc::clone(&sub);
        let handle = tokio::spawn(sub_for_loop.run_loop(receiver));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        sub.dispose();
        let _ = handle.await;

        assert_eq!(*received.lock().unwrap(), vec![300, 400]);
        assert_eq!(sub.last_sent_seq(), 4);
    }

    #[tokio::test]
    async fn handler_timeout_invokes_callback_and_continues() {
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_handler = Arc::clone(&processed);
        let handler: Handler<i32> = Arc::new(move |m: Msg<i32>| {
            let processed_handler = Arc::clone(&processed_handler);
            Box::pin(async move {
                if m.body == 1 {
                    tokio::time::sleep(StdDuration::from_secs(10)).await;
                }
                processed_handler.fetch_add(1, Ordering::SeqCst);
                HandlerOutcome::Ok
            })
        });

        let timed_out = Arc::new(AtomicUsize::new(0));
        let timed_out_cb = Arc::clone(&timed_out);
        let opts = SubscriptionOpts {
            handler_timeout: Some(StdDuration::from_millis(20)),
            on_timeout: Some(Arc::new(move |_m: Msg<i32>| {
                timed_out_cb.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };

        let (sub, receiver) = Subscription::new(1, "num.inc", handler, opts, 0, quanta::Clock::new());
        let writer = sub.writer();
        writer.try_enqueue(msg(1, 1));
        writer.try_enqueue(msg(2, 2));

        let sub_for_loop = Arc::clone(&sub);
        let handle = tokio::spawn(sub_for_loop.run_loop(receiver));
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        sub.dispose();
        let _ = handle.await;

        assert_eq!(timed_out.load(Ordering::SeqCst), 1);
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        assert_eq!(sub.get_timeout_count(), 1);
    }
}

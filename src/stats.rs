//! Stats Tracker: thread-safe counters, EWMA rates, and an online
//! moving-percentile estimator, kept per channel and per subscription.
//!
//! Defaults match spec: percentile 0.99, EWMA window 100 samples,
//! moving-percentile step size alpha=0.015, delta=0.01.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Clone, Copy, Debug)]
pub struct StatsOpts {
    pub percentile: f64,
    pub ewma_window: u32,
    pub moving_percentile_alpha: f64,
    pub moving_percentile_delta: f64,
}

impl Default for StatsOpts {
    fn default() -> Self {
        Self {
            percentile: 0.99,
            ewma_window: 100,
            moving_percentile_alpha: 0.015,
            moving_percentile_delta: 0.01,
        }
    }
}

/// Online gradient estimate of the `p`-th quantile: each observation nudges
/// the estimate toward the true quantile by a bounded step, so the tracker
/// never needs to retain the full sample population.
struct MovingPercentile {
    p: f64,
    alpha: f64,
    delta: f64,
    estimate: f64,
    seen: u64,
}

impl MovingPercentile {
    fn new(p: f64, alpha: f64, delta: f64) -> Self {
        Self {
            p,
            alpha,
            delta,
            estimate: 0.0,
            seen: 0,
        }
    }

    fn observe(&mut self, sample: f64) {
        if self.seen == 0 {
            self.estimate = sample;
        } else {
            // Asymmetric EWMA toward the p-th quantile: move a fraction `p`
            // of the gap when the sample is above the estimate, `1-p` when
            // below. `delta` is a floor on that fraction so the estimate
            // keeps adapting even when `p` is close to 0 or 1.
            let frac = if sample > self.estimate { self.p } else { 1.0 - self.p };
            let frac = frac.max(self.delta);
            self.estimate += self.alpha * frac * (sample - self.estimate);
        }
        self.seen += 1;
    }

    fn value(&self) -> f64 {
        self.estimate
    }
}

/// Classic exponentially weighted moving average with a window-derived
/// smoothing factor (`alpha = 2 / (window + 1)`).
struct Ewma {
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ewma {
    fn new(window: u32) -> Self {
        Self {
            alpha: 2.0 / (window.max(1) as f64 + 1.0),
            value: 0.0,
            initialized: false,
        }
    }

    fn observe(&mut self, sample: f64) {
        if !self.initialized {
            self.value = sample;
            self.initialized = true;
        } else {
            self.value += self.alpha * (sample - self.value);
        }
    }

    fn value(&self) -> f64 {
        self.value
    }
}

/// A running mean + moving-percentile pair, used for both latency
/// (publish→dequeue) and service time (handler start→end).
struct TimingTracker {
    count: u64,
    mean: f64,
    percentile: MovingPercentile,
}

impl TimingTracker {
    fn new(opts: &StatsOpts) -> Self {
        Self {
            count: 0,
            mean: 0.0,
            percentile: MovingPercentile::new(
                opts.percentile,
                opts.moving_percentile_alpha,
                opts.moving_percentile_delta,
            ),
        }
    }

    fn observe(&mut self, sample_nanos: f64) {
        self.count += 1;
        self.mean += (sample_nanos - self.mean) / self.count as f64;
        self.percentile.observe(sample_nanos);
    }
}

pub struct ChannelStats {
    pub published: AtomicU64,
    pub last_published_at: AtomicI64,
    last_published_by: Mutex<Option<String>>,
    publish_rate: Mutex<Ewma>,
    last_observed: Mutex<Option<Instant>>,
    opts: StatsOpts,
}

impl ChannelStats {
    pub fn new(opts: StatsOpts) -> Self {
        Self {
            published: AtomicU64::new(0),
            last_published_at: AtomicI64::new(0),
            last_published_by: Mutex::new(None),
            publish_rate: Mutex::new(Ewma::new(opts.ewma_window)),
            last_observed: Mutex::new(None),
            opts,
        }
    }

    pub fn record_publish(&self, timestamp: i64, from: Option<&str>) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.last_published_at.store(timestamp, Ordering::Relaxed);
        *self.last_published_by.lock().expect("stats lock poisoned") = from.map(|s| s.to_string());

        let now = Instant::now();
        let mut last = self.last_observed.lock().expect("stats lock poisoned");
        let instantaneous_rate = match *last {
            Some(prev) => {
                let elapsed = now.duration_since(prev).as_secs_f64().max(1e-9);
                1.0 / elapsed
            }
            None => 0.0,
        };
        *last = Some(now);
        self.publish_rate
            .lock()
            .expect("stats lock poisoned")
            .observe(instantaneous_rate);
    }

    pub fn last_published_by(&self) -> Option<String> {
        self.last_published_by.lock().expect("stats lock poisoned").clone()
    }

    pub fn publish_rate(&self) -> f64 {
        self.publish_rate.lock().expect("stats lock poisoned").value()
    }

    pub fn reset(&self) {
        self.published.store(0, Ordering::Relaxed);
        *self.publish_rate.lock().expect("stats lock poisoned") = Ewma::new(self.opts.ewma_window);
    }
}

#[derive(Default)]
pub struct SubscriptionCounters {
    pub enqueued: AtomicU64,
    pub dequeued: AtomicU64,
    pub processed: AtomicU64,
    pub dropped: AtomicU64,
    pub timed_out: AtomicU64,
    pub conflated: AtomicU64,
}

pub struct SubscriptionStats {
    pub counters: SubscriptionCounters,
    latency: Mutex<TimingTracker>,
    service_time: Mutex<TimingTracker>,
    dequeue_rate: Mutex<Ewma>,
    opts: StatsOpts,
}

impl SubscriptionStats {
    pub fn new(opts: StatsOpts) -> Self {
        Self {
            counters: SubscriptionCounters::default(),
            latency: Mutex::new(TimingTracker::new(&opts)),
            service_time: Mutex::new(TimingTracker::new(&opts)),
            dequeue_rate: Mutex::new(Ewma::new(opts.ewma_window)),
            opts,
        }
    }

    pub fn record_enqueue(&self) {
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dequeue(&self, latency_nanos: f64) {
        self.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        self.latency.lock().expect("stats lock poisoned").observe(latency_nanos);
        self.dequeue_rate.lock().expect("stats lock poisoned").observe(1.0);
    }

    pub fn record_processed(&self, service_nanos: f64) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.service_time
            .lock()
            .expect("stats lock poisoned")
            .observe(service_nanos);
    }

    pub fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflated(&self) {
        self.counters.conflated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn latency_mean_nanos(&self) -> f64 {
        self.latency.lock().expect("stats lock poisoned").mean
    }

    pub fn latency_percentile_nanos(&self) -> f64 {
        self.latency.lock().expect("stats lock poisoned").percentile.value()
    }

    pub fn service_time_mean_nanos(&self) -> f64 {
        self.service_time.lock().expect("stats lock poisoned").mean
    }

    pub fn service_time_percentile_nanos(&self) -> f64 {
        self.service_time
            .lock()
            .expect("stats lock poisoned")
            .percentile
            .value()
    }

    pub fn conflation_ratio(&self) -> f64 {
        let enqueued = self.counters.enqueued.load(Ordering::Relaxed) as f64;
        let conflated = self.counters.conflated.load(Ordering::Relaxed) as f64;
        if enqueued == 0.0 {
            0.0
        } else {
            conflated / enqueued
        }
    }

    pub fn reset(&self) {
        self.counters.enqueued.store(0, Ordering::Relaxed);
        self.counters.dequeued.store(0, Ordering::Relaxed);
        self.counters.processed.store(0, Ordering::Relaxed);
        self.counters.dropped.store(0, Ordering::Relaxed);
        self.counters.timed_out.store(0, Ordering::Relaxed);
        self.counters.conflated.store(0, Ordering::Relaxed);
        *self.latency.lock().expect("stats lock poisoned") = TimingTracker::new(&self.opts);
        *self.service_time.lock().expect("stats lock poisoned") = TimingTracker::new(&self.opts);
    }
}

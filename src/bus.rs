//! Router (Bus core): channel registry, wildcard registry, publish
//! fan-out, subscription lifecycle and lifecycle-event emission.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::json;

use crate::channel::{AnyChannel, Channel, ChannelInfo};
use crate::error::{Error, Result};
use crate::msg::{Msg, MsgType};
use crate::name::{self, DEFAULT_SYSTEM_PREFIX};
use crate::observability::{ChannelMetrics, LifecycleEvent, MetricsEnvelope, LIFECYCLE_CHANNEL_SUFFIX};
use crate::queue::{Capacity, OverflowPolicy};
use crate::stats::StatsOpts;
use crate::subscription::{Handler, Subscription, SubscriptionOpts};

/// Type-erased wildcard registry entry; `subscriptions` is attached to
/// every channel created after the pattern was registered, and is itself
/// populated from every channel that already matched at subscribe time.
trait AnyWildcard: Send + Sync {
    fn pattern(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

struct WildcardEntry<B> {
    pattern: String,
    subscriptions: RwLock<HashMap<i64, Arc<Subscription<B>>>>,
}

impl<B: Send + Sync + 'static> AnyWildcard for WildcardEntry<B> {
    fn pattern(&self) -> &str {
        &self.pattern
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct BusConfig {
    pub system_prefix: char,
    pub default_capacity: Capacity,
    pub default_overflow: OverflowPolicy,
    pub stats_opts: StatsOpts,
    pub message_tracing_enabled: bool,
    pub publish_logging_enabled: bool,
    pub lifecycle_tracking_enabled: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            system_prefix: DEFAULT_SYSTEM_PREFIX,
            default_capacity: Capacity::Bounded(1024),
            default_overflow: OverflowPolicy::SkipUpdates,
            stats_opts: StatsOpts::default(),
            message_tracing_enabled: false,
            publish_logging_enabled: false,
            lifecycle_tracking_enabled: false,
        }
    }
}

pub struct BusConfigBuilder {
    config: BusConfig,
}

impl BusConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
        }
    }

    pub fn system_prefix(mut self, c: char) -> Self {
        self.config.system_prefix = c;
        self
    }

    pub fn default_capacity(mut self, c: Capacity) -> Self {
        self.config.default_capacity = c;
        self
    }

    pub fn default_overflow(mut self, p: OverflowPolicy) -> Self {
        self.config.default_overflow = p;
        self
    }

    pub fn stats_opts(mut self, opts: StatsOpts) -> Self {
        self.config.stats_opts = opts;
        self
    }

    pub fn message_tracing_enabled(mut self, v: bool) -> Self {
        self.config.message_tracing_enabled = v;
        self
    }

    pub fn publish_logging_enabled(mut self, v: bool) -> Self {
        self.config.publish_logging_enabled = v;
        self
    }

    pub fn lifecycle_tracking_enabled(mut self, v: bool) -> Self {
        self.config.lifecycle_tracking_enabled = v;
        self
    }

    pub fn build(self) -> BusConfig {
        self.config
    }
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct PublishOpts {
    pub key: Option<String>,
    pub store: bool,
    pub correlation_id: Option<i64>,
    pub from: Option<String>,
    pub tag_a: i64,
}

impl Default for PublishOpts {
    fn default() -> Self {
        Self {
            key: None,
            store: false,
            correlation_id: None,
            from: None,
            tag_a: 0,
        }
    }
}

/// In-process typed publish/subscribe message bus.
///
/// Channels and wildcard patterns are type-erased in storage (`Arc<dyn
/// AnyChannel>` / `Arc<dyn AnyWildcard>`) and downcast back to `Channel<B>`
/// / `WildcardEntry<B>` at every API boundary where the caller names `B`.
/// A mismatch there is exactly the `TypeMismatch` case from the data model.
pub struct Bus {
    config: BusConfig,
    channels: RwLock<HashMap<String, Arc<dyn AnyChannel>>>,
    wildcards: RwLock<HashMap<String, Arc<dyn AnyWildcard>>>,
    next_sub_id: AtomicI64,
    next_msg_id: AtomicI64,
    next_correlation_id: AtomicI64,
    disposed: AtomicBool,
    clock: quanta::Clock,
}

impl Bus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            channels: RwLock::new(HashMap::new()),
            wildcards: RwLock::new(HashMap::new()),
            next_sub_id: AtomicI64::new(1),
            next_msg_id: AtomicI64::new(1),
            next_correlation_id: AtomicI64::new(1),
            disposed: AtomicBool::new(false),
            clock: quanta::Clock::new(),
        }
    }

    pub fn get_next_correlation_id(&self) -> i64 {
        self.next_correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    fn now_millis(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn lifecycle_channel_name(&self) -> String {
        format!("{}{}", self.config.system_prefix, LIFECYCLE_CHANNEL_SUFFIX)
    }

    fn emit_lifecycle(&self, event: LifecycleEvent) {
        if !self.config.lifecycle_tracking_enabled {
            return;
        }
        let channel = self.lifecycle_channel_name();
        // Lifecycle publishing must never fail the caller's own operation;
        // a channel-creation-of-the-lifecycle-channel-itself loop is
        // avoided because this call bypasses fan-out's own lifecycle hook.
        let _ = self.publish_internal::<LifecycleEvent>(&channel, event, PublishOpts::default(), false);
    }

    /// Returns the existing channel if the type matches, or creates it.
    fn get_or_create_channel<B: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<Channel<B>>> {
        {
            let guard = self.channels.read().expect("channel registry lock poisoned");
            if let Some(existing) = guard.get(name) {
                return self.downcast_channel::<B>(existing, name);
            }
        }
        let mut guard = self.channels.write().expect("channel registry lock poisoned");
        if let Some(existing) = guard.get(name) {
            return self.downcast_channel::<B>(existing, name);
        }
        let channel = Arc::new(Channel::<B>::new(name, self.config.stats_opts));
        self.attach_matching_wildcards(&channel);
        guard.insert(name.to_string(), channel.clone() as Arc<dyn AnyChannel>);
        drop(guard);
        log::debug!("created channel {name}");
        self.emit_lifecycle(LifecycleEvent::ChannelCreated {
            channel: name.to_string(),
        });
        Ok(channel)
    }

    fn downcast_channel<B: Clone + Send + Sync + 'static>(
        &self,
        any: &Arc<dyn AnyChannel>,
        name: &str,
    ) -> Result<Arc<Channel<B>>> {
        any.as_any()
            .downcast_ref::<Channel<B>>()
            .map(|_| unsafe {
                // Re-derive the concrete Arc from the trait-object Arc: safe
                // because the downcast_ref above proved the underlying
                // allocation is exactly `Channel<B>`.
                Arc::from_raw(Arc::into_raw(any.clone()) as *const Channel<B>)
            })
            .ok_or_else(|| Error::TypeMismatch {
                channel: name.to_string(),
                expected: any.body_type_tag().type_name,
                actual: std::any::type_name::<B>(),
            })
    }

    /// Attaches every wildcard subscription whose pattern matches `name` to
    /// the freshly created channel, per the registration-race resolution.
    fn attach_matching_wildcards<B: Clone + Send + Sync + 'static>(&self, channel: &Arc<Channel<B>>) {
        let guard = self.wildcards.read().expect("wildcard registry lock poisoned");
        for entry in guard.values() {
            if !name::matches(channel.name(), entry.pattern()) {
                continue;
            }
            if let Some(typed) = entry.as_any().downcast_ref::<WildcardEntry<B>>() {
                let subs = typed
                    .subscriptions
                    .read()
                    .expect("wildcard subscriptions lock poisoned");
                for sub in subs.values() {
                    channel.add_subscription(Arc::clone(sub));
                }
            }
        }
    }

    /// Internal publish path shared by `publish` and lifecycle/trace
    /// emission. `track_trace` is false for the trace channel's own
    /// publishes, to avoid an infinite publish loop.
    fn publish_internal<B: Clone + Send + Sync + 'static>(
        &self,
        channel_name: &str,
        body: B,
        opts: PublishOpts,
        track_trace: bool,
    ) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        name::validate_channel_name(channel_name, self.config.system_prefix)?;
        if opts.store && opts.key.is_none() {
            return Err(Error::ArgumentError(
                "store=true requires a key".into(),
            ));
        }

        let channel = self.get_or_create_channel::<B>(channel_name)?;
        let msg = Msg {
            id: self.next_msg_id.fetch_add(1, Ordering::SeqCst),
            timestamp: self.now_millis(),
            msg_type: MsgType::ChannelUpdate,
            correlation_id: opts.correlation_id,
            key: opts.key.clone(),
            inception_ticks: self.clock.raw() as i64,
            from: opts.from.clone(),
            body,
            tag_a: opts.tag_a,
        };

        if opts.store {
            channel.store().put(msg.clone());
        }
        channel.record_publish(msg.timestamp, opts.from.as_deref());

        if self.config.publish_logging_enabled {
            log::info!("publish channel={channel_name} id={} key={:?}", msg.id, msg.key);
        }
        if track_trace && self.config.message_tracing_enabled {
            self.emit_trace(channel_name, &msg);
        }

        self.fan_out(&channel, msg);
        Ok(())
    }

    fn emit_trace<B>(&self, channel_name: &str, msg: &Msg<B>) {
        use crate::observability::{MessageTrace, TRACE_CHANNEL_SUFFIX};
        let trace_channel = format!("{}{}", self.config.system_prefix, TRACE_CHANNEL_SUFFIX);
        let trace = MessageTrace::new(channel_name, msg.id, msg.msg_type, msg.timestamp);
        let _ = self.publish_internal::<MessageTrace>(&trace_channel, trace, PublishOpts::default(), false);
    }

    fn fan_out<B: Clone + Send + Sync + 'static>(&self, channel: &Arc<Channel<B>>, msg: Msg<B>) {
        let mut failed = Vec::new();
        for sub in channel.subscriptions_snapshot() {
            use crate::queue::EnqueueOutcome;
            match sub.writer().try_enqueue(msg.clone()) {
                EnqueueOutcome::Failed => failed.push(sub.id),
                _ => {}
            }
        }
        for id in failed {
            if let Some(sub) = channel.remove_subscription(id) {
                sub.dispose();
                self.emit_lifecycle(LifecycleEvent::SubscriptionDisposed {
                    channel: channel.name().to_string(),
                    subscription_id: id,
                });
            }
        }
    }

    pub fn publish<B: Clone + Send + Sync + 'static>(
        &self,
        channel: &str,
        body: B,
        opts: PublishOpts,
    ) -> Result<()> {
        self.publish_internal(channel, body, opts, true)
    }

    pub fn subscribe<B: Clone + Send + Sync + 'static>(
        &self,
        channel_or_pattern: &str,
        handler: Handler<B>,
        opts: SubscriptionOpts<B>,
    ) -> Result<Arc<Subscription<B>>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let is_wildcard = name::is_wildcard_pattern(channel_or_pattern);
        if is_wildcard {
            name::validate_pattern(channel_or_pattern, self.config.system_prefix)?;
        } else {
            name::validate_channel_name(channel_or_pattern, self.config.system_prefix)?;
        }

        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let created_at = self.now_millis();
        let fetch_state = opts.fetch_state;
        let (sub, receiver) = Subscription::new(
            id,
            channel_or_pattern,
            handler,
            opts,
            created_at,
            self.clock.clone(),
        );

        if is_wildcard {
            self.register_wildcard(channel_or_pattern, Arc::clone(&sub))?;
        } else {
            let channel = self.get_or_create_channel::<B>(channel_or_pattern)?;
            if fetch_state {
                self.seed_state(&channel, &sub);
            }
            channel.add_subscription(Arc::clone(&sub));
        }

        tokio::spawn(Arc::clone(&sub).run_loop(receiver));
        self.emit_lifecycle(LifecycleEvent::SubscriptionCreated {
            channel: channel_or_pattern.to_string(),
            subscription_id: id,
        });
        Ok(sub)
    }

    /// Queues a keyed snapshot ahead of any live traffic for a freshly
    /// attached subscription. The snapshot messages carry their own store
    /// ids and are delivered through the same monotonicity check as live
    /// traffic (`run_loop` raises `last_sent_seq` as each one is drained),
    /// so they must not be pre-seeded here: doing so would put the
    /// watermark ahead of the very messages it is supposed to admit.
    fn seed_state<B: Clone + Send + Sync + 'static>(
        &self,
        channel: &Arc<Channel<B>>,
        sub: &Arc<Subscription<B>>,
    ) {
        let Some(store) = channel.existing_store() else {
            return;
        };
        for msg in store.snapshot() {
            sub.writer().try_enqueue(msg);
        }
    }

    fn register_wildcard<B: Clone + Send + Sync + 'static>(
        &self,
        pattern: &str,
        sub: Arc<Subscription<B>>,
    ) -> Result<()> {
        {
            let guard = self.wildcards.read().expect("wildcard registry lock poisoned");
            if let Some(existing) = guard.get(pattern) {
                let typed = existing
                    .as_any()
                    .downcast_ref::<WildcardEntry<B>>()
                    .ok_or_else(|| Error::TypeMismatch {
                        channel: pattern.to_string(),
                        expected: "different body type",
                        actual: std::any::type_name::<B>(),
                    })?;
                typed
                    .subscriptions
                    .write()
                    .expect("wildcard subscriptions lock poisoned")
                    .insert(sub.id, Arc::clone(&sub));
                self.attach_to_matching_channels(pattern, &sub);
                return Ok(());
            }
        }
        let mut guard = self.wildcards.write().expect("wildcard registry lock poisoned");
        let entry = guard
            .entry(pattern.to_string())
            .or_insert_with(|| {
                Arc::new(WildcardEntry::<B> {
                    pattern: pattern.to_string(),
                    subscriptions: RwLock::new(HashMap::new()),
                }) as Arc<dyn AnyWildcard>
            })
            .clone();
        drop(guard);
        let typed = entry
            .as_any()
            .downcast_ref::<WildcardEntry<B>>()
            .expect("just inserted as this exact type");
        typed
            .subscriptions
            .write()
            .expect("wildcard subscriptions lock poisoned")
            .insert(sub.id, Arc::clone(&sub));
        self.attach_to_matching_channels(pattern, &sub);
        Ok(())
    }

    fn attach_to_matching_channels<B: Clone + Send + Sync + 'static>(
        &self,
        pattern: &str,
        sub: &Arc<Subscription<B>>,
    ) {
        let guard = self.channels.read().expect("channel registry lock poisoned");
        for any_channel in guard.values() {
            if !name::matches(any_channel.name(), pattern) {
                continue;
            }
            if let Some(channel) = any_channel.as_any().downcast_ref::<Channel<B>>() {
                channel.add_subscription(Arc::clone(sub));
            }
        }
    }

    pub fn get_channel_state<B: Clone + Send + Sync + 'static>(&self, channel: &str) -> Result<Vec<Msg<B>>> {
        let guard = self.channels.read().expect("channel registry lock poisoned");
        let any = guard.get(channel).ok_or(Error::ArgumentError(format!("no such channel: {channel}")))?;
        let ch = self.downcast_channel::<B>(any, channel)?;
        Ok(ch.existing_store().map(|s| s.snapshot()).unwrap_or_default())
    }

    pub fn try_get_message<B: Clone + Send + Sync + 'static>(
        &self,
        channel: &str,
        key: &str,
    ) -> Result<Option<Msg<B>>> {
        let guard = self.channels.read().expect("channel registry lock poisoned");
        let Some(any) = guard.get(channel) else {
            return Ok(None);
        };
        let ch = self.downcast_channel::<B>(any, channel)?;
        Ok(ch.existing_store().and_then(|s| s.get(key)))
    }

    pub fn try_delete_message<B: Clone + Send + Sync + 'static>(
        &self,
        channel: &str,
        key: &str,
    ) -> Result<(bool, Option<Msg<B>>)> {
        let channel_arc = {
            let guard = self.channels.read().expect("channel registry lock poisoned");
            match guard.get(channel) {
                Some(any) => self.downcast_channel::<B>(any, channel)?,
                None => return Ok((false, None)),
            }
        };
        let Some(store) = channel_arc.existing_store() else {
            return Ok((false, None));
        };
        let removed = store.remove(key);
        if let Some(removed_msg) = &removed {
            let msg = Msg {
                id: self.next_msg_id.fetch_add(1, Ordering::SeqCst),
                timestamp: self.now_millis(),
                msg_type: MsgType::ChannelDelete,
                correlation_id: None,
                key: Some(key.to_string()),
                inception_ticks: self.clock.raw() as i64,
                from: None,
                body: removed_msg.body.clone(),
                tag_a: 0,
            };
            self.fan_out(&channel_arc, msg);
        }
        Ok((removed.is_some(), removed))
    }

    pub fn reset_channel<B: Clone + Default + Send + Sync + 'static>(&self, channel: &str) -> Result<()> {
        let channel_arc = {
            let guard = self.channels.read().expect("channel registry lock poisoned");
            match guard.get(channel) {
                Some(any) => self.downcast_channel::<B>(any, channel)?,
                None => return Ok(()),
            }
        };
        if let Some(store) = channel_arc.existing_store() {
            store.clear();
        }
        let msg = Msg {
            id: self.next_msg_id.fetch_add(1, Ordering::SeqCst),
            timestamp: self.now_millis(),
            msg_type: MsgType::ChannelReset,
            correlation_id: None,
            key: None,
            inception_ticks: self.clock.raw() as i64,
            from: None,
            body: B::default(),
            tag_a: 0,
        };
        self.fan_out(&channel_arc, msg);
        Ok(())
    }

    pub fn try_delete_channel(&self, channel: &str) -> bool {
        let removed = self
            .channels
            .write()
            .expect("channel registry lock poisoned")
            .remove(channel);
        match removed {
            Some(any) => {
                any.dispose_all_subscriptions();
                self.emit_lifecycle(LifecycleEvent::ChannelDeleted {
                    channel: channel.to_string(),
                });
                true
            }
            None => false,
        }
    }

    pub fn get_channels(&self) -> Vec<ChannelInfo> {
        let guard = self.channels.read().expect("channel registry lock poisoned");
        guard
            .values()
            .map(|c| ChannelInfo {
                name: c.name().to_string(),
                body_type_name: c.body_type_tag().type_name,
                subscription_count: c.subscription_count(),
                has_store: c.has_store(),
                last_published_at: c.last_published_at(),
            })
            .collect()
    }

    pub fn get_channel_subscriptions<B: Clone + Send + Sync + 'static>(
        &self,
        channel: &str,
    ) -> Result<Vec<Arc<Subscription<B>>>> {
        let guard = self.channels.read().expect("channel registry lock poisoned");
        let any = guard.get(channel).ok_or(Error::ArgumentError(format!("no such channel: {channel}")))?;
        let ch = self.downcast_channel::<B>(any, channel)?;
        Ok(ch.subscriptions_snapshot())
    }

    /// Builds the observability export envelope. Channel body types are
    /// type-erased, so per-channel metrics come from `AnyChannel`'s
    /// non-generic surface (no store contents, only counters). The caller
    /// names `B` by passing the subscriptions it holds handles to; the Bus
    /// itself never holds a homogeneous collection of them.
    pub fn metrics_envelope<B: Clone + Send + Sync + 'static>(
        &self,
        subscriptions: &[Arc<Subscription<B>>],
    ) -> MetricsEnvelope {
        let guard = self.channels.read().expect("channel registry lock poisoned");
        let channels = guard
            .values()
            .map(|c| ChannelMetrics {
                name: c.name().to_string(),
                body_type: c.body_type_tag().type_name,
                published: c.published(),
                publish_rate: c.publish_rate(),
                last_published_by: c.last_published_by(),
                last_published_at: c.last_published_at(),
                subscription_count: c.subscription_count(),
                has_store: c.has_store(),
            })
            .collect();
        MetricsEnvelope {
            channels,
            subscriptions: subscriptions.iter().map(|s| s.metrics()).collect(),
        }
    }

    /// `reset_stats` zeroes every channel's and subscription's interval
    /// counters atomically, applied only after the envelope for this call
    /// has been built and serialised.
    pub fn metrics_to_json<B: Clone + Send + Sync + 'static, W: std::io::Write>(
        &self,
        writer: W,
        subscriptions: &[Arc<Subscription<B>>],
        use_mnemonics: bool,
        reset_stats: bool,
    ) -> Result<()> {
        let envelope = self.metrics_envelope(subscriptions);
        let result = if !use_mnemonics {
            envelope.write_json(writer)
        } else {
            let value = json!({
                "ch": envelope.channels.iter().map(|c| json!({
                    "n": c.name, "ty": c.body_type, "pub": c.published,
                    "rt": c.publish_rate, "lb": c.last_published_by,
                    "lt": c.last_published_at, "sc": c.subscription_count, "st": c.has_store,
                })).collect::<Vec<_>>(),
                "sub": envelope.subscriptions.iter().map(|s| json!({
                    "id": s.id, "n": s.name, "ch": s.channel_or_pattern,
                    "enq": s.enqueued, "deq": s.dequeued, "prc": s.processed,
                    "drp": s.dropped, "to": s.timed_out, "cfl": s.conflated,
                    "cflr": s.conflation_ratio, "lm": s.latency_mean_nanos,
                    "lp": s.latency_percentile_nanos, "sm": s.service_time_mean_nanos,
                    "sp": s.service_time_percentile_nanos, "sus": s.suspended,
                })).collect::<Vec<_>>(),
            });
            serde_json::to_writer_pretty(writer, &value)
                .map_err(|e| Error::ArgumentError(format!("failed to serialise metrics: {e}")))
        };
        if reset_stats {
            let guard = self.channels.read().expect("channel registry lock poisoned");
            for any in guard.values() {
                any.reset_stats();
            }
            drop(guard);
            for sub in subscriptions {
                sub.reset_stats();
            }
        }
        result
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return; // idempotent
        }
        let guard = self.channels.read().expect("channel registry lock poisoned");
        for any in guard.values() {
            log::debug!("disposing channel {}", any.name());
            any.dispose_all_subscriptions();
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.dispose();
    }
}


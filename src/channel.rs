//! A Channel: a body-typed mailbox with its own subscriber set, optional
//! Message Store, and publish-side stats. Created lazily on first publish
//! or subscribe; never garbage collected by the core.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};
use std::sync::Arc;

use crate::stats::ChannelStats;
use crate::store::MessageStore;
use crate::subscription::Subscription;

/// Body-type identity tag recorded on first use of a channel name; every
/// later publish/subscribe on that name must match it or fail with
/// `TypeMismatch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BodyTypeTag {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl BodyTypeTag {
    pub fn of<B: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<B>(),
            type_name: std::any::type_name::<B>(),
        }
    }
}

/// Summary row returned by `Bus::get_channels`.
pub struct ChannelInfo {
    pub name: String,
    pub body_type_name: &'static str,
    pub subscription_count: usize,
    pub has_store: bool,
    pub last_published_at: i64,
}

/// Type-erased so the Router's channel registry can hold every channel in
/// one map regardless of body type; downcast happens at the API boundary
/// where the caller names `B` explicitly.
pub trait AnyChannel: Send + Sync {
    fn name(&self) -> &str;
    fn body_type_tag(&self) -> BodyTypeTag;
    fn subscription_count(&self) -> usize;
    fn has_store(&self) -> bool;
    fn last_published_at(&self) -> i64;
    fn published(&self) -> u64;
    fn publish_rate(&self) -> f64;
    fn last_published_by(&self) -> Option<String>;
    /// Disposes every subscription currently attached to this channel.
    /// Object-safe so `try_delete_channel` does not need to know `B`.
    fn dispose_all_subscriptions(&self);
    /// Zeroes this channel's publish counters and rate estimator.
    fn reset_stats(&self);
    fn as_any(&self) -> &dyn std::any::Any;
}

pub struct Channel<B> {
    name: String,
    body_type_tag: BodyTypeTag,
    pub subscriptions: RwLock<HashMap<i64, Arc<Subscription<B>>>>,
    store: Mutex<Option<Arc<MessageStore<B>>>>,
    pub stats: ChannelStats,
    last_published_at: AtomicI64,
}

impl<B: Clone + Send + Sync + 'static> Channel<B> {
    pub fn new(name: impl Into<String>, stats_opts: crate::stats::StatsOpts) -> Self {
        Self {
            name: name.into(),
            body_type_tag: BodyTypeTag::of::<B>(),
            subscriptions: RwLock::new(HashMap::new()),
            store: Mutex::new(None),
            stats: ChannelStats::new(stats_opts),
            last_published_at: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lazily materialises the Message Store on first keyed publish with
    /// `store=true`.
    pub fn store(&self) -> Arc<MessageStore<B>> {
        let mut guard = self.store.lock().expect("channel store lock poisoned");
        guard
            .get_or_insert_with(|| Arc::new(MessageStore::new()))
            .clone()
    }

    pub fn existing_store(&self) -> Option<Arc<MessageStore<B>>> {
        self.store.lock().expect("channel store lock poisoned").clone()
    }

    pub fn record_publish(&self, timestamp: i64, from: Option<&str>) {
        self.last_published_at.store(timestamp, Ordering::Relaxed);
        self.stats.record_publish(timestamp, from);
    }

    pub fn add_subscription(&self, sub: Arc<Subscription<B>>) {
        self.subscriptions
            .write()
            .expect("channel subscriptions lock poisoned")
            .insert(sub.id, sub);
    }

    pub fn remove_subscription(&self, id: i64) -> Option<Arc<Subscription<B>>> {
        self.subscriptions
            .write()
            .expect("channel subscriptions lock poisoned")
            .remove(&id)
    }

    pub fn subscriptions_snapshot(&self) -> Vec<Arc<Subscription<B>>> {
        self.subscriptions
            .read()
            .expect("channel subscriptions lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl<B: Clone + Send + Sync + 'static> AnyChannel for Channel<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn body_type_tag(&self) -> BodyTypeTag {
        self.body_type_tag
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .expect("channel subscriptions lock poisoned")
            .len()
    }

    fn has_store(&self) -> bool {
        self.store.lock().expect("channel store lock poisoned").is_some()
    }

    fn last_published_at(&self) -> i64 {
        self.last_published_at.load(Ordering::Relaxed)
    }

    fn published(&self) -> u64 {
        self.stats.published.load(Ordering::Relaxed)
    }

    fn publish_rate(&self) -> f64 {
        self.stats.publish_rate()
    }

    fn last_published_by(&self) -> Option<String> {
        self.stats.last_published_by()
    }

    fn dispose_all_subscriptions(&self) {
        let mut guard = self
            .subscriptions
            .write()
            .expect("channel subscriptions lock poisoned");
        for sub in guard.values() {
            sub.dispose();
        }
        guard.clear();
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_created_lazily_and_shared() {
        let ch: Channel<i32> = Channel::new("stock.prices", crate::stats::StatsOpts::default());
        assert!(!ch.has_store());
        let store_a = ch.store();
        let store_b = ch.store();
        assert!(Arc::ptr_eq(&store_a, &store_b));
        assert!(ch.has_store());
    }
}

//! Lifecycle events, message traces, and the JSON metrics export envelope.
//!
//! Lifecycle and trace events travel over the same Router as ordinary
//! traffic: they are published onto reserved system channels (`$lifecycle`,
//! `$message.traces` by default) using the bus's own `publish`, so a
//! subscriber to those channels uses the exact same subscribe API as any
//! other consumer.

use serde::Serialize;

use crate::msg::MsgType;

pub const LIFECYCLE_CHANNEL_SUFFIX: &str = "lifecycle";
pub const TRACE_CHANNEL_SUFFIX: &str = "message.traces";

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind")]
pub enum LifecycleEvent {
    ChannelCreated { channel: String },
    ChannelDeleted { channel: String },
    SubscriptionCreated { channel: String, subscription_id: i64 },
    SubscriptionDisposed { channel: String, subscription_id: i64 },
}

#[derive(Clone, Debug, Serialize)]
pub struct MessageTrace {
    pub channel: String,
    pub msg_id: i64,
    pub msg_type: &'static str,
    pub timestamp: i64,
}

impl MessageTrace {
    pub fn new(channel: impl Into<String>, msg_id: i64, msg_type: MsgType, timestamp: i64) -> Self {
        Self {
            channel: channel.into(),
            msg_id,
            msg_type: msg_type_name(msg_type),
            timestamp,
        }
    }
}

fn msg_type_name(t: MsgType) -> &'static str {
    match t {
        MsgType::ChannelUpdate => "channel_update",
        MsgType::ChannelDelete => "channel_delete",
        MsgType::ChannelReset => "channel_reset",
        MsgType::Trace => "trace",
        MsgType::ChannelDisconnected => "channel_disconnected",
    }
}

#[derive(Serialize)]
pub struct ChannelMetrics {
    pub name: String,
    pub body_type: &'static str,
    pub published: u64,
    pub publish_rate: f64,
    pub last_published_by: Option<String>,
    pub last_published_at: i64,
    pub subscription_count: usize,
    pub has_store: bool,
}

#[derive(Serialize)]
pub struct SubscriptionMetrics {
    pub id: i64,
    pub name: String,
    pub channel_or_pattern: String,
    pub enqueued: u64,
    pub dequeued: u64,
    pub processed: u64,
    pub dropped: u64,
    pub timed_out: u64,
    pub conflated: u64,
    pub conflation_ratio: f64,
    pub latency_mean_nanos: f64,
    pub latency_percentile_nanos: f64,
    pub service_time_mean_nanos: f64,
    pub service_time_percentile_nanos: f64,
    pub suspended: bool,
}

#[derive(Serialize)]
pub struct MetricsEnvelope {
    pub channels: Vec<ChannelMetrics>,
    pub subscriptions: Vec<SubscriptionMetrics>,
}

impl MetricsEnvelope {
    pub fn write_json<W: std::io::Write>(&self, writer: W) -> crate::error::Result<()> {
        serde_json::to_writer_pretty(writer, self).map_err(|e| {
            crate::error::Error::ArgumentError(format!("failed to serialise metrics: {e}"))
        })
    }
}

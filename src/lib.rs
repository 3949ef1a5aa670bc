//! In-process typed publish/subscribe message bus, plus a binary
//! record/replay subsystem for capturing and later replaying any channel's
//! traffic.
//!
//! [`Bus`] is the entry point: publish typed bodies onto named channels,
//! subscribe by exact name or `*`/`>` wildcard pattern, and optionally keep
//! a keyed snapshot per channel for late subscribers to fetch on join.
//! [`Recorder`] and [`Player`] turn a channel's live stream into a framed
//! byte recording and back, with an optional sparse seek [`index`].

mod bus;
mod channel;
mod codec;
mod error;
mod index;
mod metadata;
mod msg;
mod name;
mod observability;
mod player;
mod queue;
mod recorder;
mod recording;
mod serializer;
mod stats;
mod store;
mod subscription;

pub use bus::{Bus, BusConfig, BusConfigBuilder, PublishOpts};
pub use channel::{AnyChannel, BodyTypeTag, ChannelInfo};
pub use codec::{decode_frame, encode_frame, read_frame, write_frame};
pub use error::{Error, Result};
pub use index::{IndexEntry, IndexReader, IndexWriter, DEFAULT_INTERVAL};
pub use metadata::RecordingMetadata;
pub use msg::{Msg, MsgType};
pub use name::{is_wildcard_pattern, matches, validate_channel_name, validate_pattern, DEFAULT_SYSTEM_PREFIX};
pub use observability::{
    ChannelMetrics, LifecycleEvent, MessageTrace, MetricsEnvelope, SubscriptionMetrics,
    LIFECYCLE_CHANNEL_SUFFIX, TRACE_CHANNEL_SUFFIX,
};
pub use player::{IndexedPlayer, PacingMode, Player};
pub use queue::{Capacity, EnqueueOutcome, OverflowPolicy};
pub use recorder::{RecordOpts, Recorder, RecordingStats};
pub use recording::{convert, filter, merge, split, DuplicatePolicy, MergeOptions, SplitBoundary};
pub use serializer::{Serializer, SerializerVersion};
pub use stats::{ChannelStats, StatsOpts, SubscriptionCounters, SubscriptionStats};
pub use store::MessageStore;
pub use subscription::{
    BoxFuture, Handler, HandlerOutcome, OnTimeout, Subscription, SubscriptionOpts,
};

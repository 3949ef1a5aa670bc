//! The message value record moved by the bus and framed by the recorder.

/// Kind of a message as it travels through the bus. `ChannelUpdate` is the
/// ordinary payload-carrying case; the rest are control messages the router
/// or a subscription queue can synthesize on top of a user's publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsgType {
    ChannelUpdate,
    ChannelDelete,
    ChannelReset,
    Trace,
    ChannelDisconnected,
}

impl MsgType {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            MsgType::ChannelUpdate => 0,
            MsgType::ChannelDelete => 1,
            MsgType::ChannelReset => 2,
            MsgType::Trace => 3,
            MsgType::ChannelDisconnected => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MsgType::ChannelUpdate),
            1 => Some(MsgType::ChannelDelete),
            2 => Some(MsgType::ChannelReset),
            3 => Some(MsgType::Trace),
            4 => Some(MsgType::ChannelDisconnected),
            _ => None,
        }
    }
}

/// A typed message. Cheap to clone: the store keeps one copy, each
/// subscriber's queue another, and bodies are expected to be cheap value
/// types or already behind an `Arc`.
#[derive(Clone, Debug)]
pub struct Msg<B> {
    pub id: i64,
    pub timestamp: i64,
    pub msg_type: MsgType,
    pub correlation_id: Option<i64>,
    pub key: Option<String>,
    pub inception_ticks: i64,
    pub from: Option<String>,
    pub body: B,
    pub tag_a: i64,
}

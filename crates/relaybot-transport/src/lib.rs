pub mod channel;
pub mod error;
pub mod manager;
pub mod types;

pub use channel::{Channel, Inbound, OutboundApi};
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use types::{
    ChannelStatus, EventKind, FriendInfo, GroupInfo, InboundEvent, MediaKind, MediaSegment,
    MessageFormat, NoticeEvent, OutboundMessage, RawMessage, Segment,
};

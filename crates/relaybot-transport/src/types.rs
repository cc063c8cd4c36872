use serde::{Deserialize, Serialize};

/// Which kind of source an inbound event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Group,
    Private,
}

/// One element of an inbound message's segment list (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Segment {
    Text { text: String },
    /// `user_id: None` means `@全体成员` (at-all).
    At { user_id: Option<String> },
    Face { id: String },
    Reply { message_id: String },
    Image(MediaSegment),
    Record(MediaSegment),
    Video(MediaSegment),
    File(MediaSegment),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaSegment {
    pub url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// Which media family a segment belongs to, used by the parser/media sidecar
/// to pick a processing mode. Grounded in `message_parser.py`'s `_MEDIA_TYPE_MAP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

/// A single inbound chat event, as delivered by the external transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub source_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_card: Option<String>,
    pub segments: Vec<Segment>,
}

/// Notice stream events the transport pushes independently of chat messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "notice_type", rename_all = "snake_case")]
pub enum NoticeEvent {
    FriendAdd { user_id: String },
    GroupIncrease { group_id: String },
}

/// Formatting hint for outbound message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    PlainText,
    Markdown,
    Html,
}

/// A single segment of agent output to deliver, as produced by the output
/// segmenter (relaybot-agent) and consumed by a dispatcher reply_fn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: String,
    #[serde(default)]
    pub format: MessageFormat,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// A previously-sent message, as returned by `get_msg` — used to resolve
/// `reply(message_id)` segments into `<reply_to>...</reply_to>` text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub message_id: String,
    pub sender_name: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendInfo {
    pub user_id: String,
    pub nickname: String,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub group_name: String,
    pub group_remark: Option<String>,
    pub member_count: u32,
}

use std::path::Path;

use async_trait::async_trait;

use crate::{
    error::ChannelError,
    types::{ChannelStatus, FriendInfo, GroupInfo, InboundEvent, NoticeEvent, RawMessage},
};

/// Something arriving on a channel's inbound stream: either a chat message
/// or a notice (§6 "also a `notice(notice_type)` stream").
#[derive(Debug, Clone)]
pub enum Inbound {
    Event(InboundEvent),
    Notice(NoticeEvent),
}

/// Outbound API surface required of a connected transport (§6).
///
/// Implementations must be `Send + Sync`; the dispatcher and command surface
/// call these concurrently while the connection's own receive loop runs.
#[async_trait]
pub trait OutboundApi: Send + Sync {
    async fn post_group(&self, group_id: &str, text: &str) -> Result<(), ChannelError>;
    async fn post_private(&self, user_id: &str, text: &str) -> Result<(), ChannelError>;
    async fn upload_private_file(
        &self,
        user_id: &str,
        path: &Path,
        name: &str,
    ) -> Result<(), ChannelError>;
    async fn get_msg(&self, message_id: &str) -> Result<Option<RawMessage>, ChannelError>;
    async fn get_group_info(&self, group_id: &str) -> Result<Option<GroupInfo>, ChannelError>;
    async fn get_friend_list(&self) -> Result<Vec<FriendInfo>, ChannelError>;
    async fn get_group_list(&self, info: bool) -> Result<Vec<GroupInfo>, ChannelError>;
    async fn get_group_file_url(
        &self,
        group_id: &str,
        file_id: &str,
    ) -> Result<Option<String>, ChannelError>;
    async fn get_private_file_url(&self, file_id: &str) -> Result<Option<String>, ChannelError>;
}

/// Common interface implemented by every chat-transport adapter.
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from
/// multiple Tokio tasks. The concrete platform behind this trait (Telegram,
/// a QQ bot framework, a web widget, …) is an external collaborator — this
/// crate only defines the seam.
#[async_trait]
pub trait Channel: OutboundApi {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Establish the connection to the external service.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;

    /// Wait for the next inbound message or notice. `None` means the
    /// connection closed and will not yield any more events.
    ///
    /// Takes `&self`, not `&mut self`: outbound calls and the receive loop
    /// run concurrently off the same `Arc<dyn Channel>`, so an implementation
    /// keeps whatever receive-side state it needs behind interior mutability.
    async fn recv(&self) -> Option<Inbound>;
}

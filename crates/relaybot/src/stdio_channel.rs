//! A line-oriented stdin/stdout transport — the one concrete [`Channel`]
//! this crate ships, standing in for the external chat platform that §6
//! treats as an out-of-scope collaborator. Every private message is a line
//! typed on stdin from a single operator user id; replies and uploads print
//! to stdout.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use relaybot_transport::{
    Channel, ChannelError, ChannelStatus, EventKind, FriendInfo, GroupInfo, Inbound,
    InboundEvent, OutboundApi, RawMessage, Segment,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

const OPERATOR_ID: &str = "operator";

pub struct StdioChannel {
    lines: Mutex<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
    connected: AtomicBool,
}

impl StdioChannel {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            connected: AtomicBool::new(false),
        }
    }
}

impl Default for StdioChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundApi for StdioChannel {
    async fn post_group(&self, group_id: &str, text: &str) -> Result<(), ChannelError> {
        println!("[{group_id}] {text}");
        Ok(())
    }

    async fn post_private(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        println!("[{user_id}] {text}");
        Ok(())
    }

    async fn upload_private_file(
        &self,
        user_id: &str,
        path: &Path,
        name: &str,
    ) -> Result<(), ChannelError> {
        println!("[{user_id}] <file {name}: {}>", path.display());
        Ok(())
    }

    async fn get_msg(&self, _message_id: &str) -> Result<Option<RawMessage>, ChannelError> {
        Ok(None)
    }

    async fn get_group_info(&self, _group_id: &str) -> Result<Option<GroupInfo>, ChannelError> {
        Ok(None)
    }

    async fn get_friend_list(&self) -> Result<Vec<FriendInfo>, ChannelError> {
        Ok(Vec::new())
    }

    async fn get_group_list(&self, _info: bool) -> Result<Vec<GroupInfo>, ChannelError> {
        Ok(Vec::new())
    }

    async fn get_group_file_url(
        &self,
        _group_id: &str,
        _file_id: &str,
    ) -> Result<Option<String>, ChannelError> {
        Ok(None)
    }

    async fn get_private_file_url(&self, _file_id: &str) -> Result<Option<String>, ChannelError> {
        Ok(None)
    }
}

#[async_trait]
impl Channel for StdioChannel {
    fn name(&self) -> &str {
        "stdio"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        if self.connected.load(Ordering::SeqCst) {
            ChannelStatus::Connected
        } else {
            ChannelStatus::Disconnected
        }
    }

    async fn recv(&self) -> Option<Inbound> {
        loop {
            let line = {
                let mut lines = self.lines.lock().await;
                lines.next_line().await.ok()?
            }?;
            if line.trim().is_empty() {
                continue;
            }
            return Some(Inbound::Event(InboundEvent {
                kind: EventKind::Private,
                source_id: OPERATOR_ID.to_string(),
                sender_id: OPERATOR_ID.to_string(),
                sender_name: OPERATOR_ID.to_string(),
                sender_card: None,
                segments: vec![Segment::Text { text: line }],
            }));
        }
    }
}

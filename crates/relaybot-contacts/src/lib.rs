//! In-memory friend/group display-name caches, refreshed wholesale on
//! startup, friend-add, and self-join-group events (§2, "Contact directory").
//!
//! Grounded on `contact_cache.py`: each refresh fully replaces the cache map
//! rather than merging, and a group's display name prefers its remark over
//! its platform name.

use dashmap::DashMap;
use relaybot_transport::{FriendInfo, GroupInfo, OutboundApi};
use tracing::info;

#[derive(Debug, Clone)]
struct Friend {
    nickname: String,
    remark: Option<String>,
}

#[derive(Debug, Clone)]
struct Group {
    group_name: String,
    group_remark: Option<String>,
    member_count: u32,
}

/// Read-mostly cache of friend and group display names.
///
/// A refresh fully replaces the underlying map rather than merging entries,
/// so a friend/group removed upstream disappears from the cache too.
#[derive(Default)]
pub struct ContactCache {
    friends: DashMap<String, Friend>,
    groups: DashMap<String, Group>,
}

impl ContactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the friend cache with a fresh snapshot from the transport.
    pub async fn refresh_friends(
        &self,
        api: &dyn OutboundApi,
    ) -> Result<(), relaybot_transport::ChannelError> {
        let friends = api.get_friend_list().await?;
        self.friends.clear();
        for f in &friends {
            self.friends.insert(
                f.user_id.clone(),
                Friend {
                    nickname: f.nickname.clone(),
                    remark: f.remark.clone(),
                },
            );
        }
        info!(count = friends.len(), "friend cache refreshed");
        Ok(())
    }

    /// Replace the group cache with a fresh snapshot from the transport.
    pub async fn refresh_groups(
        &self,
        api: &dyn OutboundApi,
    ) -> Result<(), relaybot_transport::ChannelError> {
        let groups = api.get_group_list(true).await?;
        self.groups.clear();
        for g in &groups {
            self.groups.insert(
                g.group_id.clone(),
                Group {
                    group_name: g.group_name.clone(),
                    group_remark: g.group_remark.clone(),
                    member_count: g.member_count,
                },
            );
        }
        info!(count = groups.len(), "group cache refreshed");
        Ok(())
    }

    /// Refresh both caches. Used on startup, on `/reload contact`, and on
    /// `friend_add`/`group_increase` notices.
    pub async fn refresh_all(
        &self,
        api: &dyn OutboundApi,
    ) -> Result<(), relaybot_transport::ChannelError> {
        self.refresh_friends(api).await?;
        self.refresh_groups(api).await
    }

    /// Display name for a friend: remark if set, else nickname, else the raw id.
    pub fn get_remark(&self, user_id: &str) -> String {
        match self.friends.get(user_id) {
            Some(f) => f.remark.clone().unwrap_or_else(|| f.nickname.clone()),
            None => user_id.to_string(),
        }
    }

    /// Display name for a group: remark if set, else platform name, else the raw id.
    pub fn get_group_display_name(&self, group_id: &str) -> String {
        match self.groups.get(group_id) {
            Some(g) => g
                .group_remark
                .clone()
                .unwrap_or_else(|| g.group_name.clone()),
            None => group_id.to_string(),
        }
    }

    pub fn friend_count(&self) -> usize {
        self.friends.len()
    }

    pub fn group_member_count(&self, group_id: &str) -> Option<u32> {
        self.groups.get(group_id).map(|g| g.member_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaybot_transport::{ChannelError, RawMessage};
    use std::path::Path;

    struct FakeApi {
        friends: Vec<FriendInfo>,
        groups: Vec<GroupInfo>,
    }

    #[async_trait]
    impl OutboundApi for FakeApi {
        async fn post_group(&self, _: &str, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn post_private(&self, _: &str, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn upload_private_file(
            &self,
            _: &str,
            _: &Path,
            _: &str,
        ) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn get_msg(&self, _: &str) -> Result<Option<RawMessage>, ChannelError> {
            Ok(None)
        }
        async fn get_group_info(&self, _: &str) -> Result<Option<GroupInfo>, ChannelError> {
            Ok(None)
        }
        async fn get_friend_list(&self) -> Result<Vec<FriendInfo>, ChannelError> {
            Ok(self.friends.clone())
        }
        async fn get_group_list(&self, _: bool) -> Result<Vec<GroupInfo>, ChannelError> {
            Ok(self.groups.clone())
        }
        async fn get_group_file_url(&self, _: &str, _: &str) -> Result<Option<String>, ChannelError> {
            Ok(None)
        }
        async fn get_private_file_url(&self, _: &str) -> Result<Option<String>, ChannelError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn group_display_name_prefers_remark_over_name() {
        let api = FakeApi {
            friends: vec![],
            groups: vec![GroupInfo {
                group_id: "g1".into(),
                group_name: "Official Name".into(),
                group_remark: Some("My Group".into()),
                member_count: 3,
            }],
        };
        let cache = ContactCache::new();
        cache.refresh_groups(&api).await.unwrap();
        assert_eq!(cache.get_group_display_name("g1"), "My Group");
    }

    #[tokio::test]
    async fn refresh_replaces_rather_than_merges() {
        let api1 = FakeApi {
            friends: vec![FriendInfo {
                user_id: "u1".into(),
                nickname: "Alice".into(),
                remark: None,
            }],
            groups: vec![],
        };
        let cache = ContactCache::new();
        cache.refresh_friends(&api1).await.unwrap();
        assert_eq!(cache.friend_count(), 1);

        let api2 = FakeApi {
            friends: vec![],
            groups: vec![],
        };
        cache.refresh_friends(&api2).await.unwrap();
        assert_eq!(cache.friend_count(), 0);
    }

    #[test]
    fn unknown_ids_fall_back_to_raw_id() {
        let cache = ContactCache::new();
        assert_eq!(cache.get_remark("unknown"), "unknown");
        assert_eq!(cache.get_group_display_name("unknown"), "unknown");
    }
}

//! Bidirectional name/id resolution for channels, users, and DM sessions.
//!
//! Built once per connection from the handshake snapshot and extended as
//! join events arrive. Ids observed once stay resolvable for the connection
//! lifetime; nothing is ever evicted.

use std::collections::HashMap;

use crate::client::{ChannelInfo, ImInfo, UserInfo};

#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    channel_name_to_id: HashMap<String, String>,
    channel_id_to_name: HashMap<String, String>,
    user_name_to_id: HashMap<String, String>,
    user_id_to_name: HashMap<String, String>,
    user_id_to_dm: HashMap<String, String>,
    dm_id_to_user: HashMap<String, String>,
}

impl IdentityMap {
    /// Builds the map from the handshake snapshot. Groups are folded into the
    /// channel namespace; DM sessions come from the `ims` snapshot list.
    pub fn from_snapshot(
        channels: &[ChannelInfo],
        users: &[UserInfo],
        groups: &[ChannelInfo],
        ims: &[ImInfo],
    ) -> Self {
        let mut map = Self::default();
        for channel in channels.iter().chain(groups) {
            map.add_channel(&channel.name, &channel.id);
        }
        for user in users {
            map.add_user(&user.name, &user.id);
        }
        for im in ims {
            map.add_dm(&im.user, &im.id);
        }
        map
    }

    pub fn add_channel(&mut self, name: &str, id: &str) {
        self.channel_name_to_id.insert(name.to_string(), id.to_string());
        self.channel_id_to_name.insert(id.to_string(), name.to_string());
    }

    pub fn add_user(&mut self, name: &str, id: &str) {
        self.user_name_to_id.insert(name.to_string(), id.to_string());
        self.user_id_to_name.insert(id.to_string(), name.to_string());
    }

    pub fn add_dm(&mut self, user_id: &str, dm_id: &str) {
        self.user_id_to_dm.insert(user_id.to_string(), dm_id.to_string());
        self.dm_id_to_user.insert(dm_id.to_string(), user_id.to_string());
    }

    pub fn channel_id(&self, name: &str) -> Option<&str> {
        self.channel_name_to_id.get(name).map(String::as_str)
    }

    pub fn channel_name(&self, id: &str) -> Option<&str> {
        self.channel_id_to_name.get(id).map(String::as_str)
    }

    pub fn user_id(&self, name: &str) -> Option<&str> {
        self.user_name_to_id.get(name).map(String::as_str)
    }

    pub fn user_name(&self, id: &str) -> Option<&str> {
        self.user_id_to_name.get(id).map(String::as_str)
    }

    /// DM session for a user id, if one was ever observed.
    pub fn dm_for_user(&self, user_id: &str) -> Option<&str> {
        self.user_id_to_dm.get(user_id).map(String::as_str)
    }

    pub fn user_for_dm(&self, dm_id: &str) -> Option<&str> {
        self.dm_id_to_user.get(dm_id).map(String::as_str)
    }

    /// All known channel and group ids, for history walks.
    pub fn channel_ids(&self) -> impl Iterator<Item = &str> {
        self.channel_id_to_name.keys().map(String::as_str)
    }

    /// All known DM session ids.
    pub fn dm_ids(&self) -> impl Iterator<Item = &str> {
        self.dm_id_to_user.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::IdentityMap;
    use crate::client::{ChannelInfo, ImInfo, UserInfo};

    fn snapshot_map() -> IdentityMap {
        IdentityMap::from_snapshot(
            &[ChannelInfo {
                id: "C1".to_string(),
                name: "general".to_string(),
            }],
            &[UserInfo {
                id: "U1".to_string(),
                name: "ada".to_string(),
            }],
            &[ChannelInfo {
                id: "G1".to_string(),
                name: "ops".to_string(),
            }],
            &[ImInfo {
                id: "D1".to_string(),
                user: "U1".to_string(),
            }],
        )
    }

    #[test]
    fn unit_snapshot_resolves_in_both_directions() {
        let map = snapshot_map();
        assert_eq!(map.channel_id("general"), Some("C1"));
        assert_eq!(map.channel_name("C1"), Some("general"));
        assert_eq!(map.channel_id("ops"), Some("G1"));
        assert_eq!(map.user_id("ada"), Some("U1"));
        assert_eq!(map.user_name("U1"), Some("ada"));
        assert_eq!(map.dm_for_user("U1"), Some("D1"));
        assert_eq!(map.user_for_dm("D1"), Some("U1"));
    }

    #[test]
    fn unit_join_events_extend_the_map() {
        let mut map = snapshot_map();
        map.add_channel("newroom", "C2");
        map.add_user("grace", "U2");
        assert_eq!(map.channel_name("C2"), Some("newroom"));
        assert_eq!(map.user_id("grace"), Some("U2"));
        // Earlier observations stay resolvable.
        assert_eq!(map.channel_name("C1"), Some("general"));
    }

    #[test]
    fn unit_iterators_cover_channels_and_dms() {
        let map = snapshot_map();
        let mut channels: Vec<&str> = map.channel_ids().collect();
        channels.sort_unstable();
        assert_eq!(channels, vec!["C1", "G1"]);
        assert_eq!(map.dm_ids().collect::<Vec<_>>(), vec!["D1"]);
    }
}

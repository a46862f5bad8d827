//! Slack Web API client, connection identity map, and history pagination.
//!
//! This crate owns everything that talks HTTP: the retrying API client, the
//! name/id resolution built from the connect snapshot, and the cursor-walking
//! history fetcher. The realtime engine sits on top of it.

pub mod client;
pub mod history;
pub mod identity;
mod retry;

pub use client::{
    ChannelInfo, HistoryPage, HistoryPager, ImInfo, RtmSession, SlackApiClient, UserInfo,
};
pub use history::fetch_full_history;
pub use identity::IdentityMap;

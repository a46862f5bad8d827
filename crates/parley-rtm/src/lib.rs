//! Realtime engine: event dispatch, action execution, and the reconnecting
//! connection loop.
//!
//! One logical task drives the whole engine: events come off the socket one
//! at a time, handlers run to completion, and their actions are executed
//! before the next event is considered. The only concurrent work is the
//! optional one-shot command sweep, which touches the Web API and a
//! point-in-time copy of the identity map, never the registry or grammar.

pub mod connection;
mod dispatch;
pub mod events;
pub mod executor;
mod history_tasks;
mod outbound;
pub mod store;

pub use connection::{Bot, BotConfig};
pub use executor::{execute, ActionEnvironment};
pub use history_tasks::SweepReport;
pub use store::{HistoryStore, JsonlHistoryStore, MemoryHistoryStore};

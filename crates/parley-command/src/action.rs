//! Action values returned by handlers.
//!
//! An `Action` describes one side effect against the chat service. Executing
//! an action may itself yield another action (delivery callbacks, history
//! continuations), so the engine expands them with an explicit stack rather
//! than recursion.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One persisted chat message, as written to and read from the history store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub user_id: String,
    pub channel_name: String,
    pub text: String,
    pub timestamp: String,
}

/// Invoked once after the transport confirms delivery of a send.
pub type DeliveryCallback = Box<dyn FnOnce() -> Option<Action> + Send>;

/// Continuation for a history query; receives the matching records.
pub type HistoryCallback = Box<dyn FnOnce(Vec<HistoryRecord>) -> Option<Action> + Send>;

/// Sends a message. Target resolution order: explicit channel name, then the
/// addressed user's DM session, then the channel of the triggering event.
pub struct SendMessage {
    pub channel: Option<String>,
    pub user: Option<String>,
    pub text: String,
    pub on_delivered: Option<DeliveryCallback>,
}

impl SendMessage {
    /// Replies into whatever channel the triggering event came from.
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            channel: None,
            user: None,
            text: text.into(),
            on_delivered: None,
        }
    }

    pub fn to_channel(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::reply(text)
        }
    }

    pub fn to_user(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::reply(text)
        }
    }

    /// Registers a continuation to run once delivery is confirmed. Long texts
    /// are chunked on send; only the final chunk carries the callback.
    pub fn on_delivered(
        mut self,
        callback: impl FnOnce() -> Option<Action> + Send + 'static,
    ) -> Self {
        self.on_delivered = Some(Box::new(callback));
        self
    }
}

/// Uploads a file from the local filesystem.
pub struct UploadFile {
    pub channel: Option<String>,
    pub user: Option<String>,
    pub path: PathBuf,
    pub remove_after_upload: bool,
}

impl UploadFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            channel: None,
            user: None,
            path: path.into(),
            remove_after_upload: false,
        }
    }
}

/// Queries the history store and feeds the results to a continuation.
pub struct HistoryQuery {
    pub channel: Option<String>,
    pub user: Option<String>,
    pub callback: HistoryCallback,
}

impl HistoryQuery {
    pub fn new(callback: impl FnOnce(Vec<HistoryRecord>) -> Option<Action> + Send + 'static) -> Self {
        Self {
            channel: None,
            user: None,
            callback: Box::new(callback),
        }
    }

    pub fn in_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn by_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// A side-effecting operation produced by a handler.
pub enum Action {
    Send(SendMessage),
    /// Deletes the message that triggered the current dispatch.
    DeleteSource,
    /// Reacts to the triggering message with an emoji (bare name, no colons).
    React { emoji: String },
    Upload(UploadFile),
    QueryHistory(HistoryQuery),
    Sequence(Vec<Action>),
}

impl From<SendMessage> for Action {
    fn from(value: SendMessage) -> Self {
        Action::Send(value)
    }
}

impl From<UploadFile> for Action {
    fn from(value: UploadFile) -> Self {
        Action::Upload(value)
    }
}

impl From<HistoryQuery> for Action {
    fn from(value: HistoryQuery) -> Self {
        Action::QueryHistory(value)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Send(send) => f
                .debug_struct("Send")
                .field("channel", &send.channel)
                .field("user", &send.user)
                .field("text", &send.text)
                .field("has_callback", &send.on_delivered.is_some())
                .finish(),
            Action::DeleteSource => f.write_str("DeleteSource"),
            Action::React { emoji } => f.debug_struct("React").field("emoji", emoji).finish(),
            Action::Upload(upload) => f
                .debug_struct("Upload")
                .field("channel", &upload.channel)
                .field("user", &upload.user)
                .field("path", &upload.path)
                .finish(),
            Action::QueryHistory(query) => f
                .debug_struct("QueryHistory")
                .field("channel", &query.channel)
                .field("user", &query.user)
                .finish(),
            Action::Sequence(actions) => f.debug_list().entries(actions.iter()).finish(),
        }
    }
}

//! Handler registry and the explicit registration surface.
//!
//! Bots register handlers by building a [`CommandSpec`] or [`WatcherSpec`]
//! and handing it to a [`CommandSet`] together with a handler trait object.
//! Filtered handlers are keyed by name (re-registering a name overwrites);
//! unfiltered handlers form an ordered sequence and run on every channel
//! message that no grammar entry claimed.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    action::Action,
    expr::{ExprError, MatchExpr},
    grammar::{CommandGrammar, MatchArgs},
};

/// Arguments passed to a filtered handler on a successful match.
pub struct CommandCall<'a> {
    /// Service id of the sender.
    pub user: &'a str,
    /// Resolved channel name, or `None` for a direct message.
    pub channel: Option<&'a str>,
    pub args: &'a MatchArgs,
    /// Present only when the handler asked for timestamps.
    pub timestamp: Option<&'a str>,
}

/// Arguments passed to an unfiltered handler for a channel message.
pub struct MessageCall<'a> {
    pub user: &'a str,
    pub channel: &'a str,
    pub text: &'a str,
    pub timestamp: Option<&'a str>,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn on_command(&self, call: CommandCall<'_>) -> Result<Option<Action>>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, call: MessageCall<'_>) -> Result<Option<Action>>;
}

/// A registered filtered handler and its metadata.
#[derive(Clone)]
pub struct HandlerRecord {
    pub name: String,
    pub doc: String,
    pub channels: Option<HashSet<String>>,
    pub admin_only: bool,
    pub wants_timestamp: bool,
    handler: Arc<dyn CommandHandler>,
}

impl HandlerRecord {
    pub fn handler(&self) -> Arc<dyn CommandHandler> {
        self.handler.clone()
    }

    /// Channel-restriction check for channel messages. Direct messages bypass
    /// this at the dispatch layer.
    pub fn allows_channel(&self, channel: Option<&str>) -> bool {
        match (&self.channels, channel) {
            (None, _) => true,
            (Some(allowed), Some(name)) => allowed.contains(name),
            (Some(_), None) => false,
        }
    }
}

/// A registered unfiltered handler and its metadata.
#[derive(Clone)]
pub struct UnfilteredRecord {
    pub name: String,
    pub doc: String,
    pub channels: Option<HashSet<String>>,
    pub wants_timestamp: bool,
    handler: Arc<dyn MessageHandler>,
}

impl UnfilteredRecord {
    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        self.handler.clone()
    }

    pub fn allows_channel(&self, channel: &str) -> bool {
        self.channels
            .as_ref()
            .is_none_or(|allowed| allowed.contains(channel))
    }
}

/// Filtered map plus unfiltered sequence.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    filtered: BTreeMap<String, HandlerRecord>,
    unfiltered: Vec<UnfilteredRecord>,
}

impl HandlerRegistry {
    /// Adds or replaces the filtered handler under `record.name`.
    pub fn register_filtered(&mut self, record: HandlerRecord) {
        self.filtered.insert(record.name.clone(), record);
    }

    pub fn register_unfiltered(&mut self, record: UnfilteredRecord) {
        self.unfiltered.push(record);
    }

    pub fn lookup_filtered(&self, name: &str) -> Option<&HandlerRecord> {
        self.filtered.get(name)
    }

    pub fn unfiltered_handlers(&self) -> &[UnfilteredRecord] {
        &self.unfiltered
    }

    /// Concatenated help text for every documented handler the requester may
    /// see. Admin-only handlers are hidden from non-admins.
    pub fn help_text(&self, requester_is_admin: bool) -> String {
        let mut lines = Vec::new();
        for record in self.filtered.values() {
            if record.doc.is_empty() || (record.admin_only && !requester_is_admin) {
                continue;
            }
            lines.push(format!("{}:", record.name));
            lines.push(format!("\t{}", record.doc));
            let allowed = match &record.channels {
                None => "All".to_string(),
                Some(channels) => {
                    let mut names: Vec<&str> = channels.iter().map(String::as_str).collect();
                    names.sort_unstable();
                    names.join(", ")
                }
            };
            lines.push(format!("\tAllowed channels: {allowed}"));
        }
        lines.join("\n")
    }
}

/// Declaration of one filtered command handler.
pub struct CommandSpec {
    pub name: String,
    pub expr: MatchExpr,
    pub doc: String,
    pub channels: Option<HashSet<String>>,
    pub priority: i32,
    pub admin_only: bool,
    pub wants_timestamp: bool,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, expr: MatchExpr) -> Self {
        Self {
            name: name.into(),
            expr,
            doc: String::new(),
            channels: None,
            priority: 0,
            admin_only: false,
            wants_timestamp: false,
        }
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    pub fn in_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    pub fn with_timestamp(mut self) -> Self {
        self.wants_timestamp = true;
        self
    }
}

/// Declaration of one unfiltered message handler.
pub struct WatcherSpec {
    pub name: String,
    pub doc: String,
    pub channels: Option<HashSet<String>>,
    pub wants_timestamp: bool,
}

impl WatcherSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            channels: None,
            wants_timestamp: false,
        }
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    pub fn in_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_timestamp(mut self) -> Self {
        self.wants_timestamp = true;
        self
    }
}

/// Grammar and registry kept in lockstep; owned by the dispatcher for the
/// lifetime of the connection process.
pub struct CommandSet {
    grammar: CommandGrammar,
    registry: HandlerRegistry,
}

impl CommandSet {
    pub fn new(alert: impl Into<String>) -> Self {
        Self {
            grammar: CommandGrammar::new(alert),
            registry: HandlerRegistry::default(),
        }
    }

    pub fn register_command(
        &mut self,
        spec: CommandSpec,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), ExprError> {
        self.grammar.add(&spec.expr, &spec.name, spec.priority)?;
        self.registry.register_filtered(HandlerRecord {
            name: spec.name,
            doc: spec.doc,
            channels: spec.channels,
            admin_only: spec.admin_only,
            wants_timestamp: spec.wants_timestamp,
            handler,
        });
        Ok(())
    }

    pub fn register_watcher(&mut self, spec: WatcherSpec, handler: Arc<dyn MessageHandler>) {
        self.registry.register_unfiltered(UnfilteredRecord {
            name: spec.name,
            doc: spec.doc,
            channels: spec.channels,
            wants_timestamp: spec.wants_timestamp,
            handler,
        });
    }

    pub fn grammar(&self) -> &CommandGrammar {
        &self.grammar
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

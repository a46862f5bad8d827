//! The reconnecting engine: handshake, socket loop, and effect execution.
//!
//! `Bot::run` owns the whole lifecycle. Each iteration performs the
//! handshake, rebuilds the identity map from the snapshot, connects the
//! socket, and drives a `Session` until the transport closes or shutdown is
//! requested. Delivery correlation state lives in the session and dies with
//! the connection; handler and effect errors are fatal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_api::{IdentityMap, SlackApiClient};
use parley_command::{
    Action, CommandCall, CommandHandler, CommandSet, CommandSpec, ExprError, MessageCall,
    MessageHandler, SendMessage, WatcherSpec,
};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::dispatch::{route_message, Route};
use crate::events::{classify, InboundEvent, MessageEvent};
use crate::executor::{execute, ActionEnvironment};
use crate::history_tasks::{backfill_history, sweep_commands, SweepReport};
use crate::outbound::{build_frames, PendingReplies};
use crate::store::{persist_eligible, HistoryStore, MemoryHistoryStore};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, WsMessage>;
type SocketSource = SplitStream<Socket>;

const ADMIN_ONLY_REPLY: &str = "That command is admin only.";

/// Engine configuration. Everything beyond the token and bot name has a
/// working default.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    /// Elevated credential for deleting other users' messages. Optional;
    /// without it those deletions are silently skipped.
    pub admin_token: Option<String>,
    /// Prefix that marks a channel message as addressed to the bot.
    pub alert: String,
    /// The bot's own user name, resolved to an id at connect time.
    pub bot_name: String,
    /// User names granted access to admin-only commands.
    pub admins: Vec<String>,
    /// Rebuild the history store from channel archives on first connect.
    pub load_history: bool,
    /// Sweep old invocations and bot messages out of the archives once.
    pub clear_commands: bool,
    pub api_base: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub reconnect_delay: Duration,
    /// Pacing between paginated history requests and sweep deletions.
    pub page_delay: Duration,
}

impl BotConfig {
    pub fn new(token: impl Into<String>, bot_name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            admin_token: None,
            alert: "!".to_string(),
            bot_name: bot_name.into(),
            admins: Vec::new(),
            load_history: false,
            clear_commands: false,
            api_base: "https://slack.com/api".to_string(),
            request_timeout_ms: 30_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            reconnect_delay: Duration::from_secs(5),
            page_delay: Duration::from_secs(1),
        }
    }
}

/// A configured bot: registered commands and watchers plus the store they
/// share. Consumed by [`Bot::run`].
pub struct Bot {
    config: BotConfig,
    commands: CommandSet,
    store: Arc<dyn HistoryStore>,
    preloaded: Vec<Action>,
}

impl Bot {
    pub fn new(config: BotConfig) -> Self {
        let commands = CommandSet::new(config.alert.clone());
        Self {
            config,
            commands,
            store: Arc::new(MemoryHistoryStore::new()),
            preloaded: Vec::new(),
        }
    }

    /// Replaces the default in-memory store.
    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn register_command(
        &mut self,
        spec: CommandSpec,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), ExprError> {
        self.commands.register_command(spec, handler)
    }

    pub fn register_watcher(&mut self, spec: WatcherSpec, handler: Arc<dyn MessageHandler>) {
        self.commands.register_watcher(spec, handler)
    }

    /// Actions to run once, right after the first successful connection.
    pub fn preload_actions(&mut self, actions: Vec<Action>) {
        self.preloaded.extend(actions);
    }

    /// Runs until shutdown is requested or a handler fails. Transport
    /// closures and handshake failures reconnect after a fixed delay.
    pub async fn run(mut self) -> Result<()> {
        let client = SlackApiClient::new(
            self.config.api_base.clone(),
            self.config.token.clone(),
            self.config.admin_token.clone(),
            self.config.request_timeout_ms,
            self.config.retry_max_attempts,
            self.config.retry_base_delay_ms,
        )?;

        let mut sweep_task: Option<JoinHandle<Result<SweepReport>>> = None;
        let mut sweep_started = false;
        let mut backfilled = false;

        loop {
            if sweep_task.as_ref().is_some_and(JoinHandle::is_finished) {
                if let Some(handle) = sweep_task.take() {
                    let report = handle
                        .await
                        .map_err(|error| anyhow!("command sweep task panicked: {error}"))??;
                    debug!(?report, "command sweep finished");
                }
            }

            let snapshot = match client.rtm_start().await {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    warn!(%error, "handshake failed; retrying");
                    if wait_or_shutdown(self.config.reconnect_delay).await {
                        abort_sweep(&mut sweep_task);
                        return Ok(());
                    }
                    continue;
                }
            };

            let ids = IdentityMap::from_snapshot(
                &snapshot.channels,
                &snapshot.users,
                &snapshot.groups,
                &snapshot.ims,
            );
            let Some(bot_user_id) = ids.user_id(&self.config.bot_name).map(ToOwned::to_owned)
            else {
                bail!("bot user {:?} is not in the snapshot", self.config.bot_name);
            };
            let admins = resolve_admins(&ids, &self.config.admins);

            if self.config.load_history && !backfilled {
                backfill_history(
                    &client,
                    &ids,
                    self.store.as_ref(),
                    self.config.page_delay,
                    &self.config.alert,
                    &bot_user_id,
                )
                .await?;
                backfilled = true;
            }

            if self.config.clear_commands && !sweep_started {
                sweep_started = true;
                sweep_task = Some(tokio::spawn(sweep_commands(
                    client.clone(),
                    ids.clone(),
                    self.commands.grammar().clone(),
                    bot_user_id.clone(),
                    self.config.page_delay,
                    true,
                )));
            }

            let socket = match connect_async(&snapshot.url).await {
                Ok((socket, _response)) => socket,
                Err(error) => {
                    warn!(%error, "socket connect failed; retrying");
                    if wait_or_shutdown(self.config.reconnect_delay).await {
                        abort_sweep(&mut sweep_task);
                        return Ok(());
                    }
                    continue;
                }
            };
            let (sink, source) = socket.split();
            info!(bot = %self.config.bot_name, "connected");

            let mut session = Session {
                commands: &self.commands,
                client: &client,
                store: self.store.as_ref(),
                admins,
                bot_user_id,
                alert: self.config.alert.clone(),
                ids,
                sink,
                pending: PendingReplies::default(),
            };

            for action in std::mem::take(&mut self.preloaded) {
                if let Err(error) = session.run_actions(EventScope::default(), Some(action)).await
                {
                    abort_sweep(&mut sweep_task);
                    return Err(error);
                }
            }

            match session.run(source).await {
                Ok(SessionEnd::Shutdown) => {
                    info!("shutdown requested");
                    abort_sweep(&mut sweep_task);
                    return Ok(());
                }
                Ok(SessionEnd::Closed) => {
                    warn!("connection closed; reconnecting");
                    if wait_or_shutdown(self.config.reconnect_delay).await {
                        abort_sweep(&mut sweep_task);
                        return Ok(());
                    }
                }
                Err(error) => {
                    abort_sweep(&mut sweep_task);
                    return Err(error);
                }
            }
        }
    }
}

fn abort_sweep(sweep_task: &mut Option<JoinHandle<Result<SweepReport>>>) {
    if let Some(handle) = sweep_task.take() {
        handle.abort();
    }
}

/// Sleeps for the reconnect delay; true means shutdown was requested instead.
async fn wait_or_shutdown(delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Denial goes back where the command was issued; only a DM invocation
/// (no channel name) answers into the sender's DM session.
fn admin_denied_reply(channel_name: Option<&str>, user: &str) -> SendMessage {
    SendMessage {
        channel: channel_name.map(ToOwned::to_owned),
        user: Some(user.to_string()),
        text: ADMIN_ONLY_REPLY.to_string(),
        on_delivered: None,
    }
}

fn resolve_admins(ids: &IdentityMap, names: &[String]) -> HashSet<String> {
    let mut admins = HashSet::new();
    for name in names {
        match ids.user_id(name) {
            Some(id) => {
                admins.insert(id.to_string());
            }
            None => warn!(admin = %name, "admin user not found in snapshot"),
        }
    }
    admins
}

enum SessionEnd {
    Closed,
    Shutdown,
}

/// Where an action came from; fills in reply targets the handler left open.
#[derive(Debug, Clone, Default)]
struct EventScope {
    /// Service id of the conversation that triggered the action.
    channel: Option<String>,
    user: Option<String>,
    ts: Option<String>,
}

struct Session<'a> {
    commands: &'a CommandSet,
    client: &'a SlackApiClient,
    store: &'a dyn HistoryStore,
    admins: HashSet<String>,
    bot_user_id: String,
    alert: String,
    ids: IdentityMap,
    sink: SocketSink,
    pending: PendingReplies,
}

impl Session<'_> {
    async fn run(&mut self, mut source: SocketSource) -> Result<SessionEnd> {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(SessionEnd::Shutdown),
                frame = source.next() => match frame {
                    None => return Ok(SessionEnd::Closed),
                    Some(Err(error)) => {
                        warn!(%error, "socket read failed");
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Ok(WsMessage::Close(_))) => return Ok(SessionEnd::Closed),
                    Some(Ok(WsMessage::Text(payload))) => {
                        match serde_json::from_str::<Value>(payload.as_str()) {
                            Ok(event) => self.handle_event(&event).await?,
                            Err(error) => debug!(%error, "unparseable frame dropped"),
                        }
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    async fn handle_event(&mut self, event: &Value) -> Result<()> {
        match classify(event) {
            InboundEvent::Message(message) => self.handle_message(message).await,
            InboundEvent::Delivery { reply_to } => self.handle_delivery(reply_to).await,
            InboundEvent::GroupJoin { id, name } => {
                info!(channel = %name, "joined group");
                self.ids.add_channel(&name, &id);
                Ok(())
            }
            InboundEvent::TeamJoin { id, name } => {
                info!(user = %name, "user joined team");
                self.ids.add_user(&name, &id);
                Ok(())
            }
            InboundEvent::Other => Ok(()),
        }
    }

    async fn handle_message(&mut self, message: MessageEvent) -> Result<()> {
        let is_dm = self.ids.user_for_dm(&message.channel).is_some();
        let channel_name = self
            .ids
            .channel_name(&message.channel)
            .map(ToOwned::to_owned);
        let scope = EventScope {
            channel: Some(message.channel.clone()),
            user: Some(message.user.clone()),
            ts: message.ts.clone(),
        };

        let route = route_message(
            self.commands.grammar(),
            self.commands.registry(),
            &self.admins,
            is_dm,
            channel_name.as_deref(),
            &message.user,
            &message.text,
        );
        match route {
            Route::Invoke { name, args } => {
                let Some(record) = self.commands.registry().lookup_filtered(&name).cloned()
                else {
                    return Ok(());
                };
                let timestamp = record
                    .wants_timestamp
                    .then_some(message.ts.as_deref())
                    .flatten();
                let call = CommandCall {
                    user: &message.user,
                    channel: channel_name.as_deref(),
                    args: &args,
                    timestamp,
                };
                debug!(command = %name, user = %message.user, "dispatching command");
                let action = record.handler().on_command(call).await?;
                self.run_actions(scope, action).await
            }
            Route::AdminDenied => {
                let reply = admin_denied_reply(channel_name.as_deref(), &message.user);
                self.run_actions(scope, Some(Action::Send(reply))).await
            }
            Route::DmHelp => {
                let is_admin = self.admins.contains(&message.user);
                let help = self.commands.registry().help_text(is_admin);
                let reply = SendMessage::to_user(message.user.clone(), help);
                self.run_actions(scope, Some(Action::Send(reply))).await
            }
            Route::Unfiltered => {
                let Some(channel_name) = channel_name else {
                    return Ok(());
                };
                let watchers: Vec<_> = self
                    .commands
                    .registry()
                    .unfiltered_handlers()
                    .iter()
                    .filter(|record| record.allows_channel(&channel_name))
                    .cloned()
                    .collect();
                for record in watchers {
                    let timestamp = record
                        .wants_timestamp
                        .then_some(message.ts.as_deref())
                        .flatten();
                    let call = MessageCall {
                        user: &message.user,
                        channel: &channel_name,
                        text: &message.text,
                        timestamp,
                    };
                    let action = record.handler().on_message(call).await?;
                    self.run_actions(scope.clone(), action).await?;
                }
                if persist_eligible(&message.text, &message.user, &self.bot_user_id, &self.alert)
                {
                    if let Some(ts) = message.ts {
                        self.store
                            .record(parley_command::HistoryRecord {
                                user_id: message.user,
                                channel_name,
                                text: message.text,
                                timestamp: ts,
                            })
                            .await?;
                    }
                }
                Ok(())
            }
            Route::Ignore => Ok(()),
        }
    }

    async fn handle_delivery(&mut self, reply_to: u64) -> Result<()> {
        let Some(entry) = self.pending.take(reply_to) else {
            return Ok(());
        };
        let scope = EventScope {
            channel: Some(entry.channel),
            user: None,
            ts: None,
        };
        let follow_up = (entry.callback)();
        self.run_actions(scope, follow_up).await
    }

    async fn run_actions(&mut self, scope: EventScope, root: Option<Action>) -> Result<()> {
        let mut effects = SessionEffects {
            session: self,
            scope,
        };
        execute(&mut effects, root).await
    }

    /// Picks the conversation id for an outbound send or upload: explicit
    /// channel name first, then the addressed user's DM session, then the
    /// scope of the triggering event.
    fn resolve_target(
        &self,
        channel: Option<&str>,
        user: Option<&str>,
        scope: &EventScope,
    ) -> Option<String> {
        if let Some(name) = channel {
            let resolved = self.ids.channel_id(name).map(ToOwned::to_owned);
            if resolved.is_none() {
                warn!(channel = %name, "unknown channel name; dropping action");
            }
            return resolved;
        }
        if let Some(user) = user {
            let resolved = self.ids.dm_for_user(user).map(ToOwned::to_owned);
            if resolved.is_none() {
                warn!(user = %user, "no DM session for user; dropping action");
            }
            return resolved;
        }
        scope.channel.clone()
    }
}

struct SessionEffects<'s, 'a> {
    session: &'s mut Session<'a>,
    scope: EventScope,
}

#[async_trait]
impl ActionEnvironment for SessionEffects<'_, '_> {
    async fn apply(&mut self, action: Action) -> Result<Option<Action>> {
        match action {
            Action::Send(send) => {
                let Some(target) = self.session.resolve_target(
                    send.channel.as_deref(),
                    send.user.as_deref(),
                    &self.scope,
                ) else {
                    return Ok(None);
                };
                let frames = build_frames(
                    &mut self.session.pending,
                    &target,
                    &send.text,
                    send.on_delivered,
                );
                for frame in frames {
                    self.session
                        .sink
                        .send(WsMessage::text(frame.to_string()))
                        .await
                        .context("send message frame")?;
                }
                Ok(None)
            }
            Action::DeleteSource => {
                let (Some(channel), Some(ts)) = (&self.scope.channel, &self.scope.ts) else {
                    warn!("delete requested without a source message");
                    return Ok(None);
                };
                self.session.client.delete_message(channel, ts, true).await?;
                Ok(None)
            }
            Action::React { emoji } => {
                let (Some(channel), Some(ts)) = (&self.scope.channel, &self.scope.ts) else {
                    warn!("reaction requested without a source message");
                    return Ok(None);
                };
                self.session.client.add_reaction(channel, ts, &emoji).await?;
                Ok(None)
            }
            Action::Upload(upload) => {
                let Some(target) = self.session.resolve_target(
                    upload.channel.as_deref(),
                    upload.user.as_deref(),
                    &self.scope,
                ) else {
                    return Ok(None);
                };
                let bytes = tokio::fs::read(&upload.path)
                    .await
                    .with_context(|| format!("read upload {}", upload.path.display()))?;
                let filename = upload
                    .path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or("upload");
                let filetype = upload
                    .path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or("");
                self.session
                    .client
                    .upload_file(&target, filename, filetype, bytes)
                    .await?;
                if upload.remove_after_upload {
                    if let Err(error) = tokio::fs::remove_file(&upload.path).await {
                        warn!(path = %upload.path.display(), %error, "upload cleanup failed");
                    }
                }
                Ok(None)
            }
            Action::QueryHistory(query) => {
                let records = self
                    .session
                    .store
                    .query(query.channel.as_deref(), query.user.as_deref())
                    .await?;
                Ok((query.callback)(records))
            }
            // The executor flattens sequences before they reach here.
            Action::Sequence(_) => {
                warn!("sequence action reached the effect layer");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_api::IdentityMap;

    use super::{resolve_admins, BotConfig};

    #[test]
    fn unit_defaults_are_usable() {
        let config = BotConfig::new("xoxb-token", "parley");
        assert_eq!(config.alert, "!");
        assert_eq!(config.api_base, "https://slack.com/api");
        assert!(!config.load_history);
        assert!(!config.clear_commands);
    }

    #[test]
    fn regression_admin_denial_answers_in_the_invoking_channel() {
        let reply = super::admin_denied_reply(Some("general"), "U1");
        assert_eq!(reply.channel.as_deref(), Some("general"));
        assert_eq!(reply.user.as_deref(), Some("U1"));
        assert_eq!(reply.text, super::ADMIN_ONLY_REPLY);

        let dm_reply = super::admin_denied_reply(None, "U1");
        assert!(dm_reply.channel.is_none());
        assert_eq!(dm_reply.user.as_deref(), Some("U1"));
    }

    #[test]
    fn unit_admin_names_resolve_to_ids_and_unknowns_are_dropped() {
        let mut ids = IdentityMap::default();
        ids.add_user("ada", "U1");
        let admins = resolve_admins(&ids, &["ada".to_string(), "ghost".to_string()]);
        assert!(admins.contains("U1"));
        assert_eq!(admins.len(), 1);
    }
}

//! Demo bot: a greeter with a history-backed activity command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use parley_command::{
    Action, CommandCall, CommandHandler, CommandSpec, HistoryQuery, MatchExpr, MessageCall,
    MessageHandler, SendMessage, WatcherSpec,
};
use parley_rtm::{Bot, BotConfig, JsonlHistoryStore};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "parley", about = "Realtime chat bot engine")]
struct Cli {
    /// Bot credential for the realtime and web APIs.
    #[arg(long, env = "SLACK_TOKEN")]
    token: String,

    /// Elevated credential for deleting other users' messages.
    #[arg(long, env = "SLACK_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// The bot's own user name.
    #[arg(long, env = "SLACK_BOT_NAME", default_value = "parley")]
    bot_name: String,

    /// Prefix that addresses the bot in channels.
    #[arg(long, default_value = "!")]
    alert: String,

    /// User names granted admin-only commands. Repeatable.
    #[arg(long = "admin")]
    admins: Vec<String>,

    /// Rebuild the history store from channel archives on startup.
    #[arg(long)]
    load_history: bool,

    /// Sweep old invocations and bot messages out of the archives.
    #[arg(long)]
    clear_commands: bool,

    /// Persist history to this JSONL file instead of memory.
    #[arg(long, env = "PARLEY_HISTORY_FILE")]
    history_file: Option<PathBuf>,

    /// Seconds between paginated history requests.
    #[arg(long, default_value_t = 1)]
    page_delay_secs: u64,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

struct Greeter;

#[async_trait]
impl CommandHandler for Greeter {
    async fn on_command(&self, call: CommandCall<'_>) -> Result<Option<Action>> {
        let name = call.args.get("name").unwrap_or("stranger");
        Ok(Some(Action::Send(SendMessage::reply(format!(
            "Hello, {name}!"
        )))))
    }
}

/// Reports how many stored messages a user has sent in the current channel.
struct Activity;

#[async_trait]
impl CommandHandler for Activity {
    async fn on_command(&self, call: CommandCall<'_>) -> Result<Option<Action>> {
        let Some(channel) = call.channel else {
            return Ok(Some(Action::Send(SendMessage::reply(
                "Activity counts only work in channels.",
            ))));
        };
        let user = call.args.get("who").unwrap_or(call.user).to_string();
        let mention = user.clone();
        let query = HistoryQuery::new(move |records| {
            Some(Action::Send(SendMessage::reply(format!(
                "<@{mention}> has {} stored messages here.",
                records.len()
            ))))
        })
        .in_channel(channel)
        .by_user(user);
        Ok(Some(Action::QueryHistory(query)))
    }
}

/// Admin-only cleanup: removes the invoking message.
struct Tidy;

#[async_trait]
impl CommandHandler for Tidy {
    async fn on_command(&self, _call: CommandCall<'_>) -> Result<Option<Action>> {
        Ok(Some(Action::DeleteSource))
    }
}

/// Waves back at greetings without being addressed.
struct Waver;

#[async_trait]
impl MessageHandler for Waver {
    async fn on_message(&self, call: MessageCall<'_>) -> Result<Option<Action>> {
        if call.text.to_lowercase().contains("hello") {
            return Ok(Some(Action::React {
                emoji: "wave".to_string(),
            }));
        }
        Ok(None)
    }
}

fn build_bot(cli: Cli) -> Result<Bot> {
    let mut config = BotConfig::new(cli.token, cli.bot_name);
    config.admin_token = cli.admin_token;
    config.alert = cli.alert;
    config.admins = cli.admins;
    config.load_history = cli.load_history;
    config.clear_commands = cli.clear_commands;
    config.page_delay = Duration::from_secs(cli.page_delay_secs);

    let mut bot = Bot::new(config);
    if let Some(path) = cli.history_file {
        bot = bot.with_store(Arc::new(JsonlHistoryStore::new(path)));
    }

    bot.register_command(
        CommandSpec::new("greet", MatchExpr::keyword("greet").word("name").end())
            .doc("Greets someone by name."),
        Arc::new(Greeter),
    )?;
    bot.register_command(
        CommandSpec::new(
            "activity",
            MatchExpr::keyword("activity").optional_word("who").end(),
        )
        .doc("Counts a user's stored messages in this channel."),
        Arc::new(Activity),
    )?;
    bot.register_command(
        CommandSpec::new("tidy", MatchExpr::keyword("tidy").end())
            .doc("Deletes the invoking message.")
            .admin_only()
            .with_timestamp(),
        Arc::new(Tidy),
    )?;
    bot.register_watcher(WatcherSpec::new("waver"), Arc::new(Waver));
    Ok(bot)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    build_bot(cli)?.run().await
}

#[cfg(test)]
mod tests {
    use parley_command::{CommandCall, CommandGrammar, CommandHandler, MatchExpr};

    use super::Greeter;

    #[tokio::test]
    async fn unit_greeter_replies_with_the_captured_name() {
        let mut grammar = CommandGrammar::new("!");
        grammar
            .add(&MatchExpr::keyword("greet").word("name").end(), "greet", 0)
            .expect("add greet");
        let matched = grammar.try_match("!greet ada", false).expect("match");
        let call = CommandCall {
            user: "U1",
            channel: Some("general"),
            args: &matched.args,
            timestamp: None,
        };
        let action = Greeter.on_command(call).await.expect("greet");
        let debug = format!("{action:?}");
        assert!(debug.contains("Hello, ada!"));
    }
}

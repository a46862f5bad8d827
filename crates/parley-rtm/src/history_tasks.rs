//! Background work over channel archives: the startup backfill and the
//! one-shot command sweep.
//!
//! Both walk the full paginated history of every known conversation, so both
//! are paced with the same fixed delay the pager uses. The sweep runs on a
//! spawned task with point-in-time clones of the client, identity map, and
//! grammar; the backfill runs inline before the socket connects.

use std::time::Duration;

use anyhow::Result;
use parley_api::{fetch_full_history, IdentityMap, SlackApiClient};
use parley_command::{CommandGrammar, HistoryRecord};
use serde_json::Value;
use tracing::{info, warn};

use crate::events::is_plain_message;
use crate::store::{persist_eligible, HistoryStore};

/// Outcome counters for a command sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: u64,
    pub deleted: u64,
    pub skipped: u64,
}

/// Which credential a sweep deletion needs. The bot's own messages go with
/// its own credential; removing other users' invocations needs elevation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepCredential {
    Plain,
    Elevated,
}

/// Decides whether an archived message is sweep-worthy, and with which
/// credential. DM sessions only ever yield the bot's own messages: deleting
/// another user's DM text is never our business.
pub(crate) fn classify_for_sweep(
    message: &Value,
    is_dm: bool,
    bot_user_id: &str,
    grammar: &CommandGrammar,
) -> Option<SweepCredential> {
    message.get("ts").and_then(Value::as_str)?;
    let user = message.get("user").and_then(Value::as_str);
    if user == Some(bot_user_id) {
        return Some(SweepCredential::Plain);
    }
    if is_dm {
        return None;
    }
    let text = message.get("text").and_then(Value::as_str)?;
    user?;
    if grammar.matches(text, false) {
        return Some(SweepCredential::Elevated);
    }
    None
}

/// Rebuilds the store from the archives of every known channel and group.
/// The store is cleared first, so a restart never doubles up records.
pub(crate) async fn backfill_history(
    client: &SlackApiClient,
    ids: &IdentityMap,
    store: &dyn HistoryStore,
    page_delay: Duration,
    alert: &str,
    bot_user_id: &str,
) -> Result<()> {
    store.clear().await?;
    let mut stored = 0usize;
    for channel_id in ids.channel_ids() {
        let Some(channel_name) = ids.channel_name(channel_id) else {
            continue;
        };
        let messages = fetch_full_history(client, channel_id, page_delay).await?;
        for message in messages {
            if !is_plain_message(&message, false) {
                continue;
            }
            let (Some(user), Some(text), Some(ts)) = (
                message.get("user").and_then(Value::as_str),
                message.get("text").and_then(Value::as_str),
                message.get("ts").and_then(Value::as_str),
            ) else {
                continue;
            };
            if !persist_eligible(text, user, bot_user_id, alert) {
                continue;
            }
            store
                .record(HistoryRecord {
                    user_id: user.to_string(),
                    channel_name: channel_name.to_string(),
                    text: text.to_string(),
                    timestamp: ts.to_string(),
                })
                .await?;
            stored += 1;
        }
    }
    info!(records = stored, "history backfill complete");
    Ok(())
}

/// Walks every conversation and deletes the bot's own messages plus other
/// users' command invocations. Individual delete failures are logged and
/// counted, not fatal; a failed history fetch aborts the sweep.
pub(crate) async fn sweep_commands(
    client: SlackApiClient,
    ids: IdentityMap,
    grammar: CommandGrammar,
    bot_user_id: String,
    page_delay: Duration,
    include_dms: bool,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let channels: Vec<(String, bool)> = ids
        .channel_ids()
        .map(|id| (id.to_string(), false))
        .chain(
            include_dms
                .then(|| ids.dm_ids().map(|id| (id.to_string(), true)))
                .into_iter()
                .flatten(),
        )
        .collect();

    for (channel_id, is_dm) in channels {
        let messages = fetch_full_history(&client, &channel_id, page_delay).await?;
        for message in messages {
            report.examined += 1;
            let Some(credential) = classify_for_sweep(&message, is_dm, &bot_user_id, &grammar)
            else {
                continue;
            };
            let Some(ts) = message.get("ts").and_then(Value::as_str) else {
                continue;
            };
            let elevated = credential == SweepCredential::Elevated;
            match client.delete_message(&channel_id, ts, elevated).await {
                Ok(true) => {
                    report.deleted += 1;
                    if report.deleted % 100 == 0 {
                        info!(deleted = report.deleted, "command sweep progress");
                    }
                }
                Ok(false) => report.skipped += 1,
                Err(error) => {
                    warn!(channel = %channel_id, ts, %error, "sweep delete failed");
                    report.skipped += 1;
                }
            }
            tokio::time::sleep(page_delay).await;
        }
    }
    info!(
        examined = report.examined,
        deleted = report.deleted,
        skipped = report.skipped,
        "command sweep complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use parley_command::{CommandGrammar, MatchExpr};
    use serde_json::json;

    use super::{classify_for_sweep, SweepCredential};

    fn grammar() -> CommandGrammar {
        let mut grammar = CommandGrammar::new("!");
        grammar
            .add(&MatchExpr::keyword("greet").word("name"), "greet", 0)
            .expect("add greet");
        grammar
    }

    #[test]
    fn unit_bot_messages_use_the_plain_credential_everywhere() {
        let grammar = grammar();
        let message = json!({"user": "UBOT", "text": "hello ada", "ts": "1.0"});
        assert_eq!(
            classify_for_sweep(&message, false, "UBOT", &grammar),
            Some(SweepCredential::Plain)
        );
        assert_eq!(
            classify_for_sweep(&message, true, "UBOT", &grammar),
            Some(SweepCredential::Plain)
        );
    }

    #[test]
    fn unit_user_invocations_need_elevation_outside_dms() {
        let grammar = grammar();
        let invocation = json!({"user": "U1", "text": "!greet ada", "ts": "1.0"});
        assert_eq!(
            classify_for_sweep(&invocation, false, "UBOT", &grammar),
            Some(SweepCredential::Elevated)
        );
        // Other users' DM texts are never deleted.
        assert_eq!(classify_for_sweep(&invocation, true, "UBOT", &grammar), None);
    }

    #[test]
    fn unit_plain_chatter_is_left_alone() {
        let grammar = grammar();
        let chatter = json!({"user": "U1", "text": "good morning", "ts": "1.0"});
        assert_eq!(classify_for_sweep(&chatter, false, "UBOT", &grammar), None);
    }

    #[test]
    fn regression_messages_without_timestamps_are_never_swept() {
        let grammar = grammar();
        let message = json!({"user": "UBOT", "text": "hello"});
        assert_eq!(classify_for_sweep(&message, false, "UBOT", &grammar), None);
    }
}

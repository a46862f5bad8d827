//! Classification of inbound realtime events.

use serde_json::Value;

/// A plain user message worth dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub user: String,
    pub channel: String,
    pub text: String,
    pub ts: Option<String>,
}

/// One inbound event, reduced to what the dispatcher cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(MessageEvent),
    /// Confirmation that an outbound frame was delivered.
    Delivery { reply_to: u64 },
    GroupJoin { id: String, name: String },
    TeamJoin { id: String, name: String },
    Other,
}

/// True for regular user messages: a `message` type with non-empty text and
/// no `subtype`, `bot_id`, or reply-tracking field. History walks pass
/// `require_channel = false` because archived messages omit the channel.
pub fn is_plain_message(event: &Value, require_channel: bool) -> bool {
    event.get("type").and_then(Value::as_str) == Some("message")
        && event.get("reply_to").is_none()
        && event.get("subtype").is_none()
        && event.get("bot_id").is_none()
        && event.get("user").and_then(Value::as_str).is_some()
        && event
            .get("text")
            .and_then(Value::as_str)
            .is_some_and(|text| !text.is_empty())
        && (!require_channel
            || event
                .get("channel")
                .and_then(Value::as_str)
                .is_some_and(|channel| !channel.is_empty()))
}

/// Classifies one decoded socket payload.
pub fn classify(event: &Value) -> InboundEvent {
    if let Some(reply_to) = event.get("reply_to").and_then(Value::as_u64) {
        // Only successful confirmations correlate with a pending entry.
        if event.get("ok").and_then(Value::as_bool) == Some(true) {
            return InboundEvent::Delivery { reply_to };
        }
        return InboundEvent::Other;
    }

    match event.get("type").and_then(Value::as_str) {
        Some("message") if is_plain_message(event, true) => {
            let field = |name: &str| {
                event
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            InboundEvent::Message(MessageEvent {
                user: field("user"),
                channel: field("channel"),
                text: field("text"),
                ts: event.get("ts").and_then(Value::as_str).map(ToOwned::to_owned),
            })
        }
        Some("group_joined") => match join_pair(event.get("channel")) {
            Some((id, name)) => InboundEvent::GroupJoin { id, name },
            None => InboundEvent::Other,
        },
        Some("team_join") => match join_pair(event.get("user")) {
            Some((id, name)) => InboundEvent::TeamJoin { id, name },
            None => InboundEvent::Other,
        },
        _ => InboundEvent::Other,
    }
}

fn join_pair(value: Option<&Value>) -> Option<(String, String)> {
    let value = value?;
    let id = value.get("id")?.as_str()?.to_string();
    let name = value.get("name")?.as_str()?.to_string();
    Some((id, name))
}

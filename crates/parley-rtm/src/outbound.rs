//! Outbound message framing and delivery correlation.
//!
//! Every frame sent over the socket carries a numeric id; the service echoes
//! the id back in a confirmation event. Delivery callbacks are parked here
//! keyed by that id. Long texts are split into fixed-size chunks and only the
//! final chunk's id carries the callback.

use std::collections::HashMap;

use parley_command::DeliveryCallback;
use serde_json::{json, Value};

/// Frame payload limit imposed by the service.
pub(crate) const MESSAGE_CHUNK_LIMIT: usize = 4000;

pub(crate) struct PendingReply {
    pub channel: String,
    pub callback: DeliveryCallback,
}

/// Ids handed out and callbacks awaiting confirmation, per connection.
#[derive(Default)]
pub(crate) struct PendingReplies {
    next_id: u64,
    entries: HashMap<u64, PendingReply>,
}

impl PendingReplies {
    /// Allocates the id for the next outbound frame.
    pub fn next_frame_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn register(&mut self, id: u64, channel: String, callback: DeliveryCallback) {
        self.entries.insert(id, PendingReply { channel, callback });
    }

    /// Removes and returns the entry for a confirmed id. A second
    /// confirmation of the same id finds nothing.
    pub fn take(&mut self, id: u64) -> Option<PendingReply> {
        self.entries.remove(&id)
    }

    /// Drops all parked callbacks. Called on reconnect, where confirmations
    /// for the old connection can no longer arrive.
    pub fn clear(&mut self) {
        self.next_id = 0;
        self.entries.clear();
    }
}

/// Splits a text into chunks of at most `limit` characters. Empty text
/// produces no chunks at all.
pub(crate) fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub(crate) fn message_frame(id: u64, channel: &str, text: &str) -> Value {
    json!({
        "id": id,
        "type": "message",
        "channel": channel,
        "text": text,
    })
}

/// Allocates ids and builds the ordered frames for one send. The delivery
/// callback, if any, is parked under the final frame's id only; an empty
/// text produces no frames and drops the callback.
pub(crate) fn build_frames(
    pending: &mut PendingReplies,
    channel: &str,
    text: &str,
    mut callback: Option<DeliveryCallback>,
) -> Vec<Value> {
    let chunks = chunk_text(text, MESSAGE_CHUNK_LIMIT);
    let last = chunks.len().saturating_sub(1);
    let mut frames = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.into_iter().enumerate() {
        let id = pending.next_frame_id();
        if index == last {
            if let Some(callback) = callback.take() {
                pending.register(id, channel.to_string(), callback);
            }
        }
        frames.push(message_frame(id, channel, &chunk));
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::{build_frames, chunk_text, message_frame, PendingReplies, MESSAGE_CHUNK_LIMIT};

    #[test]
    fn unit_long_text_splits_with_remainder_last() {
        let chunks = chunk_text(&"x".repeat(9000), MESSAGE_CHUNK_LIMIT);
        let lengths: Vec<usize> = chunks.iter().map(String::len).collect();
        assert_eq!(lengths, vec![4000, 4000, 1000]);
    }

    #[test]
    fn unit_short_text_is_a_single_chunk() {
        assert_eq!(chunk_text("hello", MESSAGE_CHUNK_LIMIT), vec!["hello"]);
    }

    #[test]
    fn regression_empty_text_produces_no_frames() {
        assert!(chunk_text("", MESSAGE_CHUNK_LIMIT).is_empty());
    }

    #[test]
    fn unit_ids_start_at_zero_and_increase() {
        let mut pending = PendingReplies::default();
        assert_eq!(pending.next_frame_id(), 0);
        assert_eq!(pending.next_frame_id(), 1);
        assert_eq!(pending.next_frame_id(), 2);
        pending.clear();
        assert_eq!(pending.next_frame_id(), 0);
    }

    #[test]
    fn unit_confirmation_fires_at_most_once() {
        let mut pending = PendingReplies::default();
        let id = pending.next_frame_id();
        pending.register(id, "C1".to_string(), Box::new(|| None));
        let entry = pending.take(id).expect("first take");
        assert_eq!(entry.channel, "C1");
        assert!(pending.take(id).is_none());
    }

    #[test]
    fn unit_frames_carry_id_channel_and_text() {
        let frame = message_frame(7, "C1", "hi");
        assert_eq!(frame["id"], 7);
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["channel"], "C1");
        assert_eq!(frame["text"], "hi");
    }

    #[test]
    fn regression_only_the_final_frame_of_a_long_send_carries_the_callback() {
        let mut pending = PendingReplies::default();
        let frames = build_frames(
            &mut pending,
            "C1",
            &"x".repeat(9000),
            Some(Box::new(|| None)),
        );
        assert_eq!(frames.len(), 3);
        let ids: Vec<u64> = frames
            .iter()
            .map(|frame| frame["id"].as_u64().expect("frame id"))
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);

        assert!(pending.take(0).is_none());
        assert!(pending.take(1).is_none());
        let entry = pending.take(2).expect("callback parked under final id");
        assert_eq!(entry.channel, "C1");
    }

    #[test]
    fn unit_short_send_registers_its_single_frame() {
        let mut pending = PendingReplies::default();
        let frames = build_frames(&mut pending, "C1", "hi", Some(Box::new(|| None)));
        assert_eq!(frames.len(), 1);
        assert!(pending.take(0).is_some());
    }

    #[test]
    fn unit_empty_send_builds_nothing_and_drops_the_callback() {
        let mut pending = PendingReplies::default();
        let frames = build_frames(&mut pending, "C1", "", Some(Box::new(|| None)));
        assert!(frames.is_empty());
        // No id was allocated, so nothing can ever confirm.
        assert_eq!(pending.next_frame_id(), 0);
    }
}

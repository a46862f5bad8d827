//! Cursor-walking history fetcher.
//!
//! The remote API pages backwards in time: each request passes the minimum
//! timestamp seen so far as the `latest` cursor. The service's exclusive
//! cursor flag is not trustworthy, so results are de-duplicated by timestamp
//! on our side. Requests are paced with a fixed delay to respect rate limits.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use crate::client::HistoryPager;

/// Fetches the complete history of one channel or DM session, oldest page
/// last. Pagination stops when the service reports no more pages; a page
/// response missing that flag aborts the run with an error.
pub async fn fetch_full_history(
    pager: &dyn HistoryPager,
    channel_id: &str,
    page_delay: Duration,
) -> Result<Vec<Value>> {
    let mut collected = Vec::new();
    let mut seen_timestamps: HashSet<String> = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut min_ts = f64::INFINITY;

    loop {
        tokio::time::sleep(page_delay).await;
        let page = pager.page(channel_id, cursor.as_deref()).await?;
        for message in page.messages {
            let Some(ts) = message.get("ts").and_then(Value::as_str) else {
                continue;
            };
            if !seen_timestamps.insert(ts.to_string()) {
                continue;
            }
            if let Ok(value) = ts.parse::<f64>() {
                if value < min_ts {
                    min_ts = value;
                    cursor = Some(ts.to_string());
                }
            }
            collected.push(message);
        }
        debug!(channel = channel_id, total = collected.len(), "history page consumed");
        if !page.has_more {
            break;
        }
    }
    Ok(collected)
}

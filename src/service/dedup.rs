use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::feed::ParsedItem;
use crate::storage::{Article, NewArticle};

/// Keep only items whose link is not already stored for the feed.
///
/// Parser order is preserved. A link repeated inside `items` is emitted once,
/// so the batch never carries two articles for the same (feed, link). Known
/// links are dropped even if their content changed.
pub fn dedup(feed_id: i64, existing: &[Article], items: Vec<ParsedItem>) -> Vec<NewArticle> {
    let mut seen: HashSet<String> = existing.iter().map(|a| a.link.clone()).collect();

    items
        .into_iter()
        .filter(|item| seen.insert(item.link.clone()))
        .map(|item| article_from_item(feed_id, item))
        .collect()
}

/// Convert a parsed item into an unsaved, unread, unbookmarked article.
///
/// Never fails: an unparsable date becomes the current time.
pub fn article_from_item(feed_id: i64, item: ParsedItem) -> NewArticle {
    let date = parse_item_date(&item.date).unwrap_or_else(|| {
        tracing::debug!(
            feed_id,
            link = %item.link,
            raw_date = %item.date,
            "Unparsable item date, using current time"
        );
        Utc::now().timestamp()
    });

    NewArticle {
        feed_id,
        title: item.title,
        body: item.description,
        link: item.link,
        date,
        is_read: false,
        is_bookmark: false,
    }
}

/// RFC 1123 / RFC 2822 first (RSS `pubDate`), then RFC 3339 (`dc:date`).
fn parse_item_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.timestamp())
}

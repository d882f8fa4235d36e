//! Fixtures shared by the unit tests.

use crate::digest::chunking::Chunk;
use crate::digest::links::LinkProcessor;
use crate::digest::message::Message;
use crate::digest::relationship::Cluster;
use chrono::{DateTime, Duration, TimeZone, Utc};

pub const SERVER: &str = "100";
pub const BASE_URL: &str = "https://discord.com/channels";

pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

pub fn links() -> LinkProcessor {
    LinkProcessor::new(BASE_URL)
}

pub fn message(id: &str, author: &str, channel: &str, offset_secs: i64, body: &str) -> Message {
    Message::new(id, author, SERVER, channel, ts(offset_secs), body)
}

pub fn link(channel: &str, id: &str) -> String {
    links().build_link(SERVER, channel, id)
}

/// A chunk holding all `messages` as one cluster.
pub fn chunk_of(index: usize, messages: Vec<Message>) -> Chunk {
    let start = messages.first().map(|m| m.timestamp).unwrap_or_else(|| ts(0));
    let end = messages.last().map(|m| m.timestamp).unwrap_or(start);
    let channel_id = messages
        .first()
        .map(|m| m.channel_id.clone())
        .unwrap_or_default();
    Chunk {
        index,
        clusters: vec![Cluster {
            id: index,
            channel_id,
            messages,
            keywords: Vec::new(),
            start,
            end,
            forward_refs: Vec::new(),
        }],
        estimated_tokens: 0,
        oversized: false,
    }
}

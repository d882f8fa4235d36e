use crate::digest::text_cleaner;
use crate::error::DigestError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// One chat message. Immutable once loaded; `cleaned` is derived from `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author: String,
    pub channel_id: String,
    pub server_id: String,
    pub channel_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub cleaned: String,
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        server_id: impl Into<String>,
        channel_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        let cleaned = text_cleaner::clean(&body);
        Self {
            id: id.into(),
            author: author.into(),
            channel_id: channel_id.into(),
            server_id: server_id.into(),
            channel_name: None,
            timestamp,
            body,
            cleaned,
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = Some(name.into());
        self
    }
}

/// Flat record shape produced by the export preprocessing step.
#[derive(Debug, Clone, Deserialize)]
struct MessageRecord {
    id: String,
    #[serde(alias = "author_name")]
    author: String,
    channel_id: String,
    #[serde(alias = "guild_id")]
    server_id: String,
    #[serde(default)]
    channel_name: Option<String>,
    #[serde(alias = "message_timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(alias = "content", alias = "message_content")]
    body: String,
    #[serde(default)]
    reply_to: Option<String>,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        let mut message = Message::new(
            record.id,
            record.author,
            record.server_id,
            record.channel_id,
            record.timestamp,
            record.body,
        );
        if let Some(name) = record.channel_name {
            message = message.with_channel_name(name);
        }
        match record.reply_to.filter(|r| !r.trim().is_empty()) {
            Some(reply_to) => message.with_reply_to(reply_to),
            None => message,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedMessages {
    pub messages: Vec<Message>,
    pub skipped_empty: usize,
    /// Exporter entries without a usable `id`.
    pub skipped_missing_id: usize,
}

impl LoadedMessages {
    fn push(&mut self, message: Message) {
        if message.body.trim().is_empty() {
            self.skipped_empty += 1;
        } else {
            self.messages.push(message);
        }
    }
}

fn str_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cursor = root;
    for part in path {
        cursor = cursor.get(*part)?;
    }
    cursor.as_str()
}

/// Chat-exporter document: guild/channel metadata plus a `messages` array.
fn load_export_document(doc: &Value, out: &mut LoadedMessages) -> Result<()> {
    let server_id = str_at(doc, &["guild", "id"])
        .ok_or_else(|| DigestError::InvalidInput("export document missing guild.id".to_string()))?;
    let channel_id = str_at(doc, &["channel", "id"])
        .ok_or_else(|| DigestError::InvalidInput("export document missing channel.id".to_string()))?;
    let channel_name = str_at(doc, &["channel", "name"]).map(str::to_string);
    let messages = doc
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| DigestError::InvalidInput("export document missing messages array".to_string()))?;

    for entry in messages {
        let Some(id) = entry
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
        else {
            out.skipped_missing_id += 1;
            continue;
        };
        let raw_ts = entry
            .get("timestamp")
            .and_then(Value::as_str)
            .with_context(|| format!("message {id} missing timestamp"))?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts)
            .with_context(|| format!("message {id} has invalid timestamp `{raw_ts}`"))?
            .with_timezone(&Utc);
        let author = str_at(entry, &["author", "nickname"])
            .or_else(|| str_at(entry, &["author", "name"]))
            .unwrap_or("unknown");
        let body = entry.get("content").and_then(Value::as_str).unwrap_or("");

        let mut message = Message::new(id, author, server_id, channel_id, timestamp, body);
        if let Some(name) = &channel_name {
            message = message.with_channel_name(name.as_str());
        }
        if let Some(reply_to) = str_at(entry, &["reference", "messageId"]) {
            message = message.with_reply_to(reply_to);
        }
        out.push(message);
    }
    Ok(())
}

pub fn parse_messages(raw: &str) -> Result<LoadedMessages> {
    let mut out = LoadedMessages::default();
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Ok(out);
    }

    if trimmed.starts_with('[') {
        let records: Vec<MessageRecord> =
            serde_json::from_str(trimmed).context("failed to parse message array")?;
        for record in records {
            out.push(record.into());
        }
        return Ok(out);
    }

    if let Ok(doc) = serde_json::from_str::<Value>(trimmed)
        && doc.get("messages").is_some()
    {
        load_export_document(&doc, &mut out)?;
        return Ok(out);
    }

    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: MessageRecord = serde_json::from_str(line)
            .with_context(|| format!("failed to parse message on line {}", line_no + 1))?;
        out.push(record.into());
    }
    Ok(out)
}

pub fn load_messages(path: &Path) -> Result<LoadedMessages> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_messages(&raw).with_context(|| format!("failed to load messages from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::parse_messages;

    #[test]
    fn parses_flat_record_array_and_cleans_bodies() {
        let raw = r#"[
            {"id":"1","author":"ana","channel_id":"10","server_id":"99",
             "timestamp":"2024-05-01T10:00:00Z","content":"**Release** <@5> v2 is out"},
            {"id":"2","author":"bo","channel_id":"10","server_id":"99",
             "timestamp":"2024-05-01T10:01:00+02:00","content":"nice","reply_to":"1"}
        ]"#;
        let loaded = parse_messages(raw).expect("parse array");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].cleaned, "Release v2 is out");
        assert_eq!(loaded.messages[1].reply_to.as_deref(), Some("1"));
        assert_eq!(
            loaded.messages[1].timestamp.to_rfc3339(),
            "2024-05-01T08:01:00+00:00"
        );
    }

    #[test]
    fn parses_jsonl_and_skips_empty_bodies() {
        let raw = concat!(
            "{\"id\":\"1\",\"author\":\"a\",\"channel_id\":\"c\",\"server_id\":\"s\",\"timestamp\":\"2024-05-01T10:00:00Z\",\"content\":\"hello there\"}\n",
            "\n",
            "{\"id\":\"2\",\"author\":\"a\",\"channel_id\":\"c\",\"server_id\":\"s\",\"timestamp\":\"2024-05-01T10:00:05Z\",\"content\":\"   \"}\n",
        );
        let loaded = parse_messages(raw).expect("parse jsonl");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.skipped_empty, 1);
    }

    #[test]
    fn parses_exporter_document() {
        let raw = r#"{
            "guild": {"id": "668903786361651200", "name": "Ergo"},
            "channel": {"id": "111", "name": "dev"},
            "messages": [
                {"id": "500", "timestamp": "2024-05-01T10:00:00+00:00",
                 "content": "merged the node PR", "author": {"name": "kushti"}},
                {"id": "501", "timestamp": "2024-05-01T10:02:00+00:00",
                 "content": "great", "author": {"name": "joe", "nickname": "Joe"},
                 "reference": {"messageId": "500"}}
            ]
        }"#;
        let loaded = parse_messages(raw).expect("parse export");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].server_id, "668903786361651200");
        assert_eq!(loaded.messages[0].channel_name.as_deref(), Some("dev"));
        assert_eq!(loaded.messages[1].author, "Joe");
        assert_eq!(loaded.messages[1].reply_to.as_deref(), Some("500"));
    }

    #[test]
    fn exporter_entries_without_id_are_counted() {
        let raw = r#"{
            "guild": {"id": "1"},
            "channel": {"id": "2", "name": "dev"},
            "messages": [
                {"timestamp": "2024-05-01T10:00:00+00:00",
                 "content": "orphaned system notice", "author": {"name": "bot"}},
                {"id": "", "timestamp": "2024-05-01T10:00:30+00:00",
                 "content": "blank id", "author": {"name": "bot"}},
                {"id": "7", "timestamp": "2024-05-01T10:01:00+00:00",
                 "content": "wallet 5.0.1 released", "author": {"name": "ana"}}
            ]
        }"#;
        let loaded = parse_messages(raw).expect("parse export");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].id, "7");
        assert_eq!(loaded.skipped_missing_id, 2);
        assert_eq!(loaded.skipped_empty, 0);
    }

    #[test]
    fn empty_input_yields_no_messages() {
        let loaded = parse_messages("  \n").expect("empty ok");
        assert!(loaded.messages.is_empty());
    }
}

use crate::digest::message::Message;
use crate::error::DigestError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub server_id: String,
    pub channel_id: String,
    pub message_id: String,
}

/// Builds and parses `{base}/{server}/{channel}/{message}` permalinks.
#[derive(Debug, Clone)]
pub struct LinkProcessor {
    base_url: String,
}

fn is_id_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

fn is_well_formed_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(is_id_char)
}

impl LinkProcessor {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn build_link(&self, server_id: &str, channel_id: &str, message_id: &str) -> String {
        format!("{}/{server_id}/{channel_id}/{message_id}", self.base_url)
    }

    pub fn link_for(&self, message: &Message) -> String {
        self.build_link(&message.server_id, &message.channel_id, &message.id)
    }

    pub fn parse_link(&self, link: &str) -> Result<MessageRef, DigestError> {
        let malformed = |reason: &str| DigestError::MalformedLink {
            link: link.to_string(),
            reason: reason.to_string(),
        };

        let rest = link
            .strip_prefix(self.base_url.as_str())
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| malformed("unexpected link base"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        let [server_id, channel_id, message_id] = parts.as_slice() else {
            return Err(malformed("expected server/channel/message segments"));
        };
        if ![server_id, channel_id, message_id]
            .iter()
            .all(|id| is_well_formed_id(id))
        {
            return Err(malformed("segment is empty or has invalid characters"));
        }

        Ok(MessageRef {
            server_id: server_id.to_string(),
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
        })
    }

    /// Every substring that starts with the link base, cut at the first
    /// character that cannot belong to a permalink.
    pub fn find_candidates<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)> {
        let mut out = Vec::new();
        let mut offset = 0usize;
        while let Some(pos) = text[offset..].find(self.base_url.as_str()) {
            let start = offset + pos;
            let tail = &text[start + self.base_url.len()..];
            let len = tail
                .find(|c: char| !(is_id_char(c) || c == '/'))
                .unwrap_or(tail.len());
            let end = start + self.base_url.len() + len;
            out.push((start, text[start..end].trim_end_matches('/')));
            offset = end.max(start + 1);
        }
        out
    }
}

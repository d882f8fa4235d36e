//! Groups chronologically ordered messages into conversational clusters.
//!
//! Single forward pass with one open cluster per channel. A reply joins the
//! cluster of the message it answers while that cluster is open, even when
//! it sits in another channel. A cluster, once closed, is never reopened:
//! late replies to it carry a [`ForwardReference`] in whichever cluster they
//! land in.

use crate::digest::config::ClusteringConfig;
use crate::digest::links::LinkProcessor;
use crate::digest::message::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

const STOPWORDS: [&str; 40] = [
    "about", "after", "again", "also", "been", "before", "being", "could", "does", "doing",
    "dont", "from", "have", "here", "into", "just", "like", "more", "much", "only", "really",
    "should", "some", "than", "that", "their", "them", "then", "there", "these", "they",
    "this", "those", "very", "want", "were", "what", "when", "will", "with",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardReference {
    pub message_id: String,
    pub refers_to: String,
    pub target_cluster: usize,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: usize,
    pub channel_id: String,
    pub messages: Vec<Message>,
    pub keywords: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub forward_refs: Vec<ForwardReference>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.id.as_str())
    }

    /// Prompt text for the cluster, one line per message.
    pub fn render(&self, links: &LinkProcessor) -> String {
        let mut out = String::new();
        let channel = self
            .messages
            .first()
            .and_then(|m| m.channel_name.as_deref())
            .unwrap_or(self.channel_id.as_str());
        out.push_str(&format!(
            "## Thread in #{channel} ({} message(s))\n",
            self.messages.len()
        ));
        if !self.keywords.is_empty() {
            out.push_str(&format!("Topics: {}\n", self.keywords.join(", ")));
        }
        for fwd in &self.forward_refs {
            out.push_str(&format!(
                "Note: message {} continues the earlier discussion of message {}\n",
                fwd.message_id, fwd.refers_to
            ));
        }
        for message in &self.messages {
            let reply = match &message.reply_to {
                Some(target) => format!(" (reply to {target})"),
                None => String::new(),
            };
            out.push_str(&format!(
                "- [{}] {} <{}>{}: {}\n",
                message.timestamp.format("%Y-%m-%d %H:%M"),
                message.author,
                links.link_for(message),
                reply,
                message.cleaned
            ));
        }
        out
    }
}

fn extract_keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| {
            let len = w.chars().count();
            len >= 4 && len < 24 && !w.chars().all(|c| c.is_numeric())
        })
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

struct OpenCluster {
    id: usize,
    channel_id: String,
    messages: Vec<Message>,
    keyword_counts: BTreeMap<String, usize>,
    forward_refs: Vec<ForwardReference>,
}

impl OpenCluster {
    fn new(id: usize, channel_id: &str) -> Self {
        Self {
            id,
            channel_id: channel_id.to_string(),
            messages: Vec::new(),
            keyword_counts: BTreeMap::new(),
            forward_refs: Vec::new(),
        }
    }

    fn push(&mut self, message: Message) {
        for keyword in extract_keywords(&message.cleaned) {
            *self.keyword_counts.entry(keyword).or_insert(0) += 1;
        }
        self.messages.push(message);
    }

    fn shared_keywords(&self, message: &Message) -> usize {
        extract_keywords(&message.cleaned)
            .iter()
            .filter(|k| self.keyword_counts.contains_key(k.as_str()))
            .count()
    }

    fn finish(self, max_keywords: usize) -> Cluster {
        let mut ranked: Vec<(String, usize)> = self.keyword_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let keywords = ranked
            .into_iter()
            .take(max_keywords)
            .map(|(k, _)| k)
            .collect();

        // non-empty by construction: a cluster is only opened to receive a message
        let start = self.messages.first().map(|m| m.timestamp).unwrap_or_default();
        let end = self.messages.last().map(|m| m.timestamp).unwrap_or(start);
        Cluster {
            id: self.id,
            channel_id: self.channel_id,
            messages: self.messages,
            keywords,
            start,
            end,
            forward_refs: self.forward_refs,
        }
    }
}

pub struct RelationshipAnalyzer {
    cfg: ClusteringConfig,
}

impl RelationshipAnalyzer {
    pub fn new(cfg: ClusteringConfig) -> Self {
        Self { cfg }
    }

    /// Whether `message` must start a new cluster instead of extending `open`.
    /// Ties at a threshold close the cluster.
    fn breaks_continuity(&self, open: &OpenCluster, message: &Message) -> bool {
        let Some(last) = open.messages.last() else {
            return false;
        };
        let gap_secs = (message.timestamp - last.timestamp).num_seconds().max(0) as u64;
        if gap_secs >= self.cfg.inactivity_gap_secs {
            return true;
        }
        if message.author == last.author {
            return false;
        }
        let keyword_link = self.cfg.keyword_overlap_min > 0
            && gap_secs < self.cfg.keyword_window_secs
            && open.shared_keywords(message) >= self.cfg.keyword_overlap_min;
        !keyword_link
    }

    pub fn cluster(&self, mut messages: Vec<Message>) -> Vec<Cluster> {
        messages.sort_by_key(|m| m.timestamp);

        let max_keywords = self.cfg.max_cluster_keywords;
        let mut next_id = 0usize;
        let mut open: BTreeMap<String, OpenCluster> = BTreeMap::new();
        let mut closed: Vec<Cluster> = Vec::new();
        let mut owner: HashMap<String, usize> = HashMap::new();

        for message in messages {
            let reply_target = message
                .reply_to
                .as_ref()
                .and_then(|r| owner.get(r).map(|cluster_id| (r.clone(), *cluster_id)));

            // a reply follows its target into any still-open cluster below the cap
            let reply_home = reply_target.as_ref().and_then(|(_, cluster_id)| {
                open.iter()
                    .find(|(_, c)| c.id == *cluster_id)
                    .filter(|(_, c)| c.messages.len() < self.cfg.max_cluster_messages)
                    .map(|(channel, _)| channel.clone())
            });
            if let Some(home) = reply_home
                && let Some(target) = open.get_mut(&home)
            {
                owner.insert(message.id.clone(), target.id);
                target.push(message);
                continue;
            }

            if let Some(current) = open.get(&message.channel_id) {
                let close = current.messages.len() >= self.cfg.max_cluster_messages
                    || self.breaks_continuity(current, &message);
                if close && let Some(done) = open.remove(&message.channel_id) {
                    debug!(cluster = done.id, size = done.messages.len(), "closed cluster");
                    closed.push(done.finish(max_keywords));
                }
            }

            let target = open.entry(message.channel_id.clone()).or_insert_with(|| {
                let cluster = OpenCluster::new(next_id, &message.channel_id);
                next_id += 1;
                cluster
            });

            if let Some((refers_to, cluster_id)) = reply_target
                && cluster_id != target.id
            {
                target.forward_refs.push(ForwardReference {
                    message_id: message.id.clone(),
                    refers_to,
                    target_cluster: cluster_id,
                });
            }

            owner.insert(message.id.clone(), target.id);
            target.push(message);
        }

        let mut remaining: Vec<OpenCluster> = open.into_values().collect();
        remaining.sort_by_key(|c| c.id);
        closed.extend(remaining.into_iter().map(|c| c.finish(max_keywords)));
        closed.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::{RelationshipAnalyzer, extract_keywords};
    use crate::digest::config::ClusteringConfig;
    use crate::digest::message::Message;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn msg(id: &str, author: &str, channel: &str, offset_secs: i64, body: &str) -> Message {
        Message::new(id, author, "1", channel, t0() + Duration::seconds(offset_secs), body)
    }

    fn cfg(gap: u64, cap: usize) -> ClusteringConfig {
        ClusteringConfig {
            inactivity_gap_secs: gap,
            max_cluster_messages: cap,
            keyword_overlap_min: 0,
            keyword_window_secs: 0,
            max_cluster_keywords: 5,
        }
    }

    fn ids(clusters: &[super::Cluster]) -> Vec<Vec<String>> {
        clusters
            .iter()
            .map(|c| c.message_ids().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn gap_equal_to_threshold_closes_cluster() {
        let analyzer = RelationshipAnalyzer::new(cfg(600, 10));
        let clusters = analyzer.cluster(vec![
            msg("1", "ana", "c", 0, "first"),
            msg("2", "ana", "c", 599, "second"),
            msg("3", "ana", "c", 1199, "third"),
        ]);
        assert_eq!(ids(&clusters), vec![vec!["1", "2"], vec!["3"]]);
    }

    #[test]
    fn author_change_without_reply_starts_new_cluster() {
        let analyzer = RelationshipAnalyzer::new(cfg(900, 10));
        let clusters = analyzer.cluster(vec![
            msg("1", "ana", "c", 0, "a"),
            msg("2", "ana", "c", 10, "b"),
            msg("3", "bo", "c", 20, "c"),
        ]);
        assert_eq!(ids(&clusters), vec![vec!["1", "2"], vec!["3"]]);
    }

    #[test]
    fn reply_overrides_author_and_gap_heuristics() {
        let analyzer = RelationshipAnalyzer::new(cfg(60, 10));
        let clusters = analyzer.cluster(vec![
            msg("1", "ana", "c", 0, "question"),
            msg("2", "bo", "c", 3000, "late answer").with_reply_to("1"),
        ]);
        assert_eq!(ids(&clusters), vec![vec!["1", "2"]]);
        assert!(clusters[0].forward_refs.is_empty());
    }

    #[test]
    fn reply_to_closed_cluster_attaches_forward_reference() {
        let analyzer = RelationshipAnalyzer::new(cfg(900, 10));
        let clusters = analyzer.cluster(vec![
            msg("1", "ana", "c", 0, "original"),
            msg("2", "bo", "c", 10, "unrelated"),
            msg("3", "cy", "c", 20, "answer").with_reply_to("1"),
        ]);
        assert_eq!(ids(&clusters), vec![vec!["1"], vec!["2"], vec!["3"]]);
        let note = &clusters[2].forward_refs[0];
        assert_eq!(note.message_id, "3");
        assert_eq!(note.refers_to, "1");
        assert_eq!(note.target_cluster, clusters[0].id);
    }

    #[test]
    fn soft_cap_closes_even_for_replies() {
        let analyzer = RelationshipAnalyzer::new(cfg(900, 2));
        let clusters = analyzer.cluster(vec![
            msg("1", "ana", "c", 0, "a"),
            msg("2", "ana", "c", 5, "b"),
            msg("3", "ana", "c", 10, "c").with_reply_to("1"),
        ]);
        assert_eq!(ids(&clusters), vec![vec!["1", "2"], vec!["3"]]);
        assert_eq!(clusters[1].forward_refs.len(), 1);
    }

    #[test]
    fn shared_keywords_bridge_author_change_inside_window() {
        let mut config = cfg(900, 10);
        config.keyword_overlap_min = 2;
        config.keyword_window_secs = 120;
        let analyzer = RelationshipAnalyzer::new(config);
        let clusters = analyzer.cluster(vec![
            msg("1", "ana", "c", 0, "the sigma bridge deployment failed"),
            msg("2", "bo", "c", 30, "bridge deployment retry worked"),
            msg("3", "cy", "c", 400, "bridge deployment again"),
        ]);
        assert_eq!(ids(&clusters), vec![vec!["1", "2"], vec!["3"]]);
        assert!(clusters[0].keywords.contains(&"bridge".to_string()));
    }

    #[test]
    fn reply_joins_open_cluster_in_another_channel() {
        let analyzer = RelationshipAnalyzer::new(cfg(900, 10));
        let clusters = analyzer.cluster(vec![
            msg("1", "ana", "dev", 0, "release candidate is tagged"),
            msg("2", "bo", "general", 5, "unrelated chatter"),
            msg("3", "cy", "general", 10, "great, testing it").with_reply_to("1"),
            msg("4", "bo", "general", 15, "more chatter"),
        ]);
        assert_eq!(ids(&clusters), vec![vec!["1", "3"], vec!["2", "4"]]);
        assert_eq!(clusters[0].channel_id, "dev");
        assert!(clusters.iter().all(|c| c.forward_refs.is_empty()));
    }

    #[test]
    fn channels_are_clustered_independently() {
        let analyzer = RelationshipAnalyzer::new(cfg(900, 10));
        let clusters = analyzer.cluster(vec![
            msg("1", "ana", "dev", 0, "a"),
            msg("2", "bo", "general", 5, "b"),
            msg("3", "ana", "dev", 10, "c"),
        ]);
        assert_eq!(ids(&clusters), vec![vec!["1", "3"], vec!["2"]]);
    }

    #[test]
    fn empty_input_yields_no_clusters() {
        assert!(RelationshipAnalyzer::new(cfg(900, 10)).cluster(Vec::new()).is_empty());
    }

    #[test]
    fn keywords_skip_short_numeric_and_stopwords() {
        let got = extract_keywords("This node release 2024 fixes the sync bug with peers");
        assert!(got.contains("node"));
        assert!(got.contains("release"));
        assert!(got.contains("peers"));
        assert!(!got.contains("this"));
        assert!(!got.contains("2024"));
        assert!(!got.contains("bug"));
    }
}

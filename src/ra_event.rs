// Relay Event Extraction
//
// Turns one node log line into a typed `RelayEvent`. A line takes part only
// if it carries the relay marker and exactly one direction marker; every
// other line is ignored. The parser is pure: no logging, no counters.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ra_error::{AnalysisError, Result};
use crate::ra_interface::{RelayDirection, RelayEvent, Timestamp};

pub const DEFAULT_RELAY_MARKER: &str = "waku.relay";
pub const PUBLISH_MARKER: &str = "published";
pub const RECEIVE_MARKER: &str = "received";

static TOPICS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\btopics="([^"]+)""#).unwrap());
static PUBSUB_TOPIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bpubsubTopic=(\S+)").unwrap());
static HASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bhash=(\S+)").unwrap());
static PEER_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bpeerId=(\S+)").unwrap());
static PUBLISH_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bpublishTime=(\d+)(?:\s|$)").unwrap());
static RECEIVED_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\breceivedTime=(\d+)(?:\s|$)").unwrap());

/// Parser bound to one relay marker
#[derive(Debug, Clone)]
pub struct RelayLineParser {
    marker: String,
}

impl Default for RelayLineParser {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_MARKER)
    }
}

impl RelayLineParser {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Parse one line
    ///
    /// # Returns
    /// * `Ok(None)` - the line is not a relay publish/receive line
    /// * `Ok(Some(event))` - a well formed relay line
    /// * `Err(MalformedEvent)` - a relay line with a missing or broken field
    pub fn parse(&self, line: &str) -> Result<Option<RelayEvent>> {
        if !line.contains(self.marker.as_str()) {
            return Ok(None);
        }

        let direction = match direction_of(line) {
            DirectionMarker::None => return Ok(None),
            DirectionMarker::Both => return Err(malformed("direction", line)),
            DirectionMarker::One(direction) => direction,
        };

        let topic_set = capture(&TOPICS_RE, line, "topics")?;
        let pubsub_topic = capture(&PUBSUB_TOPIC_RE, line, "pubsubTopic")?;
        let message_hash = capture(&HASH_RE, line, "hash")?;
        let peer_key = capture(&PEER_ID_RE, line, "peerId")?;
        let timestamp = parse_timestamp(direction, line)?;

        Ok(Some(RelayEvent {
            direction,
            timestamp,
            topic_set: topic_set.to_string(),
            pubsub_topic: pubsub_topic.to_string(),
            message_hash: message_hash.to_string(),
            peer_key: peer_key.to_string(),
        }))
    }
}

enum DirectionMarker {
    None,
    One(RelayDirection),
    Both,
}

// direction markers are whole whitespace separated words
fn direction_of(line: &str) -> DirectionMarker {
    let mut published = false;
    let mut received = false;
    for word in line.split_whitespace() {
        match word {
            PUBLISH_MARKER => published = true,
            RECEIVE_MARKER => received = true,
            _ => {}
        }
    }

    match (published, received) {
        (true, true) => DirectionMarker::Both,
        (true, false) => DirectionMarker::One(RelayDirection::Publish),
        (false, true) => DirectionMarker::One(RelayDirection::Receive),
        (false, false) => DirectionMarker::None,
    }
}

fn capture<'a>(re: &Regex, line: &'a str, field: &'static str) -> Result<&'a str> {
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| malformed(field, line))
}

fn parse_timestamp(direction: RelayDirection, line: &str) -> Result<Timestamp> {
    let re = match direction {
        RelayDirection::Publish => &*PUBLISH_TIME_RE,
        RelayDirection::Receive => &*RECEIVED_TIME_RE,
    };
    let field = direction.timestamp_field();
    let digits = capture(re, line, field)?;

    // nanosecond timestamps are unsigned on the wire but must fit the window type
    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| Timestamp::try_from(value).ok())
        .ok_or_else(|| malformed(field, line))
}

fn malformed(field: &'static str, line: &str) -> AnalysisError {
    AnalysisError::MalformedEvent {
        field,
        line: line.trim_end().to_string(),
    }
}

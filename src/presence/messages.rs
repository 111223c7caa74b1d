// Presence wire messages
// Realtime channel payloads (line-delimited JSON, "type" tag) and the
// request/response bodies of the poll-style endpoints.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One peer as listed in a snapshot or `GET /presence/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    pub peer_id: String,
    #[serde(default)]
    pub display_name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    /// Source timestamp of the position, if the sender provided one
    #[serde(default, alias = "ts")]
    pub updated_at_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloMsg {
    pub self_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMsg {
    pub self_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMsg {
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerAction {
    Upsert,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEventMsg {
    pub action: PeerAction,
    pub peer_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default, alias = "updatedAtMs")]
    pub ts: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingMsg {
    pub ts: i64,
}

/// Every payload the realtime channel carries, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelMessage {
    Hello(HelloMsg),
    Update(UpdateMsg),
    Snapshot(SnapshotMsg),
    Peer(PeerEventMsg),
    Ping(PingMsg),
}

/// What we send on the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Hello(HelloMsg),
    Update(UpdateMsg),
    Ping(PingMsg),
}

/// Inbound payload after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A peer announced itself; carries no position.
    Hello { peer_id: String, display_name: String },
    /// A peer's own position update, relayed.
    Update { peer_id: String, lat: f64, lng: f64, heading: Option<f64>, ts: i64 },
    Snapshot(Vec<PeerEntry>),
    PeerUpsert(PeerEntry),
    PeerRemove { peer_id: String },
    Ping { ts: i64 },
}

impl Inbound {
    /// Parse one channel line. Unknown tags and malformed payloads are
    /// logged and dropped, never an error.
    pub fn parse(line: &str) -> Option<Inbound> {
        let msg: ChannelMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                debug!("Ignoring channel message ({}): {}", e, line);
                return None;
            }
        };
        Self::from_message(msg)
    }

    pub fn from_message(msg: ChannelMessage) -> Option<Inbound> {
        match msg {
            ChannelMessage::Hello(h) => Some(Inbound::Hello {
                peer_id: h.self_id,
                display_name: h.display_name,
            }),
            ChannelMessage::Update(u) => Some(Inbound::Update {
                peer_id: u.self_id,
                lat: u.lat,
                lng: u.lng,
                heading: u.heading,
                ts: u.ts,
            }),
            ChannelMessage::Snapshot(s) => Some(Inbound::Snapshot(s.peers)),
            ChannelMessage::Peer(p) => match p.action {
                PeerAction::Remove => Some(Inbound::PeerRemove { peer_id: p.peer_id }),
                PeerAction::Upsert => match (p.lat, p.lng) {
                    (Some(lat), Some(lng)) => Some(Inbound::PeerUpsert(PeerEntry {
                        peer_id: p.peer_id,
                        display_name: p.display_name.unwrap_or_default(),
                        lat,
                        lng,
                        heading: p.heading,
                        updated_at_ms: p.ts,
                    })),
                    _ => {
                        debug!("Ignoring upsert for {} without a position", p.peer_id);
                        None
                    }
                },
            },
            ChannelMessage::Ping(p) => Some(Inbound::Ping { ts: p.ts }),
        }
    }
}

impl Outbound {
    /// One JSON line, without the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// `POST /presence/update`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdateRequest {
    pub peer_id: String,
    pub display_name: String,
    pub lat: f64,
    pub lng: f64,
    pub heading: Option<f64>,
    pub ts: i64,
}

/// `GET /presence/list`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresenceList {
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

/// `POST /presence/signout`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignoutRequest {
    pub peer_id: String,
}

// Presence synchronizer
//
// Owns the peer table and the channel state. Transport-free: the
// coordinator feeds it channel events and inbound payloads, and asks it
// which timers should run and what to push. Once disconnected it ignores
// everything until the next connect().

use tracing::{debug, info, warn};

use crate::constants::{
    DEGRADED_PULL_INTERVAL_MS, DEGRADE_AFTER_FAILURES, PULL_INTERVAL_MS, PUSH_INTERVAL_MS, STALE_MS,
};
use crate::motion::MotionState;

use super::messages::{HelloMsg, Inbound, Outbound, PeerEntry, PresenceUpdateRequest, UpdateMsg};
use super::peers::{PeerRecord, PeerTable};

/// How presence reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PresenceMode {
    /// Realtime channel carries everything
    Push,
    /// Realtime channel for our updates, snapshot endpoint polled for peers
    Snapshot,
    /// Request/response endpoints only
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Degraded(Fallback),
}

/// Where a push goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Realtime,
    Http,
}

/// Timer periods the current state calls for; `None` = stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerPlan {
    pub push_ms: Option<u64>,
    pub pull_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub mode: PresenceMode,
    pub push_interval_ms: u64,
    pub pull_interval_ms: u64,
    pub degraded_pull_interval_ms: u64,
    pub stale_ms: i64,
    pub degrade_after: u32,
    /// A request/response endpoint exists to fall back on
    pub poll_available: bool,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        PresenceSettings {
            mode: PresenceMode::Push,
            push_interval_ms: PUSH_INTERVAL_MS,
            pull_interval_ms: PULL_INTERVAL_MS,
            degraded_pull_interval_ms: DEGRADED_PULL_INTERVAL_MS,
            stale_ms: STALE_MS,
            degrade_after: DEGRADE_AFTER_FAILURES,
            poll_available: false,
        }
    }
}

/// Our own position, ready for either transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfUpdate {
    pub self_id: String,
    pub display_name: String,
    pub lat: f64,
    pub lng: f64,
    pub heading: Option<f64>,
    pub ts: i64,
}

impl SelfUpdate {
    pub fn to_outbound(&self) -> Outbound {
        Outbound::Update(UpdateMsg {
            self_id: self.self_id.clone(),
            lat: self.lat,
            lng: self.lng,
            heading: self.heading,
            ts: self.ts,
        })
    }

    pub fn to_request(&self) -> PresenceUpdateRequest {
        PresenceUpdateRequest {
            peer_id: self.self_id.clone(),
            display_name: self.display_name.clone(),
            lat: self.lat,
            lng: self.lng,
            heading: self.heading,
            ts: self.ts,
        }
    }
}

pub struct PresenceSynchronizer {
    settings: PresenceSettings,
    state: ChannelState,
    active: bool,
    display_name: String,
    table: PeerTable,
    consecutive_failures: u32,
}

impl PresenceSynchronizer {
    pub fn new(settings: PresenceSettings) -> Self {
        PresenceSynchronizer {
            settings,
            state: ChannelState::Disconnected,
            active: false,
            display_name: String::new(),
            table: PeerTable::new(""),
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn mode(&self) -> PresenceMode {
        self.settings.mode
    }

    pub fn self_id(&self) -> &str {
        self.table.self_id()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn peers(&self) -> &PeerTable {
        &self.table
    }

    pub fn sorted_peers(&self) -> Vec<&PeerRecord> {
        self.table.sorted()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether connect() should open a realtime channel.
    pub fn wants_realtime(&self) -> bool {
        self.settings.mode != PresenceMode::Poll
    }

    /// Start a presence session. Poll mode has no channel to wait for and
    /// is connected immediately.
    pub fn connect(&mut self, self_id: &str, display_name: &str) -> ChannelState {
        self.table = PeerTable::new(self_id);
        self.display_name = display_name.to_string();
        self.active = true;
        self.consecutive_failures = 0;
        self.state = if self.wants_realtime() {
            ChannelState::Connecting
        } else {
            ChannelState::Connected
        };
        info!("Presence session {} started ({:?})", self_id, self.settings.mode);
        self.state
    }

    /// First line sent on a freshly opened channel.
    pub fn hello(&self) -> Outbound {
        Outbound::Hello(HelloMsg {
            self_id: self.table.self_id().to_string(),
            display_name: self.display_name.clone(),
        })
    }

    pub fn on_channel_open(&mut self) {
        if !self.active {
            return;
        }
        if self.consecutive_failures > 0 {
            info!("Presence channel recovered after {} failures", self.consecutive_failures);
        }
        self.consecutive_failures = 0;
        self.state = ChannelState::Connected;
    }

    /// Channel failed to open or dropped.
    pub fn on_channel_failed(&mut self, reason: &str) {
        if !self.active {
            return;
        }
        self.consecutive_failures += 1;
        warn!("Presence channel down ({}): {}", self.consecutive_failures, reason);

        self.state = if self.consecutive_failures >= self.settings.degrade_after {
            if self.settings.poll_available {
                ChannelState::Degraded(Fallback::Polling)
            } else {
                ChannelState::Disconnected
            }
        } else {
            match self.state {
                // stay on the fallback while the channel keeps retrying
                ChannelState::Degraded(f) => ChannelState::Degraded(f),
                _ => ChannelState::Disconnected,
            }
        };
    }

    /// No channel and no fallback after repeated failures.
    pub fn is_offline(&self) -> bool {
        self.active
            && self.state == ChannelState::Disconnected
            && self.consecutive_failures >= self.settings.degrade_after
    }

    pub fn timer_plan(&self) -> TimerPlan {
        if !self.active {
            return TimerPlan::default();
        }
        match self.state {
            ChannelState::Connected => TimerPlan {
                push_ms: Some(self.settings.push_interval_ms),
                pull_ms: match self.settings.mode {
                    PresenceMode::Push => None,
                    PresenceMode::Snapshot | PresenceMode::Poll => {
                        Some(self.settings.pull_interval_ms)
                    }
                },
            },
            ChannelState::Degraded(Fallback::Polling) => TimerPlan {
                push_ms: Some(self.settings.push_interval_ms),
                pull_ms: Some(self.settings.degraded_pull_interval_ms),
            },
            ChannelState::Disconnected | ChannelState::Connecting => TimerPlan::default(),
        }
    }

    /// Transport for the next push, if pushing is allowed at all.
    pub fn push_transport(&self) -> Option<Transport> {
        if !self.active {
            return None;
        }
        match (self.state, self.settings.mode) {
            (ChannelState::Connected, PresenceMode::Poll) => Some(Transport::Http),
            (ChannelState::Connected, _) => Some(Transport::Realtime),
            (ChannelState::Degraded(_), _) => Some(Transport::Http),
            _ => None,
        }
    }

    /// Self position for the push timer.
    pub fn build_update(&self, motion: &MotionState, now_ms: i64) -> Option<SelfUpdate> {
        self.push_transport()?;
        Some(SelfUpdate {
            self_id: self.table.self_id().to_string(),
            display_name: self.display_name.clone(),
            lat: motion.lat,
            lng: motion.lng,
            heading: Some(motion.heading_deg),
            ts: now_ms,
        })
    }

    /// Fold one inbound payload into the table. Returns true if peers changed.
    pub fn handle_inbound(&mut self, msg: Inbound, now_ms: i64) -> bool {
        if !self.active {
            debug!("Dropping inbound presence message after disconnect");
            return false;
        }
        match msg {
            Inbound::Snapshot(entries) => self.table.apply_snapshot(entries, now_ms) > 0,
            Inbound::PeerUpsert(entry) => self.table.upsert(entry, now_ms),
            Inbound::Update { peer_id, lat, lng, heading, ts } => {
                // relayed updates carry no name; keep the one we have
                let display_name = self
                    .table
                    .get(&peer_id)
                    .map(|p| p.display_name.clone())
                    .unwrap_or_default();
                self.table.upsert(
                    PeerEntry {
                        peer_id,
                        display_name,
                        lat,
                        lng,
                        heading,
                        updated_at_ms: Some(ts),
                    },
                    now_ms,
                )
            }
            Inbound::PeerRemove { peer_id } => self.table.remove(&peer_id),
            Inbound::Hello { peer_id, display_name } => {
                if peer_id == self.table.self_id() {
                    return false;
                }
                self.table.rename(&peer_id, &display_name, now_ms)
            }
            Inbound::Ping { .. } => false,
        }
    }

    /// Result of a poll of the snapshot endpoint.
    pub fn apply_poll_snapshot(&mut self, entries: Vec<PeerEntry>, now_ms: i64) -> bool {
        self.handle_inbound(Inbound::Snapshot(entries), now_ms)
    }

    /// Staleness sweep. Returns evicted peer ids.
    pub fn sweep(&mut self, now_ms: i64) -> Vec<String> {
        if !self.active {
            return Vec::new();
        }
        let evicted = self.table.sweep(now_ms, self.settings.stale_ms);
        if !evicted.is_empty() {
            debug!("Pruned {} stale peers: {:?}", evicted.len(), evicted);
        }
        evicted
    }

    /// End the session: stop timers, forget every peer. Returns true when a
    /// sign-out should go to the request/response endpoint.
    pub fn disconnect(&mut self) -> bool {
        let was_http = matches!(self.push_transport(), Some(Transport::Http));
        self.active = false;
        self.table.clear();
        self.state = ChannelState::Disconnected;
        self.consecutive_failures = 0;
        info!("Presence session ended");
        was_http
    }
}

// Presence layer
// Remote peers' live positions: wire messages, the peer table, and the
// synchronizer state machine that drives push/pull.

pub mod messages;
pub mod peers;
pub mod sync;

pub use messages::{Inbound, Outbound, PeerEntry};
pub use peers::{PeerRecord, PeerTable};
pub use sync::{
    ChannelState, Fallback, PresenceMode, PresenceSettings, PresenceSynchronizer, SelfUpdate,
    TimerPlan, Transport,
};

// Shared constants for the live engine.
// Durations are milliseconds unless the name says otherwise.

/// Minutes in one recurring week. Monday 00:00 = 0.
pub const MINUTES_PER_WEEK: i32 = 7 * 1440;

/// Width of one schedule bin (minutes). Must match the backend's frame builder.
pub const BIN_MINUTES: i32 = 20;

/// Civil timezone the schedule is expressed in.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

// --- Time cursor ---

/// Live auto-advance tick.
pub const LIVE_TICK_MS: u64 = 20_000;

/// Auto-advance is held off this long after the user touches the time cursor.
pub const LIVE_SUPPRESS_MS: i64 = 15_000;

/// Schedule re-fetch interval.
pub const TIMELINE_REFRESH_MS: u64 = 30 * 60 * 1000;

/// Re-fetch of the displayed frame.
pub const FRAME_REFRESH_MS: u64 = 5 * 60 * 1000;

// --- Motion ---

/// Metres per statute mile.
pub const METERS_PER_MILE: f64 = 1609.344;

/// Minimum displacement before a computed bearing replaces the heading (0.01 mi).
pub const MIN_DISPLACEMENT_M: f64 = 0.01 * METERS_PER_MILE;

/// Speed at or above which a sample counts as moving (2 mph).
pub const MOVING_THRESHOLD_MPS: f64 = 2.0 * METERS_PER_MILE / 3600.0;

/// "Recently moved" window for the visual indicator.
pub const RECENT_MOVE_MS: i64 = 5_000;

/// Period of the recently-moved indicator check.
pub const INDICATOR_CHECK_MS: u64 = 1_200;

// --- Follow ---

/// Zoom a snapping recenter never goes below.
pub const MIN_FOLLOW_ZOOM: f64 = 13.0;

/// Manual pan/zoom pauses following for this long.
pub const EXPLORE_PAUSE_MS: i64 = 20_000;

/// Suppress window opened by toggling follow on.
pub const TOGGLE_SUPPRESS_MS: i64 = 900;

/// Suppress window for the first-fix snap.
pub const FIRST_FIX_SUPPRESS_MS: i64 = 1_200;

/// Suppress window for a snapping recenter.
pub const SNAP_SUPPRESS_MS: i64 = 900;

/// Suppress window for a smooth pan.
pub const PAN_SUPPRESS_MS: i64 = 700;

/// Drift from the last commanded center above which a recenter snaps instead of panning.
pub const DRIFT_TOLERANCE_M: f64 = 250.0;

// --- Presence ---

/// Self position push period.
pub const PUSH_INTERVAL_MS: u64 = 4_000;

/// Snapshot pull period while the realtime channel is up.
pub const PULL_INTERVAL_MS: u64 = 4_000;

/// Snapshot pull period while degraded to polling.
pub const DEGRADED_PULL_INTERVAL_MS: u64 = 10_000;

/// Staleness sweep period.
pub const SWEEP_INTERVAL_MS: u64 = 30_000;

/// Peer records older than this are evicted by the sweep.
pub const STALE_MS: i64 = 120_000;

/// Keepalive ping on the realtime channel.
pub const PING_INTERVAL_SECS: u64 = 15;

/// Close the channel if nothing is read for this long.
pub const CHANNEL_IDLE_TIMEOUT_SECS: u64 = 45;

/// Fixed reconnect interval (fuzzed +-10%).
pub const CHANNEL_RETRY_SECS: f64 = 5.0;

/// Consecutive open failures before presence degrades.
pub const DEGRADE_AFTER_FAILURES: u32 = 3;

/// Capacity of the outbound command queue to the channel task.
pub const CHANNEL_QUEUE: usize = 64;

use chrono_tz::Tz;
use clap::Parser;
use rand::Rng;

use crate::constants::{
    BIN_MINUTES, DEFAULT_TIMEZONE, FRAME_REFRESH_MS, INDICATOR_CHECK_MS, LIVE_SUPPRESS_MS,
    LIVE_TICK_MS, PULL_INTERVAL_MS, PUSH_INTERVAL_MS, STALE_MS, SWEEP_INTERVAL_MS,
    TIMELINE_REFRESH_MS,
};
use crate::error::{EngineError, Result};
use crate::follow::FollowSettings;
use crate::net::ChannelSettings;
use crate::presence::{PresenceMode, PresenceSettings};

/// Live map client engine
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the frame backend (serves /timeline and /frame/{i}).
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Base URL of the request/response presence endpoints (/presence/...).
    #[arg(long, value_name = "URL")]
    pub presence_url: Option<String>,

    /// host:port of the realtime presence relay.
    #[arg(long, value_name = "HOST:PORT")]
    pub realtime_addr: Option<String>,

    /// How presence reaches the backend.
    #[arg(long, value_enum, default_value = "push")]
    pub presence_mode: PresenceMode,

    /// Session id announced to peers. Random when absent.
    #[arg(long)]
    pub session_id: Option<String>,

    /// Name shown to peers. Falls back to the saved preference.
    #[arg(long)]
    pub display_name: Option<String>,

    /// IANA timezone the schedule is expressed in.
    #[arg(long, default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Schedule bin width in minutes.
    #[arg(long, default_value_t = BIN_MINUTES)]
    pub bin_minutes: i32,

    /// Live auto-advance tick in seconds.
    #[arg(long, default_value_t = LIVE_TICK_MS / 1000)]
    pub live_tick_secs: u64,

    /// Self position push period.
    #[arg(long, default_value_t = PUSH_INTERVAL_MS)]
    pub push_interval_ms: u64,

    /// Snapshot pull period.
    #[arg(long, default_value_t = PULL_INTERVAL_MS)]
    pub pull_interval_ms: u64,

    /// Evict peers not seen for this many seconds.
    #[arg(long, default_value_t = STALE_MS / 1000)]
    pub stale_secs: i64,

    /// JSON-lines event feed (location fixes and gestures), "-" for stdin.
    #[arg(long, value_name = "FILE", default_value = "-")]
    pub input: String,

    /// Preferences file.
    #[arg(long, value_name = "FILE")]
    pub prefs: Option<String>,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

/// Everything the engine needs, free of CLI concerns.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub base_url: Option<String>,
    pub presence_url: Option<String>,
    pub realtime_addr: Option<String>,
    /// False when neither a relay nor poll endpoints are configured
    pub presence_enabled: bool,
    pub session_id: String,
    pub display_name: Option<String>,
    pub timezone: Tz,
    pub bin_minutes: i32,
    pub live_tick_ms: u64,
    pub live_suppress_ms: i64,
    pub timeline_refresh_ms: u64,
    pub frame_refresh_ms: u64,
    pub sweep_interval_ms: u64,
    pub indicator_check_ms: u64,
    pub follow: FollowSettings,
    pub presence: PresenceSettings,
    pub channel: ChannelSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            base_url: None,
            presence_url: None,
            realtime_addr: None,
            presence_enabled: true,
            session_id: random_session_id(),
            display_name: None,
            timezone: chrono_tz::America::New_York,
            bin_minutes: BIN_MINUTES,
            live_tick_ms: LIVE_TICK_MS,
            live_suppress_ms: LIVE_SUPPRESS_MS,
            timeline_refresh_ms: TIMELINE_REFRESH_MS,
            frame_refresh_ms: FRAME_REFRESH_MS,
            sweep_interval_ms: SWEEP_INTERVAL_MS,
            indicator_check_ms: INDICATOR_CHECK_MS,
            follow: FollowSettings::default(),
            presence: PresenceSettings::default(),
            channel: ChannelSettings::default(),
        }
    }
}

/// 16 hex digits.
pub fn random_session_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

impl Config {
    pub fn settings(&self) -> Result<EngineSettings> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|e| EngineError::Config(format!("timezone {}: {}", self.timezone, e)))?;

        if self.bin_minutes <= 0 {
            return Err(EngineError::Config(format!(
                "bin minutes must be positive, got {}",
                self.bin_minutes
            )));
        }
        if self.live_tick_secs == 0 || self.push_interval_ms == 0 || self.pull_interval_ms == 0 {
            return Err(EngineError::Config("timer periods must be non-zero".to_string()));
        }

        let poll_available = self.presence_url.is_some();
        let mut mode = self.presence_mode;
        if mode != PresenceMode::Poll && self.realtime_addr.is_none() && poll_available {
            tracing::warn!("No realtime relay configured, using poll-style presence");
            mode = PresenceMode::Poll;
        }
        if mode == PresenceMode::Snapshot && !poll_available {
            tracing::warn!("Snapshot presence needs --presence-url, using push presence");
            mode = PresenceMode::Push;
        }
        let presence_enabled = match mode {
            PresenceMode::Poll => poll_available,
            PresenceMode::Push | PresenceMode::Snapshot => self.realtime_addr.is_some(),
        };

        Ok(EngineSettings {
            base_url: self.base_url.clone(),
            presence_url: self.presence_url.clone(),
            realtime_addr: self.realtime_addr.clone(),
            presence_enabled,
            session_id: self.session_id.clone().unwrap_or_else(random_session_id),
            display_name: self.display_name.clone(),
            timezone,
            bin_minutes: self.bin_minutes,
            live_tick_ms: self.live_tick_secs * 1000,
            presence: PresenceSettings {
                mode,
                push_interval_ms: self.push_interval_ms,
                pull_interval_ms: self.pull_interval_ms,
                stale_ms: self.stale_secs * 1000,
                poll_available,
                ..PresenceSettings::default()
            },
            ..EngineSettings::default()
        })
    }
}

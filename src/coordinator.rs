// Coordinator - the single event loop of the client engine
//
// Owns every component and the map surface. Network work runs in spawned
// tasks that report back through one event channel, so all state is only
// ever touched here. Handlers take the clock as an argument; run() is the
// only place that reads it.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{EngineError, Result};
use crate::follow::{FollowMode, ViewportFollowController};
use crate::input::InputEvent;
use crate::motion::{MotionEstimator, PositionSample};
use crate::net::{ChannelEvent, ChannelHandle, FrameClient, PollClient};
use crate::presence::{
    ChannelState, PeerEntry, PresenceSynchronizer, SelfUpdate, TimerPlan, Transport,
};
use crate::prefs::{PreferenceStore, KEY_DISPLAY_NAME, KEY_FOLLOW_ENABLED};
use crate::surface::MapSurface;
use crate::timeline::{current_target_minute, LiveAdvance, Schedule};

const EVENT_QUEUE: usize = 256;
const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Results of background work, delivered back to the loop.
#[derive(Debug)]
pub enum EngineEvent {
    Channel(ChannelEvent),
    Timeline(Result<Vec<String>>),
    Frame { index: usize, result: Result<serde_json::Value> },
    PollPeers(Result<Vec<PeerEntry>>),
}

pub struct Coordinator<S: MapSurface> {
    settings: EngineSettings,
    surface: S,
    prefs: Box<dyn PreferenceStore>,

    schedule: Option<Schedule>,
    live: LiveAdvance,
    current_frame: Option<usize>,

    motion: MotionEstimator,
    follow: ViewportFollowController,
    presence: PresenceSynchronizer,

    frames: Option<FrameClient>,
    poll: Option<PollClient>,
    channel: Option<ChannelHandle>,

    /// Location and presence are live; cleared by sign-out
    signed_in: bool,
    /// Location source is delivering fixes
    location_ok: bool,

    events_tx: mpsc::Sender<EngineEvent>,
    /// Taken by run()
    events_rx: Option<mpsc::Receiver<EngineEvent>>,
}

impl<S: MapSurface> Coordinator<S> {
    pub fn new(
        settings: EngineSettings,
        surface: S,
        prefs: Box<dyn PreferenceStore>,
    ) -> Result<Self> {
        let frames = settings.base_url.as_deref().map(FrameClient::new).transpose()?;
        let poll = settings.presence_url.as_deref().map(PollClient::new).transpose()?;

        let follow_enabled = prefs.get_bool(KEY_FOLLOW_ENABLED).unwrap_or(true);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        Ok(Coordinator {
            live: LiveAdvance::new(settings.live_suppress_ms),
            follow: ViewportFollowController::new(follow_enabled, settings.follow.clone()),
            presence: PresenceSynchronizer::new(settings.presence.clone()),
            settings,
            surface,
            prefs,
            schedule: None,
            current_frame: None,
            motion: MotionEstimator::new(),
            frames,
            poll,
            channel: None,
            signed_in: false,
            location_ok: false,
            events_tx,
            events_rx: Some(events_rx),
        })
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn presence(&self) -> &PresenceSynchronizer {
        &self.presence
    }

    pub fn follow(&self) -> &ViewportFollowController {
        &self.follow
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn current_frame(&self) -> Option<usize> {
        self.current_frame
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    /// Name announced to peers: explicit setting, then saved preference.
    fn display_name(&self) -> String {
        self.settings
            .display_name
            .clone()
            .or_else(|| self.prefs.get(KEY_DISPLAY_NAME))
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
    }

    /// Kick off the schedule load and the presence session.
    pub fn start(&mut self) {
        self.request_timeline();
        self.publish_follow_status(0);
        self.sign_in();
    }

    pub fn sign_in(&mut self) {
        if self.signed_in {
            return;
        }
        self.signed_in = true;

        let name = self.display_name();
        if self.settings.display_name.is_some() {
            self.prefs.set(KEY_DISPLAY_NAME, &name);
        }

        if !self.settings.presence_enabled {
            info!("Presence disabled: no relay or poll endpoint configured");
            return;
        }

        let session_id = self.settings.session_id.clone();
        let state = self.presence.connect(&session_id, &name);
        if self.presence.wants_realtime() {
            if let Some(addr) = self.settings.realtime_addr.clone() {
                self.channel = Some(spawn_channel(
                    addr,
                    &self.presence,
                    &self.events_tx,
                    self.settings.channel.clone(),
                ));
            }
        }
        self.surface.set_presence_status(state);
    }

    /// Tear down location, follow and presence as one unit. The map and
    /// the time cursor stay usable.
    pub fn sign_out(&mut self) {
        if !self.signed_in {
            return;
        }
        self.signed_in = false;
        self.location_ok = false;

        if let Some(channel) = self.channel.take() {
            channel.shutdown();
        }
        let self_id = self.presence.self_id().to_string();
        if self.presence.disconnect() {
            if let Some(poll) = self.poll.clone() {
                tokio::spawn(async move {
                    if let Err(e) = poll.signout(&self_id).await {
                        warn!("Presence signout failed: {}", e);
                    }
                });
            }
        }

        self.motion.reset();
        self.follow.reset();
        self.surface.render_peers(&[]);
        self.surface.set_presence_status(ChannelState::Disconnected);
        self.surface.set_moving_indicator(false);
        info!("Signed out");
    }

    pub fn handle_input(&mut self, event: InputEvent, now_ms: i64) {
        match event {
            InputEvent::Position(sample) => self.on_position(sample, now_ms),
            InputEvent::LocationError { error } => {
                if !self.signed_in {
                    return;
                }
                let err = error.into_error();
                warn!("Location: {}", err);
                self.location_ok = false;
                self.surface.set_status(&err.to_string());
            }
            InputEvent::ToggleFollow => {
                let mode = self.follow.toggle(now_ms, self.motion.state(), &mut self.surface);
                let enabled = mode != FollowMode::Off;
                self.prefs.set(KEY_FOLLOW_ENABLED, if enabled { "true" } else { "false" });
                self.publish_follow_status(now_ms);
            }
            InputEvent::DragStart | InputEvent::ZoomStart => {
                if self.follow.on_explore_start(now_ms) {
                    self.publish_follow_status(now_ms);
                }
            }
            InputEvent::Scrub { index } => self.on_scrub(index, now_ms),
            InputEvent::Refresh => self.request_timeline(),
            InputEvent::SignOut => self.sign_out(),
        }
    }

    fn on_position(&mut self, sample: PositionSample, now_ms: i64) {
        if !self.signed_in {
            debug!("Location fix after sign-out ignored");
            return;
        }
        self.location_ok = true;

        let state = self.motion.ingest(sample);
        self.surface.set_self_marker(&state);
        self.surface.set_moving_indicator(state.moving);

        let before = self.follow.mode();
        if let Some(action) = self.follow.on_motion(&state, now_ms, &mut self.surface) {
            debug!("Recenter: {:?}", action);
        }
        if self.follow.mode() != before {
            self.publish_follow_status(now_ms);
        }
    }

    fn on_scrub(&mut self, index: usize, now_ms: i64) {
        let known = self.schedule.as_ref().map_or(false, |s| index < s.len());
        if !known {
            warn!("Scrub to unknown frame #{}", index);
            return;
        }
        self.live.suppress(now_ms);
        self.move_cursor(index);
    }

    pub fn handle_event(&mut self, event: EngineEvent, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        match event {
            EngineEvent::Channel(ChannelEvent::Opened) => {
                self.presence.on_channel_open();
                self.publish_presence();
            }
            EngineEvent::Channel(ChannelEvent::Message(msg)) => {
                if self.presence.handle_inbound(msg, now_ms) {
                    self.render_peers();
                }
            }
            EngineEvent::Channel(ChannelEvent::Closed(reason)) => {
                self.presence.on_channel_failed(&reason);
                self.publish_presence();
            }
            EngineEvent::Timeline(Ok(stamps)) => self.on_timeline(&stamps, now),
            EngineEvent::Timeline(Err(e)) => {
                warn!("Timeline fetch failed: {}", e);
                self.surface.set_status(&e.to_string());
            }
            EngineEvent::Frame { index, result } => match result {
                Ok(frame) if self.current_frame == Some(index) => {
                    self.surface.show_frame(index, &frame)
                }
                Ok(_) => debug!("Frame #{} arrived after the cursor moved on", index),
                Err(e) => warn!("Frame #{} fetch failed: {}", index, e),
            },
            EngineEvent::PollPeers(Ok(entries)) => {
                if self.presence.apply_poll_snapshot(entries, now_ms) {
                    self.render_peers();
                }
            }
            EngineEvent::PollPeers(Err(e)) => warn!("Presence poll failed: {}", e),
        }
    }

    /// A fresh schedule replaces the old one wholesale.
    fn on_timeline(&mut self, stamps: &[String], now: DateTime<Utc>) {
        let schedule = match Schedule::from_timestamps(stamps) {
            Ok(s) => s,
            Err(e) => {
                warn!("Rejected timeline: {}", e);
                self.surface.set_status(&e.to_string());
                return;
            }
        };
        let first_load = self.schedule.is_none();
        info!("Schedule loaded: {} frames", schedule.len());
        self.schedule = Some(schedule);

        if first_load {
            self.align_initial(now);
        } else {
            self.on_live_tick(now);
        }
    }

    fn align_initial(&mut self, now: DateTime<Utc>) {
        let target = current_target_minute(now, self.settings.timezone, self.settings.bin_minutes);
        let closest = match self.schedule.as_ref().map(|s| s.closest(target)) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!("Initial alignment failed: {}", e);
                return;
            }
            None => return,
        };
        self.live.seed(closest.index);
        self.move_cursor(closest.index);
    }

    pub fn on_live_tick(&mut self, now: DateTime<Utc>) {
        let target = current_target_minute(now, self.settings.timezone, self.settings.bin_minutes);
        match self.live.tick(self.schedule.as_ref(), target, now.timestamp_millis()) {
            Ok(Some(index)) => {
                debug!("Live advance to #{} (minute {})", index, target);
                self.move_cursor(index);
            }
            Ok(None) => {}
            Err(e) => debug!("Live tick skipped: {}", e),
        }
    }

    fn move_cursor(&mut self, index: usize) {
        self.current_frame = Some(index);
        let label = self.schedule.as_ref().and_then(|s| s.label(index));
        self.surface.set_time_cursor(index, label);
        self.request_frame(index);
    }

    pub fn on_frame_refresh(&mut self) {
        if let Some(index) = self.current_frame {
            self.request_frame(index);
        }
    }

    /// Push our position on whichever transport is current. Returns what
    /// was sent.
    pub fn on_push_tick(&mut self, now_ms: i64) -> Option<SelfUpdate> {
        if !self.signed_in || !self.location_ok {
            return None;
        }
        let update = self.presence.build_update(self.motion.state()?, now_ms)?;

        match self.presence.push_transport()? {
            Transport::Realtime => {
                let channel = self.channel.as_ref()?;
                if !channel.send(update.to_outbound()) {
                    return None;
                }
            }
            Transport::Http => {
                let poll = self.poll.clone()?;
                let req = update.to_request();
                tokio::spawn(async move {
                    if let Err(e) = poll.post_update(&req).await {
                        warn!("Presence push failed: {}", e);
                    }
                });
            }
        }
        Some(update)
    }

    pub fn on_pull_tick(&mut self) {
        if self.presence.timer_plan().pull_ms.is_none() {
            return;
        }
        let Some(poll) = self.poll.clone() else { return };
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = poll.list().await;
            let _ = tx.send(EngineEvent::PollPeers(result)).await;
        });
    }

    pub fn on_sweep_tick(&mut self, now_ms: i64) {
        if !self.presence.sweep(now_ms).is_empty() {
            self.render_peers();
        }
    }

    pub fn on_indicator_tick(&mut self, now_ms: i64) {
        if !self.signed_in {
            return;
        }
        if let Some(moved) = self.motion.refresh_indicator(now_ms) {
            self.surface.set_moving_indicator(moved);
        }
    }

    fn request_timeline(&mut self) {
        let Some(client) = self.frames.clone() else { return };
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = client.timeline().await;
            let _ = tx.send(EngineEvent::Timeline(result)).await;
        });
    }

    fn request_frame(&mut self, index: usize) {
        let Some(client) = self.frames.clone() else { return };
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = client.frame(index).await;
            let _ = tx.send(EngineEvent::Frame { index, result }).await;
        });
    }

    /// Peers are hidden while there is no live presence link.
    fn render_peers(&mut self) {
        let visible = matches!(
            self.presence.state(),
            ChannelState::Connected | ChannelState::Degraded(_)
        );
        if visible {
            let peers = self.presence.sorted_peers();
            self.surface.render_peers(&peers);
        } else {
            self.surface.render_peers(&[]);
        }
    }

    fn publish_presence(&mut self) {
        self.surface.set_presence_status(self.presence.state());
        self.render_peers();
        if self.presence.is_offline() {
            let err = EngineError::ChannelUnavailable("presence offline".to_string());
            self.surface.set_status(&err.to_string());
        }
    }

    fn publish_follow_status(&mut self, now_ms: i64) {
        let enabled = self.follow.enabled();
        let paused = self.follow.is_paused(now_ms);
        self.surface.set_follow_status(enabled, paused);
    }

    /// Drive the engine until `shutdown` resolves. Signs out on the way out.
    pub async fn run<F>(mut self, mut inputs: mpsc::Receiver<InputEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut events = match self.events_rx.take() {
            Some(rx) => rx,
            None => return, // run() already called
        };
        tokio::pin!(shutdown);

        self.start();

        let mut live = interval_ms(self.settings.live_tick_ms, true);
        let mut timeline = interval_ms(self.settings.timeline_refresh_ms, true);
        let mut frame = interval_ms(self.settings.frame_refresh_ms, true);
        let mut sweep = interval_ms(self.settings.sweep_interval_ms, true);
        let mut indicator = interval_ms(self.settings.indicator_check_ms, false);

        let mut plan = TimerPlan::default();
        let mut push: Option<Interval> = None;
        let mut pull: Option<Interval> = None;
        let mut inputs_open = true;

        loop {
            let next = self.presence.timer_plan();
            if next != plan {
                debug!("Presence timers: {:?}", next);
                if next.push_ms != plan.push_ms {
                    push = next.push_ms.map(|ms| interval_ms(ms, false));
                }
                if next.pull_ms != plan.pull_ms {
                    pull = next.pull_ms.map(|ms| interval_ms(ms, false));
                }
                plan = next;
            }

            tokio::select! {
                _ = &mut shutdown => break,
                ev = inputs.recv(), if inputs_open => match ev {
                    Some(ev) => self.handle_input(ev, Utc::now().timestamp_millis()),
                    None => {
                        debug!("Input feed closed");
                        inputs_open = false;
                    }
                },
                ev = events.recv() => match ev {
                    Some(ev) => self.handle_event(ev, Utc::now()),
                    None => break,
                },
                _ = live.tick() => self.on_live_tick(Utc::now()),
                _ = timeline.tick() => self.request_timeline(),
                _ = frame.tick() => self.on_frame_refresh(),
                _ = sweep.tick() => self.on_sweep_tick(Utc::now().timestamp_millis()),
                _ = indicator.tick() => self.on_indicator_tick(Utc::now().timestamp_millis()),
                _ = tick_opt(&mut push) => {
                    self.on_push_tick(Utc::now().timestamp_millis());
                }
                _ = tick_opt(&mut pull) => self.on_pull_tick(),
            }
        }

        self.sign_out();
        info!("Engine stopped");
    }
}

/// Interval with skipped missed ticks. With `delay_first` the first tick
/// comes one period from now rather than immediately.
fn interval_ms(ms: u64, delay_first: bool) -> Interval {
    let period = Duration::from_millis(ms.max(1));
    let mut iv = if delay_first {
        tokio::time::interval_at(Instant::now() + period, period)
    } else {
        tokio::time::interval(period)
    };
    iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
    iv
}

/// Tick an optional interval; a stopped timer never fires.
async fn tick_opt(iv: &mut Option<Interval>) -> Instant {
    match iv {
        Some(iv) => iv.tick().await,
        None => std::future::pending().await,
    }
}

fn spawn_channel(
    addr: String,
    presence: &PresenceSynchronizer,
    events_tx: &mpsc::Sender<EngineEvent>,
    settings: crate::net::ChannelSettings,
) -> ChannelHandle {
    let (ch_tx, mut ch_rx) = mpsc::channel(EVENT_QUEUE);
    let handle = ChannelHandle::spawn(addr, presence.hello(), ch_tx, settings);

    // forward channel events into the engine queue
    let tx = events_tx.clone();
    tokio::spawn(async move {
        while let Some(ev) = ch_rx.recv().await {
            if tx.send(EngineEvent::Channel(ev)).await.is_err() {
                break;
            }
        }
    });
    handle
}

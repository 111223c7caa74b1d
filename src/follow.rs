// Viewport follow controller
//
// Keeps the camera on the live position while letting manual pan/zoom
// take over for a bounded time. Every programmatic camera move opens a
// short suppress window; gesture-start signals inside that window are the
// map echoing our own move and are ignored.
//
//   Off --toggle--> Following --explore--> Paused --(deadline, next fix)--> Following
//    ^                 |                     |
//    +-----toggle------+                     +--toggle--> Following (recenter)

use tracing::debug;

use crate::constants::{
    DRIFT_TOLERANCE_M, EXPLORE_PAUSE_MS, FIRST_FIX_SUPPRESS_MS, MIN_FOLLOW_ZOOM, PAN_SUPPRESS_MS,
    SNAP_SUPPRESS_MS, TOGGLE_SUPPRESS_MS,
};
use crate::geodesy;
use crate::motion::MotionState;
use crate::surface::Camera;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowMode {
    Off,
    Following,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FollowState {
    pub enabled: bool,
    pub paused_until_ms: i64,
    pub self_move_suppress_until_ms: i64,
}

/// Camera call made by a recenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recenter {
    Snapped,
    Panned,
}

#[derive(Debug, Clone)]
pub struct FollowSettings {
    pub min_zoom: f64,
    pub explore_pause_ms: i64,
    pub drift_tolerance_m: f64,
    pub toggle_suppress_ms: i64,
    pub first_fix_suppress_ms: i64,
    pub snap_suppress_ms: i64,
    pub pan_suppress_ms: i64,
}

impl Default for FollowSettings {
    fn default() -> Self {
        FollowSettings {
            min_zoom: MIN_FOLLOW_ZOOM,
            explore_pause_ms: EXPLORE_PAUSE_MS,
            drift_tolerance_m: DRIFT_TOLERANCE_M,
            toggle_suppress_ms: TOGGLE_SUPPRESS_MS,
            first_fix_suppress_ms: FIRST_FIX_SUPPRESS_MS,
            snap_suppress_ms: SNAP_SUPPRESS_MS,
            pan_suppress_ms: PAN_SUPPRESS_MS,
        }
    }
}

#[derive(Debug)]
pub struct ViewportFollowController {
    state: FollowState,
    mode: FollowMode,
    first_fix_done: bool,
    /// Where we last put the camera
    last_center: Option<(f64, f64)>,
    settings: FollowSettings,
}

impl ViewportFollowController {
    pub fn new(enabled: bool, settings: FollowSettings) -> Self {
        ViewportFollowController {
            state: FollowState {
                enabled,
                ..Default::default()
            },
            mode: if enabled { FollowMode::Following } else { FollowMode::Off },
            first_fix_done: false,
            last_center: None,
            settings,
        }
    }

    pub fn mode(&self) -> FollowMode {
        self.mode
    }

    pub fn state(&self) -> &FollowState {
        &self.state
    }

    pub fn enabled(&self) -> bool {
        self.state.enabled
    }

    /// Paused and still inside the pause window.
    pub fn is_paused(&self, now_ms: i64) -> bool {
        self.mode == FollowMode::Paused && now_ms < self.state.paused_until_ms
    }

    fn open_suppress_window(&mut self, now_ms: i64, window_ms: i64) {
        self.state.self_move_suppress_until_ms = now_ms + window_ms;
    }

    /// User pressed the follow button.
    ///
    /// Following -> Off. Off or Paused -> Following with an immediate
    /// recenter when a position is known.
    pub fn toggle(
        &mut self,
        now_ms: i64,
        motion: Option<&MotionState>,
        camera: &mut dyn Camera,
    ) -> FollowMode {
        match self.mode {
            FollowMode::Following => {
                self.state.enabled = false;
                self.state.paused_until_ms = 0;
                self.mode = FollowMode::Off;
            }
            FollowMode::Off | FollowMode::Paused => {
                self.state.enabled = true;
                self.state.paused_until_ms = 0;
                self.mode = FollowMode::Following;
                self.open_suppress_window(now_ms, self.settings.toggle_suppress_ms);
                if let Some(m) = motion {
                    let zoom = camera.zoom().max(self.settings.min_zoom);
                    camera.set_view(m.lat, m.lng, zoom);
                    self.last_center = Some((m.lat, m.lng));
                    self.first_fix_done = true;
                }
            }
        }
        self.mode
    }

    /// Restore the on/off preference without touching the camera.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
        self.state.paused_until_ms = 0;
        self.mode = if enabled { FollowMode::Following } else { FollowMode::Off };
    }

    /// User started a pan or zoom gesture. Returns true if following paused.
    pub fn on_explore_start(&mut self, now_ms: i64) -> bool {
        if self.mode == FollowMode::Off {
            return false;
        }
        if now_ms < self.state.self_move_suppress_until_ms {
            debug!(
                "gesture {} ms inside self-move window, ignored",
                self.state.self_move_suppress_until_ms - now_ms
            );
            return false;
        }
        self.state.paused_until_ms = now_ms + self.settings.explore_pause_ms;
        self.mode = FollowMode::Paused;
        debug!("follow paused until {}", self.state.paused_until_ms);
        true
    }

    /// New motion state. Returns the camera call made, if any.
    pub fn on_motion(
        &mut self,
        motion: &MotionState,
        now_ms: i64,
        camera: &mut dyn Camera,
    ) -> Option<Recenter> {
        match self.mode {
            FollowMode::Off => return None,
            FollowMode::Paused => {
                if now_ms < self.state.paused_until_ms {
                    return None;
                }
                debug!("explore pause over, following again");
                self.state.paused_until_ms = 0;
                self.mode = FollowMode::Following;
            }
            FollowMode::Following => {}
        }
        Some(self.recenter(motion, now_ms, camera))
    }

    fn recenter(&mut self, motion: &MotionState, now_ms: i64, camera: &mut dyn Camera) -> Recenter {
        let zoom = camera.zoom();
        let desired_zoom = zoom.max(self.settings.min_zoom);

        let drifted = match self.last_center {
            Some((lat, lng)) => {
                let drift_m = geodesy::haversine_m(lat, lng, motion.lat, motion.lng);
                drift_m > self.settings.drift_tolerance_m
            }
            None => true,
        };

        let action = if !self.first_fix_done {
            self.first_fix_done = true;
            self.open_suppress_window(now_ms, self.settings.first_fix_suppress_ms);
            camera.set_view(motion.lat, motion.lng, desired_zoom);
            Recenter::Snapped
        } else if zoom < self.settings.min_zoom || drifted {
            self.open_suppress_window(now_ms, self.settings.snap_suppress_ms);
            camera.set_view(motion.lat, motion.lng, desired_zoom);
            Recenter::Snapped
        } else {
            self.open_suppress_window(now_ms, self.settings.pan_suppress_ms);
            camera.pan_to(motion.lat, motion.lng);
            Recenter::Panned
        };
        self.last_center = Some((motion.lat, motion.lng));
        action
    }

    /// Back to the initial state, keeping the on/off choice.
    pub fn reset(&mut self) {
        let enabled = self.state.enabled;
        self.state = FollowState::default();
        self.set_enabled(enabled);
        self.first_fix_done = false;
        self.last_center = None;
    }
}

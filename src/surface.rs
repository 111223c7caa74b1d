// Rendering surface ports
// The engine never draws; it issues camera commands and state updates
// to whatever implements these traits.

use tracing::{debug, info};

use crate::motion::MotionState;
use crate::presence::peers::PeerRecord;
use crate::presence::sync::ChannelState;

/// Camera commands of the map widget.
pub trait Camera {
    /// Jump (animated) to a point at a zoom level.
    fn set_view(&mut self, lat: f64, lng: f64, zoom: f64);
    /// Smoothly pan to a point, keeping the zoom.
    fn pan_to(&mut self, lat: f64, lng: f64);
    fn zoom(&self) -> f64;
}

/// Everything the engine pushes outward to the map.
pub trait MapSurface: Camera + Send {
    /// Move the time cursor to a frame.
    fn set_time_cursor(&mut self, index: usize, label: Option<&str>);
    /// Draw a fetched frame payload.
    fn show_frame(&mut self, index: usize, frame: &serde_json::Value);
    /// Self marker position and rotation.
    fn set_self_marker(&mut self, motion: &MotionState);
    /// Glow/pulse styling of the self marker.
    fn set_moving_indicator(&mut self, moving: bool);
    /// Replace the drawn peer markers.
    fn render_peers(&mut self, peers: &[&PeerRecord]);
    fn set_presence_status(&mut self, state: ChannelState);
    /// Follow button text: off, on, or on (paused).
    fn set_follow_status(&mut self, enabled: bool, paused: bool);
    /// Non-fatal status line (schedule unavailable, location blocked, ...).
    fn set_status(&mut self, message: &str);
}

/// Surface that only logs. Used by the binary in place of a map widget.
pub struct LogSurface {
    zoom: f64,
}

impl LogSurface {
    pub fn new(initial_zoom: f64) -> Self {
        LogSurface { zoom: initial_zoom }
    }
}

impl Camera for LogSurface {
    fn set_view(&mut self, lat: f64, lng: f64, zoom: f64) {
        self.zoom = zoom;
        info!("camera: set_view {:.5},{:.5} z{}", lat, lng, zoom);
    }

    fn pan_to(&mut self, lat: f64, lng: f64) {
        debug!("camera: pan_to {:.5},{:.5}", lat, lng);
    }

    fn zoom(&self) -> f64 {
        self.zoom
    }
}

impl MapSurface for LogSurface {
    fn set_time_cursor(&mut self, index: usize, label: Option<&str>) {
        info!("time cursor -> #{} {}", index, label.unwrap_or(""));
    }

    fn show_frame(&mut self, index: usize, frame: &serde_json::Value) {
        let features = frame
            .pointer("/polygons/features")
            .and_then(|f| f.as_array())
            .map_or(0, |f| f.len());
        info!("frame #{} rendered ({} features)", index, features);
    }

    fn set_self_marker(&mut self, motion: &MotionState) {
        debug!(
            "self marker {:.5},{:.5} heading {:.0}",
            motion.lat, motion.lng, motion.heading_deg
        );
    }

    fn set_moving_indicator(&mut self, moving: bool) {
        debug!("moving indicator: {}", moving);
    }

    fn render_peers(&mut self, peers: &[&PeerRecord]) {
        debug!("{} peers on map", peers.len());
    }

    fn set_presence_status(&mut self, state: ChannelState) {
        info!("presence: {:?}", state);
    }

    fn set_follow_status(&mut self, enabled: bool, paused: bool) {
        let text = match (enabled, paused) {
            (false, _) => "Auto-center: OFF",
            (true, false) => "Auto-center: ON",
            (true, true) => "Auto-center: ON (paused)",
        };
        info!("{}", text);
    }

    fn set_status(&mut self, message: &str) {
        info!("status: {}", message);
    }
}

/// Surface that records every call, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSurface {
    pub zoom: f64,
    pub commands: Vec<CameraCommand>,
    pub cursor: Vec<usize>,
    pub frames_shown: Vec<usize>,
    pub peers: Vec<String>,
    pub presence: Vec<ChannelState>,
    pub moving: Vec<bool>,
    pub follow: Vec<(bool, bool)>,
    pub status: Vec<String>,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CameraCommand {
    SetView { lat: f64, lng: f64, zoom: f64 },
    PanTo { lat: f64, lng: f64 },
}

#[cfg(test)]
impl RecordingSurface {
    pub fn with_zoom(zoom: f64) -> Self {
        RecordingSurface {
            zoom,
            ..Default::default()
        }
    }
}

#[cfg(test)]
impl Camera for RecordingSurface {
    fn set_view(&mut self, lat: f64, lng: f64, zoom: f64) {
        self.zoom = zoom;
        self.commands.push(CameraCommand::SetView { lat, lng, zoom });
    }

    fn pan_to(&mut self, lat: f64, lng: f64) {
        self.commands.push(CameraCommand::PanTo { lat, lng });
    }

    fn zoom(&self) -> f64 {
        self.zoom
    }
}

#[cfg(test)]
impl MapSurface for RecordingSurface {
    fn set_time_cursor(&mut self, index: usize, _label: Option<&str>) {
        self.cursor.push(index);
    }

    fn show_frame(&mut self, index: usize, _frame: &serde_json::Value) {
        self.frames_shown.push(index);
    }

    fn set_self_marker(&mut self, _motion: &MotionState) {}

    fn set_moving_indicator(&mut self, moving: bool) {
        self.moving.push(moving);
    }

    fn render_peers(&mut self, peers: &[&PeerRecord]) {
        let mut ids: Vec<String> = peers.iter().map(|p| p.peer_id.clone()).collect();
        ids.sort();
        self.peers = ids;
    }

    fn set_presence_status(&mut self, state: ChannelState) {
        self.presence.push(state);
    }

    fn set_follow_status(&mut self, enabled: bool, paused: bool) {
        self.follow.push((enabled, paused));
    }

    fn set_status(&mut self, message: &str) {
        self.status.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_surface_tracks_zoom() {
        let mut s = LogSurface::new(11.0);
        assert_eq!(s.zoom(), 11.0);
        s.pan_to(40.7, -74.0);
        assert_eq!(s.zoom(), 11.0);
        s.set_view(40.7, -74.0, 14.0);
        assert_eq!(s.zoom(), 14.0);
    }
}

// Inputs from the platform: location fixes and user gestures.
//
// The binary reads them as JSON lines (from stdin or a file), one event
// per line, tagged by "kind".

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::motion::PositionSample;

/// Why the location source gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationErrorKind {
    Denied,
    Timeout,
    Unavailable,
}

impl LocationErrorKind {
    pub fn into_error(self) -> EngineError {
        match self {
            LocationErrorKind::Denied => EngineError::LocationDenied,
            LocationErrorKind::Timeout => {
                EngineError::LocationUnavailable("timed out".to_string())
            }
            LocationErrorKind::Unavailable => {
                EngineError::LocationUnavailable("no fix".to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEvent {
    Position(PositionSample),
    LocationError { error: LocationErrorKind },
    ToggleFollow,
    /// User started dragging the map
    DragStart,
    /// User started a zoom gesture
    ZoomStart,
    /// User moved the time cursor
    Scrub { index: usize },
    /// App came back to the foreground: catch up on the schedule
    Refresh,
    SignOut,
}

impl InputEvent {
    pub fn parse(line: &str) -> Option<InputEvent> {
        match serde_json::from_str(line) {
            Ok(ev) => Some(ev),
            Err(e) => {
                warn!("Ignoring input line ({}): {}", e, line);
                None
            }
        }
    }
}

/// Read input events line by line until EOF or until the receiver goes away.
pub fn spawn_feed<R>(reader: R, tx: mpsc::Sender<InputEvent>) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some(ev) = InputEvent::parse(line) {
                        debug!("input: {:?}", ev);
                        if tx.send(ev).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => {
                    info!("Input feed ended");
                    return;
                }
                Err(e) => {
                    warn!("Input feed read error: {}", e);
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        let ev = InputEvent::parse(
            r#"{"kind":"position","lat":40.7,"lng":-74.0,"timestampMs":1000,"speedMps":3.5}"#,
        )
        .unwrap();
        match ev {
            InputEvent::Position(s) => {
                assert_eq!(s.timestamp_ms, 1000);
                assert_eq!(s.speed_mps, Some(3.5));
                assert_eq!(s.reported_heading_deg, None);
            }
            other => panic!("Expected Position, got {:?}", other),
        }

        assert_eq!(
            InputEvent::parse(r#"{"kind":"toggle_follow"}"#),
            Some(InputEvent::ToggleFollow)
        );
        assert_eq!(InputEvent::parse(r#"{"kind":"drag_start"}"#), Some(InputEvent::DragStart));
        assert_eq!(
            InputEvent::parse(r#"{"kind":"scrub","index":7}"#),
            Some(InputEvent::Scrub { index: 7 })
        );
        assert_eq!(
            InputEvent::parse(r#"{"kind":"location_error","error":"denied"}"#),
            Some(InputEvent::LocationError { error: LocationErrorKind::Denied })
        );
        assert_eq!(InputEvent::parse(r#"{"kind":"teleport"}"#), None);
    }

    #[test]
    fn test_location_error_mapping() {
        assert!(matches!(LocationErrorKind::Denied.into_error(), EngineError::LocationDenied));
        assert!(matches!(
            LocationErrorKind::Timeout.into_error(),
            EngineError::LocationUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_feed_skips_noise() {
        let data: &'static [u8] =
            b"# comment\n\n{\"kind\":\"refresh\"}\nbogus\n{\"kind\":\"sign_out\"}\n";
        let (tx, mut rx) = mpsc::channel(8);
        let task = spawn_feed(tokio::io::BufReader::new(data), tx);

        assert_eq!(rx.recv().await, Some(InputEvent::Refresh));
        assert_eq!(rx.recv().await, Some(InputEvent::SignOut));
        assert_eq!(rx.recv().await, None);
        task.await.unwrap();
    }
}

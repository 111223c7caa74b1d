// Realtime presence channel
//
// One background task per session: dial, send hello, then pump lines in
// both directions until the link dies, and dial again after a jittered
// pause. Everything it learns goes back to the coordinator as events; the
// task never touches engine state.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{
    CHANNEL_IDLE_TIMEOUT_SECS, CHANNEL_QUEUE, CHANNEL_RETRY_SECS, PING_INTERVAL_SECS,
};
use crate::presence::messages::PingMsg;
use crate::presence::{Inbound, Outbound};

use super::connection::Connection;

/// Random value in [0.9*t, 1.1*t] seconds.
pub fn fuzzy(t: f64) -> Duration {
    let r = rand::thread_rng().gen_range(0.9 * t..=1.1 * t);
    Duration::from_secs_f64(r)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Message(Inbound),
    /// Dial failed or an open link dropped
    Closed(String),
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub retry_secs: f64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            idle_timeout: Duration::from_secs(CHANNEL_IDLE_TIMEOUT_SECS),
            retry_secs: CHANNEL_RETRY_SECS,
        }
    }
}

/// Owner of the channel task. Dropping it stops the task.
pub struct ChannelHandle {
    outbound: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn spawn(
        addr: String,
        hello: Outbound,
        events: mpsc::Sender<ChannelEvent>,
        settings: ChannelSettings,
    ) -> Self {
        let (outbound, out_rx) = mpsc::channel(CHANNEL_QUEUE);
        let task = tokio::spawn(run_channel(addr, hello, out_rx, events, settings));
        ChannelHandle { outbound, task }
    }

    /// Queue a message for the open link. Dropped if the queue is full or
    /// the task has ended.
    pub fn send(&self, msg: Outbound) -> bool {
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!("Presence channel queue rejected message: {}", e);
                false
            }
        }
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_channel(
    addr: String,
    hello: Outbound,
    mut out_rx: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<ChannelEvent>,
    settings: ChannelSettings,
) {
    info!("Starting presence channel to {}", addr);

    loop {
        let reason = match Connection::connect(&addr).await {
            Ok(mut conn) => match conn.write_json(&hello).await {
                Ok(()) => {
                    info!("Presence channel open to {}", conn.peer_addr());
                    // stale commands from before the link came up
                    while out_rx.try_recv().is_ok() {}
                    if events.send(ChannelEvent::Opened).await.is_err() {
                        return;
                    }
                    match pump(&mut conn, &mut out_rx, &events, &settings).await {
                        Some(reason) => reason,
                        None => return,
                    }
                }
                Err(e) => format!("hello to {} failed: {}", addr, e),
            },
            Err(e) => format!("connect to {} failed: {}", addr, e),
        };

        warn!("Presence channel: {}", reason);
        if events.send(ChannelEvent::Closed(reason)).await.is_err() {
            return;
        }

        tokio::time::sleep(fuzzy(settings.retry_secs)).await;
    }
}

/// Runs one open link. Returns why it ended, or `None` when the
/// coordinator has gone away.
async fn pump(
    conn: &mut Connection,
    out_rx: &mut mpsc::Receiver<Outbound>,
    events: &mpsc::Sender<ChannelEvent>,
    settings: &ChannelSettings,
) -> Option<String> {
    let mut ping = tokio::time::interval(settings.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // interval fires immediately; hello already proved liveness
    ping.tick().await;

    // only inbound lines push the deadline out
    let idle = tokio::time::sleep(settings.idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = &mut idle => return Some(format!("idle for {:?}", settings.idle_timeout)),
            read = conn.read_line() => {
                match read {
                    Err(e) => return Some(format!("read error: {}", e)),
                    Ok(None) => return Some("closed by relay".to_string()),
                    Ok(Some(line)) => {
                        idle.as_mut().reset(Instant::now() + settings.idle_timeout);
                        if line.trim().is_empty() {
                            continue;
                        }
                        if let Some(msg) = Inbound::parse(&line) {
                            if events.send(ChannelEvent::Message(msg)).await.is_err() {
                                return None;
                            }
                        }
                    }
                }
            }
            out = out_rx.recv() => {
                let Some(msg) = out else { return None };
                if let Err(e) = conn.write_json(&msg).await {
                    return Some(format!("write error: {}", e));
                }
            }
            _ = ping.tick() => {
                let msg = Outbound::Ping(PingMsg { ts: chrono::Utc::now().timestamp_millis() });
                if let Err(e) = conn.write_json(&msg).await {
                    return Some(format!("ping failed: {}", e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::messages::{HelloMsg, UpdateMsg};
    use tokio::net::TcpListener;

    fn hello() -> Outbound {
        Outbound::Hello(HelloMsg {
            self_id: "me".to_string(),
            display_name: "Me".to_string(),
        })
    }

    #[test]
    fn test_fuzzy_bounds() {
        for _ in 0..100 {
            let d = fuzzy(5.0).as_secs_f64();
            assert!((4.5..=5.5).contains(&d), "{}", d);
        }
    }

    #[tokio::test]
    async fn test_channel_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (ev_tx, mut ev_rx) = mpsc::channel(16);

        let handle = ChannelHandle::spawn(addr, hello(), ev_tx, ChannelSettings::default());

        let (stream, peer) = listener.accept().await.unwrap();
        let mut relay = Connection::new(stream, peer);

        let first = relay.read_line().await.unwrap().unwrap();
        assert!(first.contains("\"type\":\"hello\""));
        assert_eq!(ev_rx.recv().await, Some(ChannelEvent::Opened));

        relay
            .write_line(r#"{"type":"peer","action":"remove","peerId":"p9"}"#)
            .await
            .unwrap();
        relay.write_line(r#"{"type":"gossip"}"#).await.unwrap();
        relay
            .write_line(r#"{"type":"ping","ts":4}"#)
            .await
            .unwrap();
        assert_eq!(
            ev_rx.recv().await,
            Some(ChannelEvent::Message(Inbound::PeerRemove { peer_id: "p9".to_string() }))
        );
        assert_eq!(ev_rx.recv().await, Some(ChannelEvent::Message(Inbound::Ping { ts: 4 })));

        assert!(handle.send(Outbound::Update(UpdateMsg {
            self_id: "me".to_string(),
            lat: 1.0,
            lng: 2.0,
            heading: None,
            ts: 3,
        })));
        let line = relay.read_line().await.unwrap().unwrap();
        assert!(line.contains("\"type\":\"update\""));

        drop(relay);
        match ev_rx.recv().await {
            Some(ChannelEvent::Closed(_)) => {}
            other => panic!("Expected Closed, got {:?}", other),
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_silent_relay_closed_despite_pings() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (ev_tx, mut ev_rx) = mpsc::channel(16);
        let settings = ChannelSettings {
            ping_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_millis(300),
            retry_secs: 5.0,
        };
        let handle = ChannelHandle::spawn(addr, hello(), ev_tx, settings);

        // relay accepts and reads, but never answers
        let (stream, peer) = listener.accept().await.unwrap();
        let mut relay = Connection::new(stream, peer);
        let drain = tokio::spawn(async move {
            while let Ok(Some(_)) = relay.read_line().await {}
        });

        assert_eq!(ev_rx.recv().await, Some(ChannelEvent::Opened));
        let closed = tokio::time::timeout(Duration::from_secs(2), ev_rx.recv()).await;
        match closed {
            Ok(Some(ChannelEvent::Closed(reason))) => {
                assert!(reason.starts_with("idle"), "{}", reason)
            }
            other => panic!("Expected idle close, got {:?}", other),
        }

        handle.shutdown();
        drain.abort();
    }

    #[tokio::test]
    async fn test_inbound_lines_keep_link_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (ev_tx, mut ev_rx) = mpsc::channel(16);
        let settings = ChannelSettings {
            ping_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_millis(300),
            retry_secs: 5.0,
        };
        let handle = ChannelHandle::spawn(addr, hello(), ev_tx, settings);

        let (stream, peer) = listener.accept().await.unwrap();
        let mut relay = Connection::new(stream, peer);
        relay.read_line().await.unwrap();
        assert_eq!(ev_rx.recv().await, Some(ChannelEvent::Opened));

        // 5 x 150 ms of chatter outlasts the idle timeout
        for ts in 0..5 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            relay.write_line(&format!(r#"{{"type":"ping","ts":{}}}"#, ts)).await.unwrap();
            assert_eq!(ev_rx.recv().await, Some(ChannelEvent::Message(Inbound::Ping { ts })));
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_dial_failure_reported() {
        // grab a free port, then close it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (ev_tx, mut ev_rx) = mpsc::channel(4);
        let handle = ChannelHandle::spawn(addr, hello(), ev_tx, ChannelSettings::default());
        match ev_rx.recv().await {
            Some(ChannelEvent::Closed(reason)) => assert!(reason.contains("connect")),
            other => panic!("Expected Closed, got {:?}", other),
        }
        drop(handle);
    }
}

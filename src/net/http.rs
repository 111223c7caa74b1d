// HTTP clients for the frame schedule and the poll-style presence endpoints.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::presence::messages::{PeerEntry, PresenceList, PresenceUpdateRequest, SignoutRequest};

const REQUEST_TIMEOUT_SECS: u64 = 15;

fn build_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("livemap/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// `/timeline` answers either a bare array or `{"timeline": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimelineBody {
    Bare(Vec<String>),
    Wrapped { timeline: Vec<String> },
}

/// Decode a timeline body into its timestamps.
pub fn parse_timeline(body: &str) -> Result<Vec<String>> {
    let parsed: TimelineBody = serde_json::from_str(body)?;
    Ok(match parsed {
        TimelineBody::Bare(v) => v,
        TimelineBody::Wrapped { timeline } => timeline,
    })
}

/// Frame schedule source.
#[derive(Debug, Clone)]
pub struct FrameClient {
    http: Client,
    base_url: String,
}

impl FrameClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(FrameClient {
            http: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ordered frame timestamps. An empty list is `ScheduleUnavailable`.
    pub async fn timeline(&self) -> Result<Vec<String>> {
        let url = format!("{}/timeline", self.base_url);
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ScheduleUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::ScheduleUnavailable(e.to_string()))?
            .text()
            .await?;

        let stamps = parse_timeline(&body)?;
        if stamps.is_empty() {
            return Err(EngineError::ScheduleUnavailable("empty timeline".to_string()));
        }
        debug!("Fetched {} frame timestamps", stamps.len());
        Ok(stamps)
    }

    /// One frame's payload, passed through untouched.
    pub async fn frame(&self, index: usize) -> Result<serde_json::Value> {
        let url = format!("{}/frame/{}", self.base_url, index);
        let value = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(value)
    }
}

/// Request/response presence endpoints.
#[derive(Debug, Clone)]
pub struct PollClient {
    http: Client,
    base_url: String,
}

impl PollClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(PollClient {
            http: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn post_update(&self, req: &PresenceUpdateRequest) -> Result<()> {
        self.http
            .post(format!("{}/presence/update", self.base_url))
            .json(req)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<PeerEntry>> {
        let list: PresenceList = self
            .http
            .get(format!("{}/presence/list", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.peers)
    }

    pub async fn signout(&self, peer_id: &str) -> Result<()> {
        self.http
            .post(format!("{}/presence/signout", self.base_url))
            .json(&SignoutRequest { peer_id: peer_id.to_string() })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the request head.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (url, task)
    }

    #[test]
    fn test_parse_timeline_shapes() {
        let bare = parse_timeline(r#"["2025-01-06T00:00:00","2025-01-06T00:20:00"]"#).unwrap();
        assert_eq!(bare.len(), 2);
        let wrapped = parse_timeline(r#"{"timeline":["2025-01-06T00:00:00"]}"#).unwrap();
        assert_eq!(wrapped, vec!["2025-01-06T00:00:00".to_string()]);
        assert!(matches!(parse_timeline(r#"{"frames":[]}"#), Err(EngineError::Json(_))));
    }

    #[tokio::test]
    async fn test_timeline_fetch() {
        let (url, server) = serve_once(r#"{"timeline":["2025-01-06T00:20:00"]}"#).await;
        let client = FrameClient::new(&format!("{}/", url)).unwrap();
        assert_eq!(client.base_url(), url);

        let stamps = client.timeline().await.unwrap();
        assert_eq!(stamps, vec!["2025-01-06T00:20:00".to_string()]);
        let head = server.await.unwrap();
        assert!(head.starts_with("GET /timeline "));
    }

    #[tokio::test]
    async fn test_empty_timeline_is_unavailable() {
        let (url, _server) = serve_once("[]").await;
        let client = FrameClient::new(&url).unwrap();
        assert!(matches!(
            client.timeline().await,
            Err(EngineError::ScheduleUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_presence_list() {
        let body = r#"{"peers":[
            {"peerId":"a","displayName":"A","lat":1.0,"lng":2.0,"updatedAtMs":5}
        ]}"#;
        let (url, server) = serve_once(body).await;
        let client = PollClient::new(&url).unwrap();
        let peers = client.list().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].updated_at_ms, Some(5));
        assert!(server.await.unwrap().starts_with("GET /presence/list "));
    }
}

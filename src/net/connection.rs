// Realtime channel connection
// Line-delimited JSON over TCP

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;

/// One open connection to the presence relay
pub struct Connection {
    reader: BufReader<tokio::io::ReadHalf<TcpStream>>,
    writer: BufWriter<tokio::io::WriteHalf<TcpStream>>,
    peer_addr: SocketAddr,
    pending: Vec<u8>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);

        Connection {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            peer_addr,
            pending: Vec::new(),
        }
    }

    /// Dial the relay.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        Ok(Connection::new(stream, peer_addr))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one line without its terminator. `None` means the peer closed.
    ///
    /// Cancel safe: bytes of a partial line stay buffered for the next call.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let n = self.reader.read_until(b'\n', &mut self.pending).await?;
        if n == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.pending);
        if line.ends_with(b"\n") {
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Write one line and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_json<T: serde::Serialize>(&mut self, value: &T) -> io::Result<()> {
        let json_str = serde_json::to_string(value)?;
        self.write_line(&json_str).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_line_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream, peer);
            let got = conn.read_line().await.unwrap();
            conn.write_line("pong\r").await.unwrap();
            got
        });

        let mut conn = Connection::connect(&addr).await.unwrap();
        conn.write_json(&serde_json::json!({"type": "ping", "ts": 1})).await.unwrap();
        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("pong"));

        let got = server.await.unwrap();
        assert_eq!(got.as_deref(), Some(r#"{"ts":1,"type":"ping"}"#));

        // server dropped its end
        assert_eq!(conn.read_line().await.unwrap(), None);
    }
}

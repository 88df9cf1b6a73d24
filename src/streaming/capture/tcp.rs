// TCP frame source.
//
// Connects to a networked camera bridge that sends each frame as a 4-byte
// big-endian length followed by the encoded image bytes.

use super::FrameSource;
use crate::error::{Result, RigError};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Upper bound on a single frame; anything larger is a framing error, not
/// a frame.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

pub struct TcpFrameSource {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    is_connected: bool,
}

impl TcpFrameSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            is_connected: false,
        }
    }
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected {
            return Ok(());
        }

        let addr = format!("{}:{}", self.host, self.port);
        tracing::info!(%addr, "connecting to camera bridge");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| RigError::Capture(format!("camera bridge connection failed: {e}")))?;

        self.stream = Some(stream);
        self.is_connected = true;
        Ok(())
    }

    async fn start(&mut self, sender: mpsc::Sender<Vec<u8>>) -> Result<()> {
        if !self.is_connected {
            self.connect().await?;
        }
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| RigError::Capture("camera bridge stream not available".into()))?;

        loop {
            let declared = match stream.read_u32().await {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::info!("camera bridge closed the connection");
                    break;
                }
                Err(e) => {
                    self.is_connected = false;
                    return Err(RigError::Capture(format!("camera bridge read failed: {e}")));
                }
            };
            if declared == 0 || declared > MAX_FRAME_BYTES {
                self.is_connected = false;
                return Err(RigError::Capture(format!(
                    "implausible frame length {declared} from camera bridge"
                )));
            }

            let mut frame = vec![0u8; declared as usize];
            stream
                .read_exact(&mut frame)
                .await
                .map_err(|e| RigError::Capture(format!("camera bridge read failed: {e}")))?;

            if sender.send(frame).await.is_err() {
                tracing::info!("frame receiver closed");
                break;
            }
        }

        self.is_connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reads_length_prefixed_frames_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for frame in [&b"one"[..], &b"three"[..]] {
                socket.write_u32(frame.len() as u32).await.unwrap();
                socket.write_all(frame).await.unwrap();
            }
        });

        let mut source = TcpFrameSource::new(addr.ip().to_string(), addr.port());
        let (tx, mut rx) = mpsc::channel(4);
        source.start(tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"one");
        assert_eq!(rx.recv().await.unwrap(), b"three");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn implausible_lengths_are_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_u32(u32::MAX).await.unwrap();
        });

        let mut source = TcpFrameSource::new(addr.ip().to_string(), addr.port());
        let (tx, _rx) = mpsc::channel(4);
        assert!(source.start(tx).await.is_err());
    }
}

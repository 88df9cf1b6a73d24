// Directory-based frame source.
//
// Replays the image files of a directory in name order at a configurable
// rate. Useful for:
// - benches without a camera attached
// - exercising the full streaming path in tests
// - replaying recorded sessions

use super::FrameSource;
use crate::error::{Result, RigError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct DirectoryFrameSource {
    path: PathBuf,
    rate_limit_ms: Option<u64>,
    loop_playback: bool,
    frames: Vec<PathBuf>,
    is_connected: bool,
}

impl DirectoryFrameSource {
    pub fn new(path: impl Into<PathBuf>, rate_limit_ms: Option<u64>, loop_playback: bool) -> Self {
        Self {
            path: path.into(),
            rate_limit_ms,
            loop_playback,
            frames: Vec::new(),
            is_connected: false,
        }
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected {
            return Ok(());
        }

        let mut frames = Vec::new();
        for entry in std::fs::read_dir(&self.path).map_err(|e| {
            RigError::Capture(format!("cannot read frame directory {}: {e}", self.path.display()))
        })? {
            let path = entry.map_err(RigError::Io)?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame {
                frames.push(path);
            }
        }
        frames.sort();

        if frames.is_empty() {
            return Err(RigError::Capture(format!(
                "no image files in {}",
                self.path.display()
            )));
        }

        tracing::info!(
            frames = frames.len(),
            path = %self.path.display(),
            "directory frame source ready"
        );
        self.frames = frames;
        self.is_connected = true;
        Ok(())
    }

    async fn start(&mut self, sender: mpsc::Sender<Vec<u8>>) -> Result<()> {
        if !self.is_connected {
            self.connect().await?;
        }

        loop {
            for path in &self.frames {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    RigError::Capture(format!("failed to read {}: {e}", path.display()))
                })?;
                if sender.send(bytes).await.is_err() {
                    tracing::info!("frame receiver closed");
                    return Ok(());
                }
                if let Some(ms) = self.rate_limit_ms {
                    sleep(Duration::from_millis(ms)).await;
                }
            }
            if !self.loop_playback {
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
    use tempfile::TempDir;

    #[tokio::test]
    async fn connect_fails_on_an_empty_directory() {
        let dir = TempDir::new().unwrap();
        let mut source = DirectoryFrameSource::new(dir.path(), None, false);
        assert!(source.connect().await.is_err());
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn replays_frames_in_name_order_then_ends() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"second").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = DirectoryFrameSource::new(dir.path(), None, false);
        let (tx, mut rx) = mpsc::channel(8);
        source.start(tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"first");
        assert_eq!(rx.recv().await.unwrap(), b"second");
        assert!(rx.recv().await.is_none());
    }
}

// Pluggable frame sources for the monitoring feed.
//
// The physical capture device sits behind the `FrameSource` trait so the
// server's capture loop is the only place a device is ever acquired; new
// source types are added by implementing the trait, extending
// `CaptureConfig` and registering in the factory.
//
// Current implementations:
// - Directory: replays still frames from disk, for benches without a
//   camera and for tests
// - Tcp: length-prefixed frames from a networked camera bridge

mod directory;
mod tcp;

pub use directory::DirectoryFrameSource;
pub use tcp::TcpFrameSource;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Configuration for the available capture source types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureConfig {
    /// Replay image files from a directory in name order.
    Directory {
        path: String,
        /// Delay between frames in milliseconds.
        #[serde(default)]
        rate_limit_ms: Option<u64>,
        /// Start over at the last frame instead of ending the stream.
        #[serde(default)]
        loop_playback: bool,
    },

    /// Connect to a camera bridge that sends 4-byte length-prefixed frames.
    Tcp { host: String, port: u16 },
}

/// A source of raw (still encoded, unresized) image frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Acquire the underlying device or endpoint.
    async fn connect(&mut self) -> Result<()>;

    /// Stream frames into `sender` until the source ends or errors.
    async fn start(&mut self, sender: mpsc::Sender<Vec<u8>>) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Build a frame source from configuration.
pub fn create_source(config: CaptureConfig) -> Box<dyn FrameSource> {
    match config {
        CaptureConfig::Directory {
            path,
            rate_limit_ms,
            loop_playback,
        } => Box::new(DirectoryFrameSource::new(path, rate_limit_ms, loop_playback)),
        CaptureConfig::Tcp { host, port } => Box::new(TcpFrameSource::new(host, port)),
    }
}

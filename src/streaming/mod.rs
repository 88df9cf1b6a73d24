// Live monitoring feed: wire framing, pluggable capture sources and the
// fan-out TCP server.

pub mod capture;
pub mod frame;
pub mod server;

pub use capture::{CaptureConfig, FrameSource};
pub use frame::StreamFrame;
pub use server::{StreamSettings, StreamingServer, DEFAULT_STREAM_PORT};

// Live monitoring server.
//
// One capture loop owns the frame source for the whole process: it grabs
// raw frames, resizes them to the display width, JPEG-compresses them and
// broadcasts the already-framed wire unit. Each accepted viewer gets a
// worker task holding only a broadcast receiver and its socket, so any
// number of viewers share the single physical capture device and one
// failing viewer never disturbs another.
//
// Workers push units as fast as the capture loop produces them; there is
// no flow control or acknowledgement. A viewer that cannot keep up skips
// the frames it missed. Every 100th unit a worker also appends the current
// trial-count snapshot as its own telemetry unit.

use crate::error::{Result, RigError};
use crate::session::types::SessionHandle;
use crate::streaming::capture::{create_source, CaptureConfig, FrameSource};
use crate::streaming::frame::{self, StreamFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default viewer port.
pub const DEFAULT_STREAM_PORT: u16 = 9999;

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Address the acceptor binds.
    pub bind: SocketAddr,
    /// Display width frames are resized to, aspect preserved.
    pub frame_width: u32,
    /// JPEG quality factor for the viewer feed.
    pub jpeg_quality: u8,
    /// Every Nth unit per connection carries a telemetry unit as well.
    pub telemetry_interval: u64,
    /// Frames a slow viewer may fall behind before it starts skipping.
    pub fanout_capacity: usize,
    /// Deadline on a single socket write before the viewer is dropped.
    pub send_deadline: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_STREAM_PORT)),
            frame_width: 480,
            jpeg_quality: 30,
            telemetry_interval: 100,
            fanout_capacity: 32,
            send_deadline: Duration::from_secs(30),
        }
    }
}

pub struct StreamingServer {
    settings: StreamSettings,
    capture: CaptureConfig,
    session: SessionHandle,
}

impl StreamingServer {
    pub fn new(settings: StreamSettings, capture: CaptureConfig, session: SessionHandle) -> Self {
        Self {
            settings,
            capture,
            session,
        }
    }

    /// Run the capture loop and the acceptor for the life of the process.
    pub async fn serve(self) -> Result<()> {
        let (frame_tx, _) = broadcast::channel(self.settings.fanout_capacity);
        let capture_done = CancellationToken::new();

        {
            let source = create_source(self.capture.clone());
            let frames = frame_tx.clone();
            let done = capture_done.clone();
            let width = self.settings.frame_width;
            let quality = self.settings.jpeg_quality;
            tokio::spawn(async move {
                capture_loop(source, frames, width, quality).await;
                done.cancel();
            });
        }

        let listener = TcpListener::bind(self.settings.bind).await?;
        tracing::info!(addr = %self.settings.bind, "streaming server listening");

        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    tracing::info!(%peer, "viewer connected");
                    tokio::spawn(stream_worker(
                        socket,
                        peer.to_string(),
                        frame_tx.subscribe(),
                        self.session.clone(),
                        self.settings.clone(),
                        capture_done.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("viewer accept failed: {e}");
                }
            }
        }
    }
}

/// Owns the frame source: acquire once, then decode, resize, compress and
/// broadcast every usable frame. A malformed frame is dropped with a
/// warning; a source failure ends the loop and with it every worker.
async fn capture_loop(
    mut source: Box<dyn FrameSource>,
    frames: broadcast::Sender<Arc<Vec<u8>>>,
    width: u32,
    quality: u8,
) {
    if let Err(e) = source.connect().await {
        tracing::error!("capture source unavailable: {e}");
        return;
    }

    let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<u8>>(8);
    let producer = tokio::spawn(async move {
        if let Err(e) = source.start(raw_tx).await {
            tracing::error!("capture source failed: {e}");
        }
    });

    while let Some(raw) = raw_rx.recv().await {
        match encode_display_frame(&raw, width, quality) {
            Ok(jpeg) => match frame::encode_unit(&StreamFrame::Image(jpeg)) {
                Ok(unit) => {
                    // no receivers is not an error, viewers come and go
                    let _ = frames.send(Arc::new(unit));
                }
                Err(e) => tracing::warn!("frame unit encode failed: {e}"),
            },
            Err(e) => tracing::warn!("dropping malformed frame: {e}"),
        }
    }

    if let Err(e) = producer.await {
        tracing::error!("capture producer panicked: {e}");
    }
    tracing::info!("capture stream ended");
}

/// Decode a raw grabbed frame, resize it to the display width preserving
/// aspect ratio, and re-encode as JPEG at the configured quality.
pub fn encode_display_frame(raw: &[u8], width: u32, quality: u8) -> Result<Vec<u8>> {
    if raw.is_empty() {
        return Err(RigError::Capture("empty frame from capture source".into()));
    }
    let img = image::load_from_memory(raw)
        .map_err(|e| RigError::Capture(format!("undecodable frame: {e}")))?;

    let img = if img.width() != width {
        let height =
            ((img.height() as u64 * width as u64) / img.width() as u64).max(1) as u32;
        img.resize_exact(width, height, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    let mut jpeg = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut jpeg);
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| RigError::Capture(format!("JPEG encode failed: {e}")))?;
    Ok(jpeg)
}

fn telemetry_due(iteration: u64, interval: u64) -> bool {
    interval > 0 && iteration % interval == 0
}

/// Per-viewer worker: forward broadcast units, appending a telemetry unit
/// on the configured cadence, one socket write per iteration. Ends on
/// socket error or close, on a blown send deadline, or when the capture
/// loop is gone.
async fn stream_worker<S>(
    mut socket: S,
    peer: String,
    mut frames: broadcast::Receiver<Arc<Vec<u8>>>,
    session: SessionHandle,
    settings: StreamSettings,
    capture_done: CancellationToken,
) where
    S: AsyncWrite + Unpin + Send,
{
    let mut iteration: u64 = 0;

    loop {
        let unit = tokio::select! {
            biased;
            _ = capture_done.cancelled() => {
                tracing::info!(%peer, "capture ended, closing viewer");
                break;
            }
            received = frames.recv() => match received {
                Ok(unit) => unit,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(%peer, skipped, "viewer lagging, frames skipped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        iteration += 1;
        let sent = if telemetry_due(iteration, settings.telemetry_interval) {
            let snapshot = session.snapshot();
            match frame::encode_unit(&StreamFrame::Telemetry {
                trial_count: snapshot.trial_count,
            }) {
                Ok(telemetry) => {
                    let mut batch = Vec::with_capacity(unit.len() + telemetry.len());
                    batch.extend_from_slice(&unit);
                    batch.extend_from_slice(&telemetry);
                    timeout(settings.send_deadline, socket.write_all(&batch)).await
                }
                Err(e) => {
                    tracing::warn!(%peer, "telemetry unit encode failed: {e}");
                    timeout(settings.send_deadline, socket.write_all(&unit)).await
                }
            }
        } else {
            timeout(settings.send_deadline, socket.write_all(&unit)).await
        };

        match sent {
            Err(_) => {
                tracing::info!(%peer, "send deadline exceeded, dropping viewer");
                break;
            }
            Ok(Err(e)) => {
                tracing::info!(%peer, "viewer disconnected: {e}");
                break;
            }
            Ok(Ok(())) => {}
        }
    }

    tracing::debug!(%peer, "viewer worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::frame::decode_unit;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::AsyncReadExt;

    fn tiny_png() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            64,
            48,
            image::Rgb([10, 20, 30]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn display_frames_are_resized_to_the_target_width() {
        let jpeg = encode_display_frame(&tiny_png(), 32, 30).unwrap();
        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(img.width(), 32);
        assert_eq!(img.height(), 24);
    }

    #[test]
    fn empty_and_garbage_frames_are_capture_errors() {
        assert!(matches!(
            encode_display_frame(&[], 480, 30),
            Err(RigError::Capture(_))
        ));
        assert!(matches!(
            encode_display_frame(&[1, 2, 3, 4], 480, 30),
            Err(RigError::Capture(_))
        ));
    }

    #[test]
    fn telemetry_cadence_fires_on_exact_multiples_only() {
        assert!(!telemetry_due(99, 100));
        assert!(telemetry_due(100, 100));
        assert!(!telemetry_due(101, 100));
        assert!(telemetry_due(200, 100));
        assert!(!telemetry_due(100, 0));
    }

    fn image_unit() -> Arc<Vec<u8>> {
        Arc::new(frame::encode_unit(&StreamFrame::Image(vec![0xab; 16])).unwrap())
    }

    async fn read_units<R: AsyncReadExt + Unpin>(reader: &mut R, expected: usize) -> Vec<StreamFrame> {
        let mut buf = Vec::new();
        let mut units = Vec::new();
        let mut chunk = [0u8; 4096];
        while units.len() < expected {
            let n = reader.read(&mut chunk).await.unwrap();
            assert!(n > 0, "stream closed before all units arrived");
            buf.extend_from_slice(&chunk[..n]);
            while let Ok((frame, used)) = decode_unit(&buf) {
                units.push(frame);
                buf.drain(..used);
            }
        }
        units
    }

    #[tokio::test]
    async fn every_100th_iteration_carries_exactly_two_units() {
        let (frame_tx, frame_rx) = broadcast::channel(256);
        let (server_side, mut client_side) = tokio::io::duplex(1 << 20);
        let session = SessionHandle::new();
        session.begin_session();
        for _ in 0..7 {
            session.record_trial();
        }
        let done = CancellationToken::new();

        let worker = tokio::spawn(stream_worker(
            server_side,
            "test-viewer".into(),
            frame_rx,
            session,
            StreamSettings::default(),
            done.clone(),
        ));

        for _ in 0..101 {
            frame_tx.send(image_unit()).unwrap();
        }

        let units = read_units(&mut client_side, 102).await;
        assert_eq!(units.len(), 102);

        let telemetry: Vec<usize> = units
            .iter()
            .enumerate()
            .filter(|(_, u)| matches!(u, StreamFrame::Telemetry { .. }))
            .map(|(i, _)| i)
            .collect();
        // the 100th image (index 99) is followed by exactly one telemetry unit
        assert_eq!(telemetry, vec![100]);
        assert_eq!(units[100], StreamFrame::Telemetry { trial_count: 7 });

        done.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn one_viewer_failing_leaves_the_other_streaming() {
        let (frame_tx, rx1) = broadcast::channel(64);
        let rx2 = frame_tx.subscribe();
        let session = SessionHandle::new();
        let done = CancellationToken::new();

        let (side1, mut client1) = tokio::io::duplex(1 << 16);
        let (side2, client2) = tokio::io::duplex(1 << 16);

        let worker1 = tokio::spawn(stream_worker(
            side1,
            "viewer-1".into(),
            rx1,
            session.clone(),
            StreamSettings::default(),
            done.clone(),
        ));
        let worker2 = tokio::spawn(stream_worker(
            side2,
            "viewer-2".into(),
            rx2,
            session.clone(),
            StreamSettings::default(),
            done.clone(),
        ));

        // kill the second viewer's socket; its worker must die alone
        drop(client2);
        frame_tx.send(image_unit()).unwrap();
        worker2.await.unwrap();

        frame_tx.send(image_unit()).unwrap();
        let units = read_units(&mut client1, 2).await;
        assert_eq!(units.len(), 2);

        done.cancel();
        worker1.await.unwrap();
    }

    struct ScriptedSource {
        connects: Arc<AtomicU32>,
        frames: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn connect(&mut self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn start(&mut self, sender: mpsc::Sender<Vec<u8>>) -> Result<()> {
            for frame in self.frames.clone() {
                if sender.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn capture_device_is_acquired_once_for_any_number_of_viewers() {
        let connects = Arc::new(AtomicU32::new(0));
        let source = Box::new(ScriptedSource {
            connects: connects.clone(),
            frames: vec![tiny_png(), tiny_png(), tiny_png()],
        });

        let (frame_tx, mut rx1) = broadcast::channel(16);
        let mut rx2 = frame_tx.subscribe();

        capture_loop(source, frame_tx.clone(), 32, 30).await;

        for _ in 0..3 {
            assert!(rx1.recv().await.is_ok());
            assert!(rx2.recv().await.is_ok());
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }
}

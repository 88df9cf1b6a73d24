// Serial link to the apparatus.
//
// The board exposes one serial channel used by two logical roles: the
// control side writes parameter and control commands, the ingestor reads
// trial telemetry. To keep those from interleaving, the stream is split
// once at open time; a single writer task owns the write half and performs
// every write in arrival order, and the read half lives in a checkout slot
// that at most one ingestor worker holds at a time.

use crate::error::{Result, RigError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_serial::SerialPortBuilderExt;

/// Buffered reader over the apparatus read half.
pub type DeviceReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

struct WriteRequest {
    bytes: Vec<u8>,
    done: oneshot::Sender<std::io::Result<()>>,
}

/// Handle through which all apparatus writes go.
///
/// Cloneable; every clone feeds the same owning writer task, so writes
/// from any caller are serialized and each caller sees its own result.
#[derive(Clone)]
pub struct DeviceWriter {
    tx: mpsc::Sender<WriteRequest>,
    deadline: Duration,
}

impl DeviceWriter {
    /// Write a command to the apparatus and wait for completion.
    pub async fn send(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let request = WriteRequest {
            bytes: bytes.into(),
            done: done_tx,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| RigError::Connection("device writer task has stopped".into()))?;
        match tokio::time::timeout(self.deadline, done_rx).await {
            Err(_) => Err(RigError::Connection(format!(
                "device write did not complete within {:?}",
                self.deadline
            ))),
            Ok(Err(_)) => Err(RigError::Connection(
                "device writer task dropped the request".into(),
            )),
            Ok(Ok(result)) => result.map_err(RigError::Io),
        }
    }
}

/// Checkout slot for the apparatus read half.
///
/// An ingestor worker takes the reader for the duration of a session and
/// puts it back on shutdown so the next session can reuse it.
#[derive(Clone)]
pub struct ReaderSlot {
    inner: Arc<Mutex<Option<DeviceReader>>>,
}

impl ReaderSlot {
    fn new(reader: DeviceReader) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(reader))),
        }
    }

    pub async fn take(&self) -> Option<DeviceReader> {
        self.inner.lock().await.take()
    }

    pub async fn put_back(&self, reader: DeviceReader) {
        *self.inner.lock().await = Some(reader);
    }
}

/// The opened apparatus connection: a writer handle and the reader slot.
pub struct DeviceLink {
    writer: DeviceWriter,
    reader_slot: ReaderSlot,
}

impl DeviceLink {
    /// Open the serial port the apparatus is attached to.
    ///
    /// Failure here is fatal to the application: without the board there is
    /// no session to run, so callers must surface the error and exit rather
    /// than continue into interactive operation.
    pub fn open(port: &str, baud_rate: u32, write_deadline: Duration) -> Result<DeviceLink> {
        tracing::info!(port, baud_rate, "opening apparatus serial port");
        let stream = tokio_serial::new(port, baud_rate)
            .open_native_async()
            .map_err(|e| {
                RigError::Connection(format!("failed to open serial port {port}: {e}"))
            })?;
        Ok(Self::from_stream(stream, write_deadline))
    }

    /// Build a link over any duplex byte stream.
    ///
    /// Used by `open` with the serial stream and by tests and bench
    /// simulators with in-memory duplex pipes.
    pub fn from_stream<S>(stream: S, write_deadline: Duration) -> DeviceLink
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::channel::<WriteRequest>(32);

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let result = async {
                    write_half.write_all(&request.bytes).await?;
                    write_half.flush().await
                }
                .await;
                if let Err(e) = &result {
                    tracing::error!("apparatus write failed: {e}");
                }
                let _ = request.done.send(result);
            }
        });

        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        DeviceLink {
            writer: DeviceWriter {
                tx,
                deadline: write_deadline,
            },
            reader_slot: ReaderSlot::new(BufReader::new(boxed)),
        }
    }

    pub fn writer(&self) -> DeviceWriter {
        self.writer.clone()
    }

    pub fn reader_slot(&self) -> ReaderSlot {
        self.reader_slot.clone()
    }
}

// Apparatus-facing side of the rig: command encoding, the serial link and
// the telemetry ingestor.

pub mod codec;
pub mod ingest;
pub mod link;

pub use codec::{ControlCommand, DecodedParameters};
pub use ingest::IngestorHandle;
pub use link::{DeviceLink, DeviceReader, DeviceWriter, ReaderSlot};

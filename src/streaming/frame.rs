// Viewer wire protocol.
//
// Every unit on the monitoring socket is a 4-byte big-endian length
// followed by a MessagePack envelope. The envelope carries its own type
// discriminant so a decoder never has to infer a unit's meaning from its
// position in the stream; how often each kind is sent is policy that
// lives in the server.

use crate::error::{Result, RigError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Bytes of length prefix ahead of every payload.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// One unit of the monitoring stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StreamFrame {
    /// A JPEG-compressed video frame.
    Image(Vec<u8>),
    /// Live session telemetry.
    Telemetry { trial_count: u64 },
}

/// Encode one frame as a length-prefixed wire unit.
///
/// The declared length always equals the payload's actual byte length by
/// construction.
pub fn encode_unit(frame: &StreamFrame) -> Result<Vec<u8>> {
    let payload =
        rmp_serde::to_vec_named(frame).map_err(|e| RigError::Framing(e.to_string()))?;
    let mut unit = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    unit.write_u32::<BigEndian>(payload.len() as u32)?;
    unit.extend_from_slice(&payload);
    Ok(unit)
}

/// Decode one unit from the front of `buf`; returns the frame and how many
/// bytes it consumed.
pub fn decode_unit(buf: &[u8]) -> Result<(StreamFrame, usize)> {
    let mut cursor = Cursor::new(buf);
    let declared = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| RigError::Framing("unit shorter than its length prefix".into()))?
        as usize;
    let total = LENGTH_PREFIX_BYTES + declared;
    if buf.len() < total {
        return Err(RigError::Framing(format!(
            "truncated unit: declared {declared} bytes, have {}",
            buf.len() - LENGTH_PREFIX_BYTES
        )));
    }
    let frame = rmp_serde::from_slice(&buf[LENGTH_PREFIX_BYTES..total])
        .map_err(|e| RigError::Framing(e.to_string()))?;
    Ok((frame, total))
}

// Wire framing: each message is a 4-byte big-endian length prefix followed
// by that many bytes of JSON. The prefix lets a reader pull exactly one
// message off a blocking stream without scanning for delimiters, and a hard
// cap on the declared length keeps a hostile prefix from forcing a huge
// allocation. Serialization stays with the caller; this module only moves
// bytes.

use std::io::{self, Read, Write};

/// Hard cap on a single frame's payload, 64 KB. The bulkiest message in the
/// protocol is the `GameJoined` snapshot, which fits in a few hundred bytes;
/// anything approaching this cap is garbage or an attack.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

fn frame_too_big(kind: io::ErrorKind, len: usize) -> io::Error {
    io::Error::new(
        kind,
        format!("frame of {len} bytes exceeds the {MAX_MESSAGE_SIZE}-byte cap"),
    )
}

/// Frame `payload` onto `writer`: length prefix, payload bytes, flush.
///
/// The prefix and payload go out as one buffer so a frame is never split
/// across two writes.
pub fn write_message<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_MESSAGE_SIZE as usize {
        return Err(frame_too_big(io::ErrorKind::InvalidInput, payload.len()));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    #[expect(clippy::cast_possible_truncation)]
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()
}

/// Pull one frame off `reader` and return its payload.
///
/// A stream that closes before a complete frame arrives yields
/// `UnexpectedEof`; a prefix above [`MAX_MESSAGE_SIZE`] yields `InvalidData`
/// without reading the payload.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix);
    if len > MAX_MESSAGE_SIZE {
        return Err(frame_too_big(io::ErrorKind::InvalidData, len as usize));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

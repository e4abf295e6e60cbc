//! Binary wire format.
//!
//! Each side announces its byte order with a 4-byte token and then writes
//! every value in native order. The receiver learns from the token whether
//! to swap.
//!
//! ```text
//! server -> client   token u32 | W u32 | cellW f32 | H u32 | cellH f32 | min f32 | max f32
//!                    then repeatedly: terrain codes u16 x (W-1)(H-1) | water codes u16 x W*H
//! client -> server   token u32
//!                    then repeatedly: tag u16 = 0 | position f32 x 3 | direction f32 x 3
//! ```

use glam::{UVec2, Vec2, Vec3};
use sandlink_terrain::{GridGeometry, HeightfieldSnapshot};

use crate::error::NetError;
use crate::pose::PoseSample;
use crate::quantize::ElevationQuantizer;

/// Byte-order token, written in the sender's native order.
pub const ENDIANNESS_MAGIC: u32 = 0x1234_5678;
/// Length of the byte-order token.
pub const MAGIC_LEN: usize = 4;
/// Length of the geometry payload that follows the server's token.
pub const GEOMETRY_PAYLOAD_LEN: usize = 24;
/// Tag of the only client message.
pub const POSE_TAG: u16 = 0;
/// Length of a tagged pose message.
pub const POSE_MESSAGE_LEN: usize = 2 + 6 * 4;

/// How to read multi-byte values sent by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// The peer shares our byte order.
    Native,
    /// The peer uses the opposite byte order.
    Swapped,
}

impl ByteOrder {
    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        let value = u16::from_ne_bytes(bytes);
        match self {
            ByteOrder::Native => value,
            ByteOrder::Swapped => value.swap_bytes(),
        }
    }

    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        let value = u32::from_ne_bytes(bytes);
        match self {
            ByteOrder::Native => value,
            ByteOrder::Swapped => value.swap_bytes(),
        }
    }

    pub fn read_f32(self, bytes: [u8; 4]) -> f32 {
        f32::from_bits(self.read_u32(bytes))
    }
}

/// Interpret a peer's byte-order token.
pub fn check_magic(bytes: [u8; MAGIC_LEN]) -> Result<ByteOrder, NetError> {
    match u32::from_ne_bytes(bytes) {
        ENDIANNESS_MAGIC => Ok(ByteOrder::Native),
        value if value == ENDIANNESS_MAGIC.swap_bytes() => Ok(ByteOrder::Swapped),
        value => Err(NetError::BadMagic(value)),
    }
}

/// Sequential reader over a byte slice in the peer's byte order.
///
/// Callers check the slice length up front; reads past the end yield zeros.
struct WireReader<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> WireReader<'a> {
    fn new(bytes: &'a [u8], order: ByteOrder) -> Self {
        Self { bytes, order }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let n = N.min(self.bytes.len());
        out[..n].copy_from_slice(&self.bytes[..n]);
        self.bytes = &self.bytes[n..];
        out
    }

    fn u16(&mut self) -> u16 {
        self.order.read_u16(self.take())
    }

    fn u32(&mut self) -> u32 {
        self.order.read_u32(self.take())
    }

    fn f32(&mut self) -> f32 {
        self.order.read_f32(self.take())
    }

    fn vec3(&mut self) -> Vec3 {
        Vec3::new(self.f32(), self.f32(), self.f32())
    }
}

fn put_vec3(out: &mut Vec<u8>, v: Vec3) {
    for c in v.to_array() {
        out.extend_from_slice(&c.to_ne_bytes());
    }
}

/// Append the server's handshake: token, then the geometry payload.
pub fn encode_handshake(geometry: &GridGeometry, out: &mut Vec<u8>) {
    out.extend_from_slice(&ENDIANNESS_MAGIC.to_ne_bytes());
    encode_geometry(geometry, out);
}

/// Append the geometry payload.
pub fn encode_geometry(geometry: &GridGeometry, out: &mut Vec<u8>) {
    let cell = geometry.cell_size();
    out.extend_from_slice(&geometry.width().to_ne_bytes());
    out.extend_from_slice(&cell.x.to_ne_bytes());
    out.extend_from_slice(&geometry.height().to_ne_bytes());
    out.extend_from_slice(&cell.y.to_ne_bytes());
    out.extend_from_slice(&geometry.elevation_min().to_ne_bytes());
    out.extend_from_slice(&geometry.elevation_max().to_ne_bytes());
}

/// Decode and validate the geometry payload.
pub fn decode_geometry(
    bytes: &[u8; GEOMETRY_PAYLOAD_LEN],
    order: ByteOrder,
) -> Result<GridGeometry, NetError> {
    let mut r = WireReader::new(bytes, order);
    let width = r.u32();
    let cell_width = r.f32();
    let height = r.u32();
    let cell_height = r.f32();
    let min = r.f32();
    let max = r.f32();
    Ok(GridGeometry::new(
        UVec2::new(width, height),
        Vec2::new(cell_width, cell_height),
        min,
        max,
    )?)
}

/// A message sent from a viewer to the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientMessage {
    Pose(PoseSample),
}

/// Append a tagged pose message.
pub fn encode_pose(pose: &PoseSample, out: &mut Vec<u8>) {
    out.extend_from_slice(&POSE_TAG.to_ne_bytes());
    put_vec3(out, pose.position);
    put_vec3(out, pose.direction);
}

/// Decode the client message at the start of `buf`.
///
/// Returns the message and the bytes it occupied, or `None` when `buf` holds
/// only part of a message. An unknown tag fails as soon as the tag is readable.
pub fn decode_client_message(
    buf: &[u8],
    order: ByteOrder,
) -> Result<Option<(ClientMessage, usize)>, NetError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let mut r = WireReader::new(buf, order);
    match r.u16() {
        POSE_TAG => {
            if buf.len() < POSE_MESSAGE_LEN {
                return Ok(None);
            }
            let position = r.vec3();
            let direction = r.vec3();
            Ok(Some((
                ClientMessage::Pose(PoseSample::new(position, direction)),
                POSE_MESSAGE_LEN,
            )))
        }
        tag => Err(NetError::UnknownMessage(tag)),
    }
}

/// Byte length of one snapshot message for `geometry`.
pub fn snapshot_message_len(geometry: &GridGeometry) -> usize {
    (geometry.terrain_len() + geometry.water_len()) * 2
}

/// Quantize a snapshot, replacing the contents of `out` with the message bytes.
pub fn encode_snapshot(
    snapshot: &HeightfieldSnapshot,
    quantizer: &ElevationQuantizer,
    out: &mut Vec<u8>,
) {
    out.clear();
    out.reserve((snapshot.terrain.len() + snapshot.water.len()) * 2);
    for elevation in snapshot.terrain.iter().chain(&snapshot.water) {
        out.extend_from_slice(&quantizer.encode(*elevation).to_ne_bytes());
    }
}

/// Dequantize a complete snapshot message into `out`, whose layers must
/// already be sized for the geometry.
pub fn decode_snapshot(
    bytes: &[u8],
    order: ByteOrder,
    quantizer: &ElevationQuantizer,
    out: &mut HeightfieldSnapshot,
) -> Result<(), NetError> {
    let expected = (out.terrain.len() + out.water.len()) * 2;
    if bytes.len() != expected {
        return Err(NetError::SnapshotLength {
            expected,
            actual: bytes.len(),
        });
    }
    let mut codes = bytes
        .chunks_exact(2)
        .map(|pair| order.read_u16([pair[0], pair[1]]));
    for sample in out.terrain.iter_mut().chain(out.water.iter_mut()) {
        // Length was checked above, so the iterator never runs dry.
        *sample = quantizer.decode(codes.next().unwrap_or(0));
    }
    Ok(())
}

//! Message envelope for the lanlink wire protocol
//!
//! Every message is a self-describing byte sequence: the first byte is
//! the message type tag, the remainder is a tag-specific payload.
//! Payload fields use a fixed binary layout:
//!
//! ```text
//! ┌───────────┬──────────────────────────────────────┐
//! │ tag       │ u8                                   │
//! ├───────────┼──────────────────────────────────────┤
//! │ bool      │ u8 (0 = false, anything else = true) │
//! │ u8        │ 1 byte                               │
//! │ u16       │ 2 bytes, little-endian               │
//! │ i32       │ 4 bytes, little-endian               │
//! │ f32       │ 4 bytes, little-endian               │
//! │ string    │ u32 LE byte length + UTF-8 bytes     │
//! │ blob      │ raw bytes, no length (rest of msg)   │
//! └───────────┴──────────────────────────────────────┘
//! ```
//!
//! The tag byte is always interpretable even when the payload is
//! malformed or truncated; payload parsing is tag-specific and fails
//! with [`EnvelopeError::Truncated`] instead of reading past the
//! message boundary.

use crate::error::{EnvelopeError, EnvelopeResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Reserved baseline message tags
///
/// Application-defined tags start at [`USER_TAGS_START`]; the baseline
/// values below bootstrap a connection and are handled by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgTag {
    /// Client → Server: "I want to join" (carries the device label).
    /// Server → Client: reply carrying the assigned identity.
    Connect = 0,
    /// Client → Server: "restore my previous identity" (carries it).
    /// Server → Client: confirmation carrying the restored identity.
    Reconnect = 1,
    /// Either direction: intentional close, do not reconnect.
    Disconnect = 2,
    /// Delivered locally while a large inbound message is still being
    /// assembled; carries (bytes so far, total bytes).
    MsgProgress = 3,
}

impl MsgTag {
    /// The raw tag byte.
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

/// First tag value available for application-defined messages.
pub const USER_TAGS_START: u8 = 4;

/// Custom payload objects that know how to put themselves on the wire
/// and read themselves back.
pub trait Wire: Sized {
    fn write_to(&self, w: &mut MsgWriter);
    fn read_from(r: &mut MsgReader<'_>) -> EnvelopeResult<Self>;
}

/// One encoded message: a tag byte followed by a tag-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMsg {
    bytes: Bytes,
}

impl GameMsg {
    /// Wraps an already-encoded message.
    ///
    /// # Errors
    /// Returns [`EnvelopeError::Empty`] if the buffer has no tag byte.
    pub fn from_bytes(bytes: Bytes) -> EnvelopeResult<Self> {
        if bytes.is_empty() {
            return Err(EnvelopeError::Empty);
        }
        Ok(Self { bytes })
    }

    /// The message type tag. Always readable: construction rejects
    /// empty buffers.
    #[inline]
    pub fn tag(&self) -> u8 {
        self.bytes[0]
    }

    /// A cursor over the payload, positioned just past the tag byte.
    #[inline]
    pub fn reader(&self) -> MsgReader<'_> {
        MsgReader {
            buf: &self.bytes[1..],
        }
    }

    /// The full encoded message, tag byte included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total encoded length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false // a tag byte is always present
    }

    // -- Baseline message constructors --------------------------------

    /// Connect request carrying this device's display name.
    pub fn connect(device_label: &str) -> Self {
        let mut w = MsgWriter::new(MsgTag::Connect.tag());
        w.put_str(device_label);
        w.finish()
    }

    /// Connect reply carrying the server-assigned identity.
    pub fn connect_ack(id: u32) -> Self {
        let mut w = MsgWriter::new(MsgTag::Connect.tag());
        w.put_i32(id as i32);
        w.finish()
    }

    /// Reconnect envelope carrying a previously assigned identity.
    /// Used both for the claim and for the server's confirmation.
    pub fn reconnect(id: u32) -> Self {
        let mut w = MsgWriter::new(MsgTag::Reconnect.tag());
        w.put_i32(id as i32);
        w.finish()
    }

    /// Intentional-close envelope. No payload.
    pub fn disconnect() -> Self {
        MsgWriter::new(MsgTag::Disconnect.tag()).finish()
    }

    /// Partial-read progress notification: (bytes so far, total).
    pub fn progress(bytes_so_far: i32, total: i32) -> Self {
        let mut w = MsgWriter::new(MsgTag::MsgProgress.tag());
        w.put_i32(bytes_so_far);
        w.put_i32(total);
        w.finish()
    }
}

/// Builder for an encoded message. Writes the tag byte first, then
/// each value in call order. Encoding has no error path.
pub struct MsgWriter {
    buf: BytesMut,
}

impl MsgWriter {
    pub fn new(tag: u8) -> Self {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(tag);
        Self { buf }
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    /// u32 LE byte length followed by UTF-8 bytes.
    pub fn put_str(&mut self, s: &str) {
        self.buf.put_u32_le(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
    }

    /// Raw byte blob with no length prefix; the reader side consumes
    /// it with [`MsgReader::read_rest`] or a known count.
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.buf.put_slice(b);
    }

    /// Embeds a pre-encoded message (tag byte included) as a blob,
    /// for recursive composition.
    pub fn put_msg(&mut self, m: &GameMsg) {
        self.buf.put_slice(m.as_bytes());
    }

    pub fn put_wire<T: Wire>(&mut self, v: &T) {
        v.write_to(self);
    }

    pub fn finish(self) -> GameMsg {
        GameMsg {
            bytes: self.buf.freeze(),
        }
    }
}

/// Cursor over a message payload. Every read checks the remaining
/// length and fails with [`EnvelopeError::Truncated`] instead of
/// reading past the end.
pub struct MsgReader<'a> {
    buf: &'a [u8],
}

impl<'a> MsgReader<'a> {
    fn take(&mut self, n: usize) -> EnvelopeResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(EnvelopeError::Truncated {
                need: n,
                have: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_bool(&mut self) -> EnvelopeResult<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_u8(&mut self) -> EnvelopeResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> EnvelopeResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self) -> EnvelopeResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&mut self) -> EnvelopeResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_str(&mut self) -> EnvelopeResult<String> {
        let b = self.take(4)?;
        let len = u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| EnvelopeError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self, n: usize) -> EnvelopeResult<&'a [u8]> {
        self.take(n)
    }

    /// Consumes and returns everything left in the payload.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    pub fn read_wire<T: Wire>(&mut self) -> EnvelopeResult<T> {
        T::read_from(self)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

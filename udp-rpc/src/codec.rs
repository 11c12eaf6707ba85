//! Primitive field encoding shared by envelopes and payloads.
//!
//! Fields are written back to back in a fixed order with no tags; both ends
//! must agree on the sequence.  Supported field kinds:
//!
//! | Kind   | Layout                                  |
//! |--------|-----------------------------------------|
//! | `i32`  | 4 bytes, little-endian                  |
//! | `i64`  | 8 bytes, little-endian                  |
//! | `f64`  | 8 bytes, IEEE-754 bits little-endian    |
//! | text   | `u32` byte length + UTF-8 bytes         |
//!
//! Text longer than [`MAX_TEXT_LEN`] bytes is cut at the last character
//! boundary that fits, so the prefix always matches the bytes that follow.
//! Anything near that size is far past one datagram and is refused when
//! sent anyway.
//!
//! No I/O happens here.

use thiserror::Error;

/// Longest text field the `u32` prefix can describe.
pub const MAX_TEXT_LEN: usize = u32::MAX as usize;

/// Errors raised while reading fields out of a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes remain than the next field needs.
    #[error("truncated field: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    /// The embedded length field disagrees with the datagram length.
    #[error("length field says {declared} bytes but datagram has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    /// A text field is not valid UTF-8.
    #[error("text field is not valid UTF-8")]
    InvalidUtf8,
    /// The status field holds a value outside the known set.
    #[error("unknown status code {0}")]
    UnknownStatus(i32),
}

/// Append-only field writer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Length-prefixed UTF-8 text, cut to [`MAX_TEXT_LEN`] bytes.
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        let text = clamp_text(value, MAX_TEXT_LEN);
        self.put_u32(u32::try_from(text.len()).unwrap_or(u32::MAX));
        self.buf.extend_from_slice(text.as_bytes());
        self
    }

    /// Raw bytes with no prefix (used for nested payloads).
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Overwrite four bytes at `offset` with `value`.
    ///
    /// Used to back-patch a length field once the total size is known.
    pub(crate) fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Longest prefix of `value` within `max` bytes that ends on a char boundary.
fn clamp_text(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Cursor over a received byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn get_str(&mut self) -> Result<String, CodecError> {
        let len = self.get_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// A value with a fixed field layout.
///
/// Implemented by every payload struct that travels inside an envelope.
pub trait Wire: Sized {
    fn write(&self, w: &mut Writer);

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.write(&mut w);
        w.into_bytes()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::read(&mut Reader::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_little_endian() {
        let mut w = Writer::new();
        w.put_i32(0x0102_0304).put_i64(1);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..12], &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn mixed_fields_read_back_in_order() {
        let mut w = Writer::new();
        w.put_i32(-7).put_str("Alice").put_f64(12.5).put_i64(i64::MAX);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_i32().unwrap(), -7);
        assert_eq!(r.get_str().unwrap(), "Alice");
        assert_eq!(r.get_f64().unwrap(), 12.5);
        assert_eq!(r.get_i64().unwrap(), i64::MAX);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn text_is_length_prefixed() {
        let mut w = Writer::new();
        w.put_str("héllo");
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &6u32.to_le_bytes());
        assert_eq!(bytes.len(), 10);
    }

    #[test]
    fn overlong_text_is_cut_on_a_char_boundary() {
        assert_eq!(clamp_text("abc", 8), "abc");
        assert_eq!(clamp_text("abcdef", 4), "abcd");
        // 'é' is two bytes; a cut through it backs off to the boundary.
        assert_eq!(clamp_text("aé", 2), "a");
        assert_eq!(clamp_text("é", 0), "");
    }

    #[test]
    fn empty_text() {
        let mut w = Writer::new();
        w.put_str("");
        let bytes = w.into_bytes();
        assert_eq!(Reader::new(&bytes).get_str().unwrap(), "");
    }

    #[test]
    fn short_int_is_truncated_error() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(
            r.get_i32(),
            Err(CodecError::Truncated {
                needed: 4,
                remaining: 3
            })
        );
    }

    #[test]
    fn text_longer_than_buffer_is_truncated_error() {
        let mut w = Writer::new();
        w.put_u32(50).put_bytes(b"abc");
        let bytes = w.into_bytes();
        assert_eq!(
            Reader::new(&bytes).get_str(),
            Err(CodecError::Truncated {
                needed: 50,
                remaining: 3
            })
        );
    }

    #[test]
    fn invalid_utf8_text() {
        let mut w = Writer::new();
        w.put_u32(2).put_bytes(&[0xff, 0xfe]);
        let bytes = w.into_bytes();
        assert_eq!(Reader::new(&bytes).get_str(), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn rest_consumes_everything() {
        let mut w = Writer::new();
        w.put_i32(1).put_bytes(b"tail");
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        r.get_i32().unwrap();
        assert_eq!(r.rest(), b"tail");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn patch_rewrites_length_slot() {
        let mut w = Writer::new();
        w.put_u32(0).put_i32(9);
        let len = w.len() as u32;
        w.patch_u32(0, len);
        let bytes = w.into_bytes();
        assert_eq!(Reader::new(&bytes).get_u32().unwrap(), 8);
    }
}

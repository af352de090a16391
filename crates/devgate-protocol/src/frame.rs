//! Byte-level layout of a devgate frame.
//!
//! # Wire Format
//!
//! ```text
//! totalLength   u32 BE   counts itself + every field below
//! deviceIdLen   u32 BE
//! deviceId      deviceIdLen bytes, UTF-8
//! messageType   i32 BE
//! payload       totalLength - 12 - deviceIdLen bytes
//! ```
//!
//! A frame for `{deviceId: "dev-1", type: 1, payload: "hello"}`:
//!
//! ```text
//! 00 00 00 16 | 00 00 00 05 | 64 65 76 2d 31 | 00 00 00 01 | 68 65 6c 6c 6f
//!  total=22   |  idLen=5    |  "dev-1"       |  type=1     |  "hello"
//! ```
//!
//! Both length fields are validated as soon as the first eight bytes are
//! buffered, so a malformed header is reported before any payload arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use devgate_core::{Error, Result, constants::*};

use crate::message::Message;

/// Validated lengths from the first eight bytes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    total_length: usize,
    device_id_len: usize,
}

impl FrameHeader {
    /// Inspect the start of `buf` without consuming anything.
    ///
    /// Returns `Ok(None)` while fewer than [`MIN_PEEK_SIZE`] bytes are
    /// available.
    ///
    /// # Errors
    ///
    /// - `InvalidFrameLength` if `totalLength` is negative as a signed 32-bit
    ///   value, shorter than the fixed header, or leaves a negative payload
    /// - `FrameTooLarge` if `totalLength` exceeds `max_frame_size`
    pub fn peek(buf: &[u8], max_frame_size: usize) -> Result<Option<Self>> {
        if buf.len() < MIN_PEEK_SIZE {
            return Ok(None);
        }

        let mut header = &buf[..MIN_PEEK_SIZE];
        let raw_total = header.get_u32();
        let raw_device_id_len = header.get_u32();

        if raw_total > i32::MAX as u32 {
            return Err(Error::invalid_frame_length(format!(
                "total length {} is negative",
                raw_total as i32
            )));
        }

        let total_length = raw_total as usize;
        if total_length < FRAME_HEADER_SIZE {
            return Err(Error::invalid_frame_length(format!(
                "total length {total_length} is shorter than the {FRAME_HEADER_SIZE} byte header"
            )));
        }

        if total_length > max_frame_size {
            return Err(Error::FrameTooLarge {
                size: total_length,
                max_size: max_frame_size,
            });
        }

        let device_id_len = raw_device_id_len as usize;
        if device_id_len > total_length - FRAME_HEADER_SIZE {
            return Err(Error::invalid_frame_length(format!(
                "device ID length {device_id_len} leaves a negative payload in a {total_length} byte frame"
            )));
        }

        Ok(Some(Self {
            total_length,
            device_id_len,
        }))
    }

    /// Full frame size in bytes, including the length field itself.
    pub fn total_length(&self) -> usize {
        self.total_length
    }

    pub fn device_id_len(&self) -> usize {
        self.device_id_len
    }

    pub fn payload_len(&self) -> usize {
        self.total_length - FRAME_HEADER_SIZE - self.device_id_len
    }
}

/// Number of bytes `message` occupies on the wire.
pub fn encoded_len(message: &Message) -> usize {
    FRAME_HEADER_SIZE + message.device_id().len() + message.payload().len()
}

/// Append the wire form of `message` to `dst`.
///
/// Callers are responsible for checking [`encoded_len`] against their size
/// limit first; nothing is written if the length does not fit in the
/// length field.
///
/// # Errors
/// Returns `FrameTooLarge` if the frame cannot be described by a signed
/// 32-bit length.
pub fn write_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    let total_length = encoded_len(message);
    if total_length > i32::MAX as usize {
        return Err(Error::FrameTooLarge {
            size: total_length,
            max_size: i32::MAX as usize,
        });
    }

    let device_id = message.device_id().as_bytes();
    dst.reserve(total_length);
    dst.put_u32(total_length as u32);
    dst.put_u32(device_id.len() as u32);
    dst.put_slice(device_id);
    dst.put_i32(message.message_type());
    dst.put_slice(message.payload());
    Ok(())
}

/// Parse one complete frame.
///
/// `frame` must hold exactly `header.total_length()` bytes.
///
/// # Errors
/// Returns `InvalidUtf8` if the device ID bytes are not UTF-8.
pub fn read_message(mut frame: Bytes, header: &FrameHeader) -> Result<Message> {
    debug_assert_eq!(frame.len(), header.total_length());

    frame.advance(MIN_PEEK_SIZE);
    let device_id = String::from_utf8(frame.split_to(header.device_id_len()).to_vec())?;
    let message_type = frame.get_i32();

    Ok(Message::new(device_id, message_type, frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HELLO_FRAME: &[u8] = &[
        0x00, 0x00, 0x00, 0x16, // total = 22
        0x00, 0x00, 0x00, 0x05, // device id length = 5
        b'd', b'e', b'v', b'-', b'1', // "dev-1"
        0x00, 0x00, 0x00, 0x01, // type = 1
        b'h', b'e', b'l', b'l', b'o', // "hello"
    ];

    #[test]
    fn test_write_message_layout() {
        let mut buf = BytesMut::new();
        write_message(&Message::new("dev-1", 1, &b"hello"[..]), &mut buf).unwrap();
        assert_eq!(&buf[..], HELLO_FRAME);
    }

    #[test]
    fn test_negative_message_type_layout() {
        let mut buf = BytesMut::new();
        write_message(&Message::new("d", -1, Bytes::new()), &mut buf).unwrap();
        assert_eq!(&buf[9..13], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_peek_header() {
        let header = FrameHeader::peek(HELLO_FRAME, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(header.total_length(), 22);
        assert_eq!(header.device_id_len(), 5);
        assert_eq!(header.payload_len(), 5);
    }

    #[test]
    fn test_peek_needs_both_length_fields() {
        for len in 0..MIN_PEEK_SIZE {
            assert!(
                FrameHeader::peek(&HELLO_FRAME[..len], DEFAULT_MAX_FRAME_SIZE)
                    .unwrap()
                    .is_none()
            );
        }
    }

    #[rstest]
    #[case::negative_total(&[0xff, 0xff, 0xff, 0xf0, 0, 0, 0, 0])]
    #[case::shorter_than_header(&[0, 0, 0, 11, 0, 0, 0, 0])]
    #[case::negative_payload(&[0, 0, 0, 12, 0, 0, 0, 1])]
    #[case::huge_device_id(&[0, 0, 0, 20, 0xff, 0xff, 0xff, 0xff])]
    fn test_peek_rejects_malformed_lengths(#[case] header: &[u8]) {
        let result = FrameHeader::peek(header, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(result, Err(Error::InvalidFrameLength { .. })));
    }

    #[test]
    fn test_peek_rejects_oversized_frame() {
        let result = FrameHeader::peek(HELLO_FRAME, 16);
        assert!(matches!(
            result,
            Err(Error::FrameTooLarge {
                size: 22,
                max_size: 16
            })
        ));
    }

    #[test]
    fn test_read_message() {
        let header = FrameHeader::peek(HELLO_FRAME, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        let msg = read_message(Bytes::from_static(HELLO_FRAME), &header).unwrap();
        assert_eq!(msg, Message::new("dev-1", 1, &b"hello"[..]));
    }

    #[test]
    fn test_read_message_invalid_utf8() {
        let frame: &[u8] = &[0, 0, 0, 14, 0, 0, 0, 2, 0xc3, 0x28, 0, 0, 0, 0];
        let header = FrameHeader::peek(frame, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        let result = read_message(Bytes::copy_from_slice(frame), &header);
        assert!(matches!(result, Err(Error::InvalidUtf8(_))));
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(encoded_len(&Message::new("dev-1", 1, &b"hello"[..])), 22);
        assert_eq!(encoded_len(&Message::new("", 0, Bytes::new())), 12);
    }
}

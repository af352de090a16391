//! Tokio codec for devgate message framing.
//!
//! # Overview
//!
//! [`LengthPrefixedCodec`] implements tokio-util's [`Decoder`] and
//! [`Encoder<Message>`] for the length-prefixed layout described in
//! [`crate::frame`]. It plugs straight into `Framed`:
//!
//! ```text
//! TCP Stream -> Decoder -> Message
//! Message -> Encoder -> TCP Stream
//! ```
//!
//! # Stream Reassembly
//!
//! TCP has no message boundaries. The decoder never consumes a partial
//! frame: while a frame is incomplete it returns `Ok(None)` and leaves the
//! buffer untouched, so the next call sees the same bytes plus whatever
//! arrived since. Once the whole frame is buffered exactly `totalLength`
//! bytes are split off.
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use devgate_protocol::{LengthPrefixedCodec, Message};
//! use futures::{SinkExt, StreamExt};
//!
//! # async fn example() -> devgate_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:8081").await?;
//! let mut framed = Framed::new(stream, LengthPrefixedCodec::new());
//!
//! framed.send(Message::new("dev-1", 1, &b"hello"[..])).await?;
//!
//! if let Some(Ok(reply)) = framed.next().await {
//!     println!("Received: {:?}", reply);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Malformed length fields, oversized frames and non UTF-8 device IDs are
//! decode errors, never "incomplete". The codec does not try to
//! resynchronize; the connection owning the stream is expected to close.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::Message;
use crate::frame::{self, FrameHeader};
use devgate_core::{Error, Result, constants::DEFAULT_MAX_FRAME_SIZE};

/// Codec a listener uses to turn bytes into [`Message`]s and back.
///
/// Any tokio-util codec over [`Message`] qualifies. A listener keeps one
/// instance and clones it for every accepted connection, so per-stream
/// state never leaks between connections.
pub trait MessageCodec:
    Decoder<Item = Message, Error = Error>
    + Encoder<Message, Error = Error>
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<T> MessageCodec for T where
    T: Decoder<Item = Message, Error = Error>
        + Encoder<Message, Error = Error>
        + Clone
        + Send
        + Sync
        + 'static
{
}

/// Length-prefixed codec for devgate frames.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::{Decoder, Encoder};
/// use devgate_protocol::{LengthPrefixedCodec, Message};
///
/// let mut codec = LengthPrefixedCodec::new();
/// let mut buffer = BytesMut::new();
///
/// let msg = Message::new("dev-1", 1, &b"hello"[..]);
/// codec.encode(msg.clone(), &mut buffer).unwrap();
/// assert_eq!(buffer.len(), 22);
///
/// assert_eq!(codec.decode(&mut buffer).unwrap(), Some(msg));
/// assert!(buffer.is_empty());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedCodec {
    /// Frames larger than this are rejected on both decode and encode.
    max_frame_size: usize,
}

impl LengthPrefixedCodec {
    /// Create a new codec with the default maximum frame size (1 MiB).
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with a custom maximum frame size.
    ///
    /// The limit is capped at `i32::MAX`, the largest length the wire format
    /// can express.
    ///
    /// # Example
    ///
    /// ```
    /// use devgate_protocol::LengthPrefixedCodec;
    ///
    /// let codec = LengthPrefixedCodec::with_max_frame_size(64 * 1024);
    /// assert_eq!(codec.max_frame_size(), 64 * 1024);
    /// ```
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(i32::MAX as usize),
        }
    }

    /// Get the current maximum frame size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for LengthPrefixedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthPrefixedCodec {
    type Item = Message;
    type Error = Error;

    /// Decode one message from the byte stream.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Message))` - a complete frame was consumed
    /// - `Ok(None)` - need more data; `src` is unchanged
    /// - `Err(Error)` - malformed header, oversized frame or bad UTF-8
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(header) = FrameHeader::peek(&src[..], self.max_frame_size)? else {
            return Ok(None);
        };

        let total_length = header.total_length();
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total_length).freeze();
        frame::read_message(frame, &header).map(Some)
    }
}

impl Encoder<Message> for LengthPrefixedCodec {
    type Error = Error;

    /// Encode a message to the byte stream.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if the encoded frame would exceed
    /// `max_frame_size`. Nothing is written in that case.
    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let size = frame::encoded_len(&item);
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            });
        }

        frame::write_message(&item, dst)
    }
}

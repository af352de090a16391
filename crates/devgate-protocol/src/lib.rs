pub mod codec;
pub mod frame;
pub mod message;

pub use codec::{LengthPrefixedCodec, MessageCodec};
pub use frame::FrameHeader;
pub use message::Message;

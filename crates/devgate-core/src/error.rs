use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Frame errors
    #[error("Invalid frame length: {reason}")]
    InvalidFrameLength { reason: String },

    #[error("Frame too large: {size} bytes exceeds maximum {max_size}")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Device ID is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    // Identity errors
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an [`Error::InvalidFrameLength`] from any message.
    pub fn invalid_frame_length(reason: impl Into<String>) -> Self {
        Self::InvalidFrameLength {
            reason: reason.into(),
        }
    }

    /// Whether this error was caused by the byte stream rather than I/O.
    ///
    /// Frame errors are fatal to the connection that produced them.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrameLength { .. } | Self::FrameTooLarge { .. } | Self::InvalidUtf8(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Fewer bytes than the header needs.
    #[error("frame truncated ({len} bytes, header needs {min})")]
    Truncated { len: usize, min: usize },

    /// The declared length is smaller than the header itself.
    #[error("declared length {declared} is shorter than the {min}-byte header")]
    LengthTooShort { declared: usize, min: usize },

    /// The declared length exceeds the bytes actually supplied.
    #[error("declared length {declared} exceeds the {available} bytes received")]
    LengthExceedsData { declared: usize, available: usize },

    /// The frame exceeds the fixed buffer capacity.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A fixed-size command arrived with the wrong length.
    #[error("command 0x{code:02X} must be {expected} bytes, got {actual}")]
    WrongLength {
        code: u8,
        expected: usize,
        actual: usize,
    },

    /// A device-specific command was given one of the shared command codes.
    #[error("command code 0x{0:02X} is reserved for a shared command")]
    SharedCode(u8),

    /// The response code is outside the defined set.
    #[error("unknown response code 0x{0:02X}")]
    UnknownResponseCode(u8),
}

pub type Result<T> = std::result::Result<T, FrameError>;

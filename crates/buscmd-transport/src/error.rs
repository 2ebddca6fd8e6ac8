use std::path::PathBuf;

/// Errors that can occur in bus transport operations.
///
/// Every variant maps onto the classic two-wire status code returned by
/// `endTransmission`, see [`TransportError::status_code`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transfer does not fit in the bus transmit buffer.
    #[error("transfer too long ({len} bytes, max {max})")]
    DataTooLong { len: usize, max: usize },

    /// No device acknowledged the address.
    #[error("address 0x{0:02X} not acknowledged")]
    AddressNack(u8),

    /// The device stopped acknowledging data bytes.
    #[error("data not acknowledged by 0x{0:02X}")]
    DataNack(u8),

    /// No response bytes arrived within the allowed wait.
    #[error("no response from 0x{address:02X} within {timeout:?}")]
    Timeout {
        address: u8,
        timeout: std::time::Duration,
    },

    /// The address is outside the 7-bit device range.
    #[error("invalid bus address 0x{0:02X}")]
    InvalidAddress(u8),

    /// Failed to bind the bus socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the bus socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The peer sent an envelope this side cannot interpret.
    #[error("malformed bus envelope: {0}")]
    Envelope(String),

    /// An I/O error occurred on the underlying stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bus has been shut down.
    #[error("bus shut down")]
    Shutdown,
}

/// Status code: transfer too long for the transmit buffer.
pub const STATUS_DATA_TOO_LONG: u8 = 1;
/// Status code: address sent, NACK received.
pub const STATUS_ADDRESS_NACK: u8 = 2;
/// Status code: data sent, NACK received.
pub const STATUS_DATA_NACK: u8 = 3;
/// Status code: any other failure, including timeouts.
pub const STATUS_OTHER: u8 = 4;

impl TransportError {
    /// The non-zero bus status code for this failure.
    pub fn status_code(&self) -> u8 {
        match self {
            TransportError::DataTooLong { .. } => STATUS_DATA_TOO_LONG,
            TransportError::AddressNack(_) | TransportError::InvalidAddress(_) => {
                STATUS_ADDRESS_NACK
            }
            TransportError::DataNack(_) => STATUS_DATA_NACK,
            _ => STATUS_OTHER,
        }
    }

    /// Rebuild an error from a status code reported by a remote bus.
    ///
    /// Returns `None` for status `0` (success). Status `4` comes back as
    /// [`TransportError::Timeout`] with the caller's `timeout`, the same
    /// variant a local transfer reports.
    pub fn from_status(
        status: u8,
        address: u8,
        len: usize,
        max: usize,
        timeout: std::time::Duration,
    ) -> Option<Self> {
        match status {
            0 => None,
            STATUS_DATA_TOO_LONG => Some(TransportError::DataTooLong { len, max }),
            STATUS_ADDRESS_NACK => Some(TransportError::AddressNack(address)),
            STATUS_DATA_NACK => Some(TransportError::DataNack(address)),
            STATUS_OTHER => Some(TransportError::Timeout { address, timeout }),
            other => Some(TransportError::Envelope(format!(
                "remote bus reported status {other} for 0x{address:02X}"
            ))),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

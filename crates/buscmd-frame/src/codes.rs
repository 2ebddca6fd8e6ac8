//! Command and response codes.
//!
//! Codes `0x00..=0x06` are the shared command set every device understands
//! or ignores. `0xFE` is a notification. Device-specific commands use any
//! other value.

/// No command.
pub const CMD_NONE: u8 = 0x00;
/// Query the identifier of a device.
pub const CMD_QUERY_ID: u8 = 0x01;
/// Ask whether a deferred response is ready.
pub const CMD_QUERY_RESPONSE: u8 = 0x02;
/// Reset a device. May be broadcast.
pub const CMD_RESET: u8 = 0x03;
/// Inform a device of the master's bus address. May be broadcast.
pub const CMD_MASTER_ADDR: u8 = 0x04;
/// Carry a command line to execute.
pub const CMD_EXECUTE: u8 = 0x05;
/// Ask a device to echo the command data.
pub const CMD_ECHO: u8 = 0x06;

/// Notification: an invalid command was sent.
pub const NOTIFY_CMD_INVALID: u8 = 0xFE;

/// Returns a human-readable name for a command code.
pub fn command_name(code: u8) -> &'static str {
    match code {
        CMD_NONE => "NONE",
        CMD_QUERY_ID => "QUERY_ID",
        CMD_QUERY_RESPONSE => "QUERY_RESPONSE",
        CMD_RESET => "RESET",
        CMD_MASTER_ADDR => "MASTER_ADDR",
        CMD_EXECUTE => "EXECUTE",
        CMD_ECHO => "ECHO",
        NOTIFY_CMD_INVALID => "NOTIFY_CMD_INVALID",
        _ => "DEVICE",
    }
}

/// Returns true for codes in the shared command set.
pub fn is_builtin(code: u8) -> bool {
    code <= CMD_ECHO || code == NOTIFY_CMD_INVALID
}

/// Default answer to "does this command expect a response?".
///
/// Resets, master-address broadcasts and notifications are fire-and-forget.
/// Everything else, including device-specific codes, expects an answer.
pub fn expects_response(code: u8) -> bool {
    !matches!(
        code,
        CMD_NONE | CMD_RESET | CMD_MASTER_ADDR | NOTIFY_CMD_INVALID
    )
}

/// Response codes (one per response frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseCode {
    /// The response carries the requested data.
    Ok = 0x00,
    /// The answer will be available later under the response ID.
    Deferred = 0x01,
    /// Nothing computed yet; ask again.
    NotReady = 0x02,
    /// The device could not take the command because it is busy.
    Busy = 0x03,
    /// Processing failed, or the response ID is unknown.
    Error = 0x04,
    /// The command was not recognized.
    Unknown = 0x05,
}

impl ResponseCode {
    /// Wire name of the code.
    pub fn name(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::Deferred => "DEFERRED",
            ResponseCode::NotReady => "NOT_READY",
            ResponseCode::Busy => "BUSY",
            ResponseCode::Error => "ERROR",
            ResponseCode::Unknown => "UNKNOWN",
        }
    }

    /// Parse a wire value. Returns `None` for codes outside `0x00..=0x05`.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(ResponseCode::Ok),
            0x01 => Some(ResponseCode::Deferred),
            0x02 => Some(ResponseCode::NotReady),
            0x03 => Some(ResponseCode::Busy),
            0x04 => Some(ResponseCode::Error),
            0x05 => Some(ResponseCode::Unknown),
            _ => None,
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(code: ResponseCode) -> Self {
        code as u8
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

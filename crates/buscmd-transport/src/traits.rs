use std::time::Duration;

use crate::error::Result;

/// Largest single transfer the bus moves in one transaction.
///
/// Matches the 32-byte transmit/receive buffers of common two-wire
/// peripherals.
pub const MAX_TRANSFER: usize = 32;

/// Highest valid 7-bit device address.
pub const MAX_ADDRESS: u8 = 0x7F;

/// Master-side bus operations.
///
/// This is the lower-level I/O collaborator the protocol engine calls into.
/// Implementations never retry; retry policy belongs to the caller.
pub trait BusTransport {
    /// Send raw bytes to a device. No response is read.
    fn send(&mut self, address: u8, bytes: &[u8]) -> Result<()>;

    /// Read whatever the device offers into `buf`.
    ///
    /// Returns the number of bytes actually read, which may be less than
    /// `buf.len()` (and may be zero).
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<usize>;

    /// Send `bytes` and read the device's answer, waiting at most `timeout`.
    ///
    /// Zero answer bytes is reported as [`TransportError::Timeout`](crate::TransportError::Timeout).
    fn request(
        &mut self,
        address: u8,
        bytes: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;
}

/// Device-side bus callbacks.
///
/// Both methods run in the time-critical context (the receive/request
/// interrupt on real hardware). Implementations must not block and must do
/// only bounded work.
pub trait BusSlave: Send + Sync {
    /// The master wrote `bytes` to this device.
    fn on_receive(&self, bytes: &[u8]);

    /// The master asked for up to `buf.len()` bytes. Returns the count written.
    fn on_request(&self, buf: &mut [u8]) -> usize;
}

impl<T: BusSlave + ?Sized> BusSlave for std::sync::Arc<T> {
    fn on_receive(&self, bytes: &[u8]) {
        (**self).on_receive(bytes);
    }

    fn on_request(&self, buf: &mut [u8]) -> usize {
        (**self).on_request(buf)
    }
}

/// Returns an error if `address` is not a 7-bit device address.
pub fn check_address(address: u8) -> Result<()> {
    if address > MAX_ADDRESS {
        return Err(crate::error::TransportError::InvalidAddress(address));
    }
    Ok(())
}

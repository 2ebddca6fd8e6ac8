use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::traits::{check_address, BusSlave, BusTransport, MAX_TRANSFER};

/// Limits applied by the in-memory bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBusConfig {
    /// Largest transfer accepted in either direction.
    pub max_transfer: usize,
}

impl Default for SimBusConfig {
    fn default() -> Self {
        Self {
            max_transfer: MAX_TRANSFER,
        }
    }
}

/// An in-memory multi-drop bus.
///
/// Devices are attached by address. Master operations invoke the device's
/// [`BusSlave`] callbacks synchronously on the caller's thread, the same way
/// a hardware receive interrupt preempts whatever the device was doing.
/// Clones share the same set of attached devices.
#[derive(Clone, Default)]
pub struct SimBus {
    inner: Arc<SimBusInner>,
}

#[derive(Default)]
struct SimBusInner {
    devices: RwLock<BTreeMap<u8, Arc<dyn BusSlave>>>,
    config: SimBusConfig,
}

impl SimBus {
    /// Create an empty bus with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bus with explicit limits.
    pub fn with_config(config: SimBusConfig) -> Self {
        Self {
            inner: Arc::new(SimBusInner {
                devices: RwLock::new(BTreeMap::new()),
                config,
            }),
        }
    }

    /// Attach a device at `address`, replacing any device already there.
    pub fn attach(&self, address: u8, device: Arc<dyn BusSlave>) -> Result<()> {
        check_address(address)?;
        let previous = self
            .inner
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, device);
        if previous.is_some() {
            warn!(address, "replaced device already attached at address");
        } else {
            debug!(address, "attached device");
        }
        Ok(())
    }

    /// Detach the device at `address`. Returns true if one was attached.
    pub fn detach(&self, address: u8) -> bool {
        let removed = self
            .inner
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&address)
            .is_some();
        if removed {
            debug!(address, "detached device");
        }
        removed
    }

    /// Addresses of all attached devices, ascending.
    pub fn addresses(&self) -> Vec<u8> {
        self.inner
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Bus limits.
    pub fn config(&self) -> SimBusConfig {
        self.inner.config
    }

    fn device(&self, address: u8) -> Result<Arc<dyn BusSlave>> {
        check_address(address)?;
        self.inner
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
            .ok_or(TransportError::AddressNack(address))
    }

    fn check_len(&self, len: usize) -> Result<()> {
        let max = self.inner.config.max_transfer;
        if len > max {
            return Err(TransportError::DataTooLong { len, max });
        }
        Ok(())
    }
}

impl BusTransport for SimBus {
    fn send(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        self.check_len(bytes.len())?;
        let device = self.device(address)?;
        trace!(address, len = bytes.len(), "bus write");
        device.on_receive(bytes);
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<usize> {
        let device = self.device(address)?;
        let limit = buf.len().min(self.inner.config.max_transfer);
        let read = device.on_request(&mut buf[..limit]).min(limit);
        trace!(address, read, "bus read");
        Ok(read)
    }

    fn request(
        &mut self,
        address: u8,
        bytes: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        self.send(address, bytes)?;
        match self.read(address, response)? {
            0 => Err(TransportError::Timeout { address, timeout }),
            read => Ok(read),
        }
    }
}

impl std::fmt::Debug for SimBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBus")
            .field("devices", &self.addresses())
            .field("config", &self.inner.config)
            .finish()
    }
}

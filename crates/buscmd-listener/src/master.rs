use std::time::{Duration, Instant};

use buscmd_frame::{
    command_frame, command_name, decode_response, Command, CommandText, Response, ResponseCode,
    CMD_EXECUTE, MAX_FRAME_SIZE,
};
use buscmd_transport::BusTransport;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{ListenerError, Result};

/// Requester-side timing and identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// How long [`BusMaster::transact`] keeps re-reading an empty response slot.
    #[serde(with = "millis")]
    pub response_timeout: Duration,
    /// Pause between re-reads.
    #[serde(with = "millis")]
    pub retry_interval: Duration,
    /// This master's own bus address, sent as the requester of `CMD_EXECUTE`.
    pub address: u8,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(100),
            retry_interval: Duration::from_millis(2),
            address: 0x01,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// What the requester must remember to collect a deferred response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredTicket {
    pub address: u8,
    pub response_id: u8,
    pub original_command: u8,
}

/// Outcome of a request that may be deferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The device answered in the same transaction.
    Ready(Response),
    /// The device accepted the work; collect it later with the ticket.
    Deferred(DeferredTicket),
}

/// The master end of the protocol.
///
/// Frames commands, moves them over a [`BusTransport`] and interprets the
/// answers. Transport failures are returned as they are; the only retry
/// here is re-reading while the device reports its response slot empty.
#[derive(Debug)]
pub struct BusMaster<T> {
    transport: T,
    config: MasterConfig,
}

impl<T: BusTransport> BusMaster<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, MasterConfig::default())
    }

    pub fn with_config(transport: T, config: MasterConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send a command that expects no response.
    pub fn send_command(&mut self, address: u8, command: &Command) -> Result<()> {
        let frame = command_frame(command)?;
        debug!(address, command = command.name(), "sending command");
        self.transport.send(address, frame.as_bytes())?;
        Ok(())
    }

    /// Send a command and return the device's answer.
    ///
    /// A device only has an answer after its poll loop has run, so an empty
    /// slot (`NOT_READY` with response ID 0) is re-read every
    /// `retry_interval` until `response_timeout`. If the slot is still empty
    /// then, that `NOT_READY` is returned.
    ///
    /// A device still holding an earlier command rejects the new one with
    /// `BUSY` and response ID 0 without capturing it, so the frame is sent
    /// again on the same schedule. The last `BUSY` is returned if the device
    /// never frees up.
    pub fn transact(&mut self, address: u8, command: &Command) -> Result<Response> {
        let frame = command_frame(command)?;
        let timeout = self.config.response_timeout;
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_FRAME_SIZE];

        debug!(address, command = command.name(), "sending request");
        let mut n = self
            .transport
            .request(address, frame.as_bytes(), &mut buf, timeout)?;
        loop {
            let mut rejected = None;
            if n > 0 {
                let response = decode_response(&buf[..n])?;
                if rejected_busy(&response) {
                    rejected = Some(response);
                } else if !slot_empty(&response) {
                    debug!(
                        address,
                        code = %response.code,
                        response_id = response.response_id,
                        "response received"
                    );
                    return Ok(response);
                }
            }
            if Instant::now() >= deadline {
                debug!(address, command = command.name(), "no response before timeout");
                return Ok(rejected.unwrap_or_else(Response::not_ready));
            }
            std::thread::sleep(self.config.retry_interval);
            n = if rejected.is_some() {
                trace!(address, command = command.name(), "device busy, re-sending");
                self.transport
                    .request(address, frame.as_bytes(), &mut buf, timeout)?
            } else {
                trace!(address, "re-reading response");
                self.transport.read(address, &mut buf)?
            };
        }
    }

    /// Ask a device for its identifier.
    pub fn query_id(&mut self, address: u8) -> Result<u8> {
        let response = self.transact(address, &Command::QueryId)?;
        response
            .device_id()
            .ok_or(ListenerError::UnexpectedResponse {
                command: command_name(buscmd_frame::CMD_QUERY_ID),
                code: response.code,
            })
    }

    /// Have a device echo `text` (truncated to the field capacity).
    pub fn echo(&mut self, address: u8, text: &str) -> Result<CommandText> {
        let response = self.transact(address, &Command::echo(text))?;
        response
            .echo_text()
            .ok_or(ListenerError::UnexpectedResponse {
                command: command_name(buscmd_frame::CMD_ECHO),
                code: response.code,
            })
    }

    /// Send a command line for execution.
    pub fn execute(&mut self, address: u8, command_line: &str) -> Result<Reply> {
        let command = Command::execute(self.config.address, command_line);
        let response = self.transact(address, &command)?;
        Ok(self.reply(address, CMD_EXECUTE, response))
    }

    /// Send any command and classify the answer.
    pub fn request(&mut self, address: u8, command: &Command) -> Result<Reply> {
        let response = self.transact(address, command)?;
        Ok(self.reply(address, command.code(), response))
    }

    /// Reset a device. No response is read.
    pub fn reset(&mut self, address: u8) -> Result<()> {
        self.send_command(address, &Command::Reset)
    }

    /// Tell a device this master's address. No response is read.
    pub fn announce(&mut self, address: u8) -> Result<()> {
        let command = Command::MasterAddress {
            address: self.config.address,
        };
        self.send_command(address, &command)
    }

    /// Ask once whether a deferred response is ready.
    ///
    /// `None` means the device is still working. Any other answer, including
    /// `ERROR` for an ID the device no longer knows, is returned as is.
    pub fn query_response(&mut self, ticket: &DeferredTicket) -> Result<Option<Response>> {
        let command = Command::query_response(ticket.response_id, ticket.original_command);
        let response = self.transact(ticket.address, &command)?;
        if response.code == ResponseCode::NotReady {
            trace!(response_id = ticket.response_id, "deferred response pending");
            return Ok(None);
        }
        Ok(Some(response))
    }

    /// Re-query a deferred response every `retry_interval` until it is ready
    /// or `timeout` passes.
    pub fn wait_deferred(&mut self, ticket: &DeferredTicket, timeout: Duration) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = self.query_response(ticket)? {
                return Ok(response);
            }
            if Instant::now() >= deadline {
                return Err(ListenerError::DeferredTimeout {
                    address: ticket.address,
                    response_id: ticket.response_id,
                    timeout,
                });
            }
            std::thread::sleep(self.config.retry_interval);
        }
    }

    fn reply(&self, address: u8, original_command: u8, response: Response) -> Reply {
        if response.code == ResponseCode::Deferred {
            Reply::Deferred(DeferredTicket {
                address,
                response_id: response.response_id,
                original_command,
            })
        } else {
            Reply::Ready(response)
        }
    }
}

/// The device's "nothing posted yet" answer, as opposed to a deferred
/// lookup that is still pending (which carries its response ID).
fn slot_empty(response: &Response) -> bool {
    response.code == ResponseCode::NotReady && response.response_id == 0
}

/// The receive path's contention answer: the command was never captured.
fn rejected_busy(response: &Response) -> bool {
    response.code == ResponseCode::Busy && response.response_id == 0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use buscmd_frame::CMD_ECHO;
    use buscmd_transport::{BusSlave, SimBus, TransportError};

    use super::*;
    use crate::config::DeviceContext;
    use crate::driver::{PollDriver, DEFAULT_POLL_INTERVAL};
    use crate::handler::{CommandHandler, DefaultHandler, Disposition, Responder};
    use crate::listener::CommandListener;
    use crate::registry::DeferredHandle;

    /// Defers executes and finishes them on the following poll tick.
    #[derive(Default)]
    struct SlowDevice {
        pending: Option<(DeferredHandle, CommandText)>,
        hold: bool,
    }

    impl CommandHandler for SlowDevice {
        fn on_command(&mut self, command: &Command, responder: &mut Responder<'_>) -> Disposition {
            match command {
                Command::Echo { data } => {
                    responder.post(Response::echo(data)).unwrap();
                    Disposition::Handled
                }
                Command::Execute { command_line, .. } => {
                    let handle = responder.defer(CMD_EXECUTE).unwrap();
                    self.pending = Some((handle, *command_line));
                    Disposition::Handled
                }
                _ => Disposition::Unhandled,
            }
        }

        fn on_poll(&mut self, _responder: &mut Responder<'_>) {
            if self.hold {
                return;
            }
            if let Some((handle, line)) = self.pending.take() {
                handle.complete(Response::ok(line.as_bytes().to_vec())).unwrap();
            }
        }
    }

    fn attach<H: CommandHandler + Send + 'static>(
        bus: &SimBus,
        address: u8,
        listener: CommandListener<H>,
    ) -> (Arc<CommandListener<H>>, PollDriver) {
        let listener = Arc::new(listener);
        bus.attach(address, Arc::clone(&listener) as Arc<dyn BusSlave>)
            .unwrap();
        let driver = PollDriver::spawn(Arc::clone(&listener), DEFAULT_POLL_INTERVAL).unwrap();
        (listener, driver)
    }

    fn master(bus: &SimBus) -> BusMaster<SimBus> {
        BusMaster::with_config(
            bus.clone(),
            MasterConfig {
                response_timeout: Duration::from_secs(2),
                ..MasterConfig::default()
            },
        )
    }

    #[test]
    fn query_id_over_bus() {
        let bus = SimBus::new();
        let first = CommandListener::new(DeviceContext::new(7), DefaultHandler).unwrap();
        let second = CommandListener::new(DeviceContext::new(8), DefaultHandler).unwrap();
        let (_l1, _d1) = attach(&bus, 0x20, first);
        let (_l2, _d2) = attach(&bus, 0x21, second);

        let mut master = master(&bus);
        assert_eq!(master.query_id(0x20).unwrap(), 7);
        assert_eq!(master.query_id(0x21).unwrap(), 8);
    }

    #[test]
    fn echo_over_bus() {
        let bus = SimBus::new();
        let (_listener, _driver) = attach(
            &bus,
            0x30,
            CommandListener::new(DeviceContext::new(1), SlowDevice::default()).unwrap(),
        );

        let mut master = master(&bus);
        assert_eq!(master.echo(0x30, "hello").unwrap(), CommandText::from("hello"));
    }

    #[test]
    fn execute_is_deferred_then_collected() {
        let bus = SimBus::new();
        let (_listener, _driver) = attach(
            &bus,
            0x30,
            CommandListener::new(DeviceContext::new(1), SlowDevice::default()).unwrap(),
        );

        let mut master = master(&bus);
        let Reply::Deferred(ticket) = master.execute(0x30, "run").unwrap() else {
            panic!("expected deferred reply");
        };
        assert_eq!(ticket.address, 0x30);
        assert_eq!(ticket.original_command, CMD_EXECUTE);
        assert_ne!(ticket.response_id, 0);

        let response = master
            .wait_deferred(&ticket, Duration::from_secs(2))
            .unwrap();
        assert_eq!(response.code, ResponseCode::Ok);
        assert_eq!(response.payload.as_ref(), b"run");

        let again = master.query_response(&ticket).unwrap().unwrap();
        assert_eq!(again.code, ResponseCode::Error);
    }

    #[test]
    fn wait_deferred_times_out() {
        let bus = SimBus::new();
        let (listener, _driver) = attach(
            &bus,
            0x30,
            CommandListener::new(
                DeviceContext::new(1),
                SlowDevice {
                    hold: true,
                    ..SlowDevice::default()
                },
            )
            .unwrap(),
        );

        let mut master = master(&bus);
        let Reply::Deferred(ticket) = master.execute(0x30, "stuck").unwrap() else {
            panic!("expected deferred reply");
        };
        assert_eq!(master.query_response(&ticket).unwrap(), None);

        let err = master
            .wait_deferred(&ticket, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, ListenerError::DeferredTimeout { address: 0x30, .. }));
        assert_eq!(listener.deferred_in_use(), 1);
    }

    #[test]
    fn unpolled_device_yields_not_ready() {
        let bus = SimBus::new();
        let listener =
            Arc::new(CommandListener::new(DeviceContext::new(1), DefaultHandler).unwrap());
        bus.attach(0x40, Arc::clone(&listener) as Arc<dyn BusSlave>)
            .unwrap();

        let mut master = BusMaster::with_config(
            bus.clone(),
            MasterConfig {
                response_timeout: Duration::from_millis(10),
                ..MasterConfig::default()
            },
        );
        let response = master.transact(0x40, &Command::QueryId).unwrap();
        assert_eq!(response.code, ResponseCode::NotReady);

        let err = master.query_id(0x40).unwrap_err();
        assert!(matches!(
            err,
            ListenerError::UnexpectedResponse {
                code: ResponseCode::Busy,
                ..
            }
        ));
    }

    #[test]
    fn request_right_after_announce_is_accepted() {
        let bus = SimBus::new();
        let (_listener, _driver) = attach(
            &bus,
            0x30,
            CommandListener::new(DeviceContext::new(9), DefaultHandler).unwrap(),
        );

        let mut master = master(&bus);
        for _ in 0..50 {
            master.announce(0x30).unwrap();
            assert_eq!(master.query_id(0x30).unwrap(), 9);
        }
    }

    #[test]
    fn busy_rejection_is_resent_once_device_frees_up() {
        let bus = SimBus::new();
        let listener =
            Arc::new(CommandListener::new(DeviceContext::new(4), DefaultHandler).unwrap());
        bus.attach(0x42, Arc::clone(&listener) as Arc<dyn BusSlave>)
            .unwrap();

        let mut master = master(&bus);
        master.reset(0x42).unwrap();
        assert!(listener.has_pending_command());

        let poller = Arc::clone(&listener);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            poller.poll();
            while !poller.has_pending_command() {
                std::thread::sleep(Duration::from_millis(1));
            }
            poller.poll();
        });

        assert_eq!(master.query_id(0x42).unwrap(), 4);
        handle.join().unwrap();
        assert!(listener.stats().busy_rejections > 0);
    }

    #[test]
    fn missing_device_surfaces_transport_error() {
        let bus = SimBus::new();
        let mut master = master(&bus);
        let err = master.query_id(0x55).unwrap_err();
        let ListenerError::Transport(err) = err else {
            panic!("expected transport error");
        };
        assert!(matches!(err, TransportError::AddressNack(0x55)));
        assert_eq!(err.status_code(), 2);
    }

    #[test]
    fn reset_sends_without_reading() {
        let bus = SimBus::new();
        let listener =
            Arc::new(CommandListener::new(DeviceContext::new(1), DefaultHandler).unwrap());
        bus.attach(0x41, Arc::clone(&listener) as Arc<dyn BusSlave>)
            .unwrap();

        let mut master = master(&bus);
        master.reset(0x41).unwrap();
        assert!(listener.has_pending_command());
        assert!(!listener.has_pending_response());
    }

    #[test]
    fn request_classifies_plain_reply() {
        let bus = SimBus::new();
        let (_listener, _driver) = attach(
            &bus,
            0x30,
            CommandListener::new(DeviceContext::new(1), SlowDevice::default()).unwrap(),
        );
        let mut master = master(&bus);
        let reply = master.request(0x30, &Command::echo("x")).unwrap();
        let Reply::Ready(response) = reply else {
            panic!("expected ready reply");
        };
        assert_eq!(response.echo_text().unwrap().as_bytes(), b"x");
        assert_eq!(command_name(CMD_ECHO), "ECHO");
    }

    #[test]
    fn config_round_trips_through_json() {
        let config: MasterConfig =
            serde_json::from_str(r#"{"response_timeout": 250, "address": 16}"#).unwrap();
        assert_eq!(config.response_timeout, Duration::from_millis(250));
        assert_eq!(config.retry_interval, Duration::from_millis(2));
        assert_eq!(config.address, 0x10);
    }
}

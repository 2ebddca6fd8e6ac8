use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use buscmd_frame::{
    command_name, decode_command, response_frame, Command, RawFrame, Response, ResponseCode,
    COMMAND_HEADER_SIZE, CMD_NONE,
};
use buscmd_transport::BusSlave;
use tracing::{debug, trace, warn};

use crate::config::{DeviceContext, MalformedPolicy, UnknownCommandPolicy};
use crate::error::Result;
use crate::handler::{CommandHandler, Disposition, Responder};
use crate::registry::DeferredRegistry;
use crate::slot::FrameSlot;
use crate::stats::{bump, ListenerStats, StatsCounters};

/// Served whenever the master asks for a response and none is waiting.
pub const NOT_READY_FRAME: RawFrame = RawFrame::status(ResponseCode::NotReady, 0);
const BUSY_FRAME: RawFrame = RawFrame::status(ResponseCode::Busy, 0);
const UNKNOWN_FRAME: RawFrame = RawFrame::status(ResponseCode::Unknown, 0);

/// The device side of the command protocol.
///
/// Bridges the time-critical bus callbacks ([`receive`](Self::receive),
/// [`get_response`](Self::get_response)) with the cooperative poll loop
/// ([`poll`](Self::poll)) that runs the handler. At most one command and one
/// top-level response are pending at a time; further deferred results live
/// in the registry until a `CMD_QUERY_RESPONSE` collects them.
///
/// The receive and response paths only take the buffer locks, never the
/// handler or registry locks, so they stay short while a handler runs.
pub struct CommandListener<H> {
    device: DeviceContext,
    command: FrameSlot,
    response: FrameSlot,
    registry: Mutex<DeferredRegistry>,
    handler: Mutex<H>,
    stats: StatsCounters,
}

impl<H: CommandHandler> CommandListener<H> {
    /// Create a listener for `device`, dispatching to `handler`.
    pub fn new(device: DeviceContext, handler: H) -> Result<Self> {
        device.config.validate()?;
        let registry = DeferredRegistry::new(
            device.config.registry_capacity,
            device.config.deferred_ttl(),
        );
        Ok(Self {
            device,
            command: FrameSlot::default(),
            response: FrameSlot::default(),
            registry: Mutex::new(registry),
            handler: Mutex::new(handler),
            stats: StatsCounters::default(),
        })
    }

    /// Reset both pending flags and run the handler's start hook.
    pub fn begin(&self) {
        self.begin_at(Instant::now());
    }

    /// [`begin`](Self::begin) with an explicit clock, for expiry.
    pub fn begin_at(&self, now: Instant) {
        self.command.clear();
        self.response.clear();
        debug!(device_id = self.device.device_id, "listener started");

        let mut handler = lock(&self.handler);
        let mut registry = lock(&self.registry);
        let expired = registry.expire(now);
        let mut responder =
            Responder::new(&self.device, &self.response, &mut registry, &self.stats, now);
        responder.record_expired(expired);
        handler.on_begin(&mut responder);
    }

    /// Capture a command frame. Runs on the receive path and never blocks
    /// on handler work.
    ///
    /// If a command is already pending the new one is rejected: it is
    /// answered `BUSY` when it expects a response, otherwise dropped.
    pub fn receive(&self, raw: &[u8]) {
        let code = raw.get(1).copied().unwrap_or(CMD_NONE);
        {
            let mut command = self.command.lock();
            if !command.pending {
                match RawFrame::capture(raw, COMMAND_HEADER_SIZE) {
                    Ok(frame) => {
                        command.frame = frame;
                        command.pending = true;
                        bump(&self.stats.commands_received);
                        trace!(command = command_name(code), len = frame.len(), "command captured");
                        return;
                    }
                    Err(err) => {
                        drop(command);
                        trace!(error = %err, "malformed command rejected");
                        self.reject_malformed();
                        return;
                    }
                }
            }
        }

        bump(&self.stats.busy_rejections);
        if (self.device.config.response_expected)(code) {
            trace!(command = command_name(code), "command rejected busy");
            self.store_response(BUSY_FRAME);
        } else {
            trace!(command = command_name(code), "command dropped while busy");
        }
    }

    /// Dispatch the pending command, if any, then run the handler's poll hook.
    pub fn poll(&self) {
        self.poll_at(Instant::now());
    }

    /// [`poll`](Self::poll) with an explicit clock, for expiry.
    pub fn poll_at(&self, now: Instant) {
        let pending = self.command.peek();

        let mut handler = lock(&self.handler);
        let mut registry = lock(&self.registry);
        let expired = registry.expire(now);
        let mut responder =
            Responder::new(&self.device, &self.response, &mut registry, &self.stats, now);
        responder.record_expired(expired);

        if let Some(frame) = pending {
            self.dispatch(&frame, &mut *handler, &mut responder);
            self.command.clear();
        }
        handler.on_poll(&mut responder);
    }

    fn dispatch(&self, frame: &RawFrame, handler: &mut H, responder: &mut Responder<'_>) {
        let command = match decode_command(frame.as_bytes()) {
            Ok(command) => command,
            Err(err) => {
                warn!(frame = ?frame, error = %err, "malformed command");
                bump(&self.stats.malformed_frames);
                if self.device.config.malformed_policy == MalformedPolicy::RespondUnknown {
                    responder.post_frame(UNKNOWN_FRAME);
                }
                return;
            }
        };
        debug!(
            device_id = self.device.device_id,
            command = command.name(),
            "dispatching command"
        );

        match command {
            Command::QueryId => {
                let response = Response::query_id(self.device.device_id);
                if let Err(err) = responder.post(response) {
                    warn!(error = %err, "failed to post query-id response");
                }
            }
            Command::QueryResponse {
                response_id,
                original_command,
            } => responder.resolve(response_id, original_command),
            command => {
                if handler.on_command(&command, responder) == Disposition::Unhandled {
                    match self.device.config.unknown_command_policy {
                        UnknownCommandPolicy::RespondUnknown => responder.post_frame(UNKNOWN_FRAME),
                        UnknownCommandPolicy::Ignore => {
                            debug!(code = command.code(), "unhandled command ignored")
                        }
                    }
                }
            }
        }
    }

    /// Take the pending response, or [`NOT_READY_FRAME`] if none is waiting.
    /// Runs on the response path.
    pub fn get_response(&self) -> RawFrame {
        match self.response.take() {
            Some(frame) => {
                bump(&self.stats.responses_delivered);
                frame
            }
            None => NOT_READY_FRAME,
        }
    }

    /// Post a response from outside the poll loop. Last write wins.
    pub fn post_response(&self, response: &Response) -> Result<()> {
        let frame = response_frame(response)?;
        self.store_response(frame);
        Ok(())
    }

    /// True while a captured command awaits dispatch.
    pub fn has_pending_command(&self) -> bool {
        self.command.is_pending()
    }

    /// True while a response awaits delivery.
    pub fn has_pending_response(&self) -> bool {
        self.response.is_pending()
    }

    /// Deferred slots currently in use.
    pub fn deferred_in_use(&self) -> usize {
        lock(&self.registry).len()
    }

    /// The device this listener answers for.
    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ListenerStats {
        self.stats.snapshot()
    }

    /// Run `f` with exclusive access to the handler.
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut lock(&self.handler))
    }

    fn store_response(&self, frame: RawFrame) {
        self.response.store(frame);
        bump(&self.stats.responses_posted);
    }

    fn reject_malformed(&self) {
        bump(&self.stats.malformed_frames);
        if self.device.config.malformed_policy == MalformedPolicy::RespondUnknown {
            self.store_response(UNKNOWN_FRAME);
        }
    }
}

impl<H> std::fmt::Debug for CommandListener<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandListener")
            .field("device_id", &self.device.device_id)
            .field("command_pending", &self.command.is_pending())
            .field("response_pending", &self.response.is_pending())
            .finish_non_exhaustive()
    }
}

impl<H: CommandHandler + Send> BusSlave for CommandListener<H> {
    fn on_receive(&self, bytes: &[u8]) {
        self.receive(bytes);
    }

    fn on_request(&self, buf: &mut [u8]) -> usize {
        let frame = self.get_response();
        let bytes = frame.as_bytes();
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        n
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use buscmd_frame::{
        command_frame, decode_response, CommandText, CMD_ECHO, CMD_EXECUTE, CMD_RESET,
    };

    use super::*;
    use crate::config::ListenerConfig;
    use crate::handler::DefaultHandler;
    use crate::registry::DeferredHandle;
    use crate::ListenerError;

    /// Echoes immediately, defers executes, counts resets.
    #[derive(Default)]
    struct TestDevice {
        pending: Vec<DeferredHandle>,
        resets: usize,
    }

    impl CommandHandler for TestDevice {
        fn on_command(&mut self, command: &Command, responder: &mut Responder<'_>) -> Disposition {
            match command {
                Command::Echo { data } => {
                    responder.post(Response::echo(data)).unwrap();
                    Disposition::Handled
                }
                Command::Execute { .. } => {
                    match responder.defer(CMD_EXECUTE) {
                        Ok(handle) => self.pending.push(handle),
                        Err(ListenerError::RegistryFull { .. }) => {
                            responder.post(Response::busy()).unwrap()
                        }
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                    Disposition::Handled
                }
                Command::Reset => {
                    self.resets += 1;
                    Disposition::Handled
                }
                _ => Disposition::Unhandled,
            }
        }
    }

    fn bytes(command: &Command) -> Vec<u8> {
        command_frame(command).unwrap().as_bytes().to_vec()
    }

    fn response(listener: &CommandListener<impl CommandHandler>) -> Response {
        decode_response(listener.get_response().as_bytes()).unwrap()
    }

    fn device(id: u8) -> CommandListener<TestDevice> {
        CommandListener::new(DeviceContext::new(id), TestDevice::default()).unwrap()
    }

    #[test]
    fn query_id_answers_device_id() {
        let listener = device(7);
        listener.begin();
        listener.receive(&[2, 0x01]);
        listener.poll();

        assert_eq!(listener.get_response().as_bytes(), &[4, 0, 0, 7]);
    }

    #[test]
    fn get_response_without_post_is_not_ready() {
        let listener = device(1);
        assert_eq!(listener.get_response(), NOT_READY_FRAME);

        listener.receive(&bytes(&Command::QueryId));
        listener.poll();
        assert_eq!(response(&listener).device_id(), Some(1));
        assert_eq!(response(&listener).code, ResponseCode::NotReady);
        assert_eq!(response(&listener).code, ResponseCode::NotReady);
    }

    #[test]
    fn second_command_before_poll_is_busy() {
        let listener = device(4);
        listener.receive(&bytes(&Command::QueryId));
        listener.receive(&bytes(&Command::echo("hi")));
        assert!(listener.has_pending_command());

        assert_eq!(response(&listener).code, ResponseCode::Busy);

        listener.poll();
        assert_eq!(response(&listener).device_id(), Some(4));
        assert_eq!(listener.stats().busy_rejections, 1);
        assert_eq!(listener.stats().commands_received, 1);
    }

    #[test]
    fn busy_drop_for_commands_without_response() {
        let listener = device(4);
        listener.receive(&bytes(&Command::QueryId));
        listener.receive(&bytes(&Command::Reset));

        assert!(!listener.has_pending_response());
        listener.poll();
        assert_eq!(response(&listener).device_id(), Some(4));
        assert_eq!(listener.with_handler(|h| h.resets), 0);
    }

    #[test]
    fn deferred_lifecycle() {
        let listener = device(9);
        listener.receive(&bytes(&Command::execute(0x10, "measure")));
        listener.poll();

        let deferred = response(&listener);
        assert_eq!(deferred.code, ResponseCode::Deferred);
        let id = deferred.response_id;
        assert_ne!(id, 0);

        let query = bytes(&Command::query_response(id, CMD_EXECUTE));
        listener.receive(&query);
        listener.poll();
        let early = response(&listener);
        assert_eq!(early.code, ResponseCode::NotReady);
        assert_eq!(early.response_id, id);

        listener.with_handler(|h| {
            h.pending
                .pop()
                .unwrap()
                .complete(Response::ok(b"42".to_vec()))
                .unwrap()
        });

        listener.receive(&query);
        listener.poll();
        let ready = response(&listener);
        assert_eq!(ready.code, ResponseCode::Ok);
        assert_eq!(ready.response_id, id);
        assert_eq!(ready.payload.as_ref(), b"42");

        listener.receive(&query);
        listener.poll();
        assert_eq!(response(&listener).code, ResponseCode::Error);

        let stats = listener.stats();
        assert_eq!(stats.deferred_registered, 1);
        assert_eq!(stats.deferred_resolved, 1);
    }

    #[test]
    fn full_registry_keeps_existing_entries() {
        let config = ListenerConfig {
            registry_capacity: 2,
            ..ListenerConfig::default()
        };
        let listener = CommandListener::new(
            DeviceContext::new(3).with_config(config),
            TestDevice::default(),
        )
        .unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            listener.receive(&bytes(&Command::execute(0x10, "job")));
            listener.poll();
            ids.push(response(&listener).response_id);
        }
        listener.receive(&bytes(&Command::execute(0x10, "job")));
        listener.poll();
        assert_eq!(response(&listener).code, ResponseCode::Busy);
        assert_eq!(listener.deferred_in_use(), 2);

        listener.with_handler(|h| {
            for handle in &h.pending {
                handle.complete(Response::ok(vec![handle.response_id()])).unwrap();
            }
        });
        for id in ids {
            listener.receive(&bytes(&Command::query_response(id, CMD_EXECUTE)));
            listener.poll();
            let ready = response(&listener);
            assert_eq!(ready.code, ResponseCode::Ok);
            assert_eq!(ready.payload.as_ref(), &[id]);
        }
    }

    #[test]
    fn deferred_entries_expire_on_poll() {
        let config = ListenerConfig {
            deferred_ttl_ms: Some(1_000),
            ..ListenerConfig::default()
        };
        let listener = CommandListener::new(
            DeviceContext::new(3).with_config(config),
            TestDevice::default(),
        )
        .unwrap();
        let start = Instant::now();

        listener.receive(&bytes(&Command::execute(0x10, "slow")));
        listener.poll_at(start);
        let id = response(&listener).response_id;

        listener.poll_at(start + Duration::from_secs(2));
        assert_eq!(listener.deferred_in_use(), 0);
        assert_eq!(listener.stats().deferred_expired, 1);

        listener.receive(&bytes(&Command::query_response(id, CMD_EXECUTE)));
        listener.poll_at(start + Duration::from_secs(2));
        assert_eq!(response(&listener).code, ResponseCode::Error);
    }

    #[test]
    fn expiry_during_begin_is_counted() {
        /// Starts one deferred job every time it is (re)started.
        #[derive(Default)]
        struct BootJob {
            handles: Vec<DeferredHandle>,
        }

        impl CommandHandler for BootJob {
            fn on_begin(&mut self, responder: &mut Responder<'_>) {
                self.handles.push(responder.defer(CMD_EXECUTE).unwrap());
            }

            fn on_command(&mut self, _: &Command, _: &mut Responder<'_>) -> Disposition {
                Disposition::Unhandled
            }
        }

        let config = ListenerConfig {
            deferred_ttl_ms: Some(1_000),
            ..ListenerConfig::default()
        };
        let listener =
            CommandListener::new(DeviceContext::new(3).with_config(config), BootJob::default())
                .unwrap();
        let start = Instant::now();

        listener.begin_at(start);
        assert_eq!(listener.deferred_in_use(), 1);

        listener.begin_at(start + Duration::from_secs(2));
        assert_eq!(listener.deferred_in_use(), 1);
        let stats = listener.stats();
        assert_eq!(stats.deferred_registered, 2);
        assert_eq!(stats.deferred_expired, 1);
    }

    #[test]
    fn oversized_frame_answers_unknown_without_capture() {
        let listener = device(1);
        let mut raw = vec![0u8; 40];
        raw[0] = 40;
        raw[1] = CMD_ECHO;
        listener.receive(&raw);

        assert!(!listener.has_pending_command());
        assert_eq!(response(&listener).code, ResponseCode::Unknown);
        assert_eq!(listener.stats().malformed_frames, 1);
    }

    #[test]
    fn malformed_frames_can_be_dropped() {
        let config = ListenerConfig {
            malformed_policy: MalformedPolicy::Drop,
            ..ListenerConfig::default()
        };
        let listener =
            CommandListener::new(DeviceContext::new(1).with_config(config), DefaultHandler)
                .unwrap();

        listener.receive(&[1]);
        listener.receive(&[5, CMD_RESET, 0, 0, 0]);
        listener.poll();

        assert!(!listener.has_pending_response());
        assert_eq!(listener.stats().malformed_frames, 2);
    }

    #[test]
    fn unknown_command_policy() {
        let listener = CommandListener::new(DeviceContext::new(1), DefaultHandler).unwrap();
        listener.receive(&[3, 0x42, 1]);
        listener.poll();
        assert!(!listener.has_pending_response());

        let config = ListenerConfig {
            unknown_command_policy: UnknownCommandPolicy::RespondUnknown,
            ..ListenerConfig::default()
        };
        let listener =
            CommandListener::new(DeviceContext::new(1).with_config(config), DefaultHandler)
                .unwrap();
        listener.receive(&[3, 0x42, 1]);
        listener.poll();
        assert_eq!(response(&listener).code, ResponseCode::Unknown);
    }

    #[test]
    fn echo_returns_text() {
        let listener = device(2);
        listener.receive(&bytes(&Command::echo("ping")));
        listener.poll();
        let echoed = response(&listener).echo_text().unwrap();
        assert_eq!(echoed, CommandText::from("ping"));
    }

    #[test]
    fn bytes_past_declared_length_are_ignored() {
        let listener = device(7);
        listener.receive(&[2, 0x01, 0xAA, 0xBB, 0xCC]);
        listener.poll();
        assert_eq!(listener.get_response().as_bytes(), &[4, 0, 0, 7]);
    }

    #[test]
    fn begin_clears_pending_state() {
        let listener = device(5);
        listener.receive(&bytes(&Command::QueryId));
        listener.post_response(&Response::ok(vec![1])).unwrap();
        listener.begin();
        assert!(!listener.has_pending_command());
        assert!(!listener.has_pending_response());
    }

    #[test]
    fn bus_slave_truncates_to_buffer() {
        let listener = device(7);
        BusSlave::on_receive(&listener, &[2, 0x01]);
        listener.poll();

        let mut buf = [0u8; 2];
        assert_eq!(BusSlave::on_request(&listener, &mut buf), 2);
        assert_eq!(buf, [4, 0]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ListenerConfig {
            registry_capacity: 0,
            ..ListenerConfig::default()
        };
        let err = CommandListener::new(DeviceContext::new(1).with_config(config), DefaultHandler)
            .unwrap_err();
        assert!(matches!(err, ListenerError::InvalidConfig(_)));
    }
}

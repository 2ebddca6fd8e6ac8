use std::sync::atomic::Ordering;
use std::time::Instant;

use buscmd_frame::{response_frame, Command, RawFrame, Response, ResponseCode};
use tracing::{debug, trace};

use crate::config::DeviceContext;
use crate::error::Result;
use crate::registry::{DeferredHandle, DeferredRegistry, Resolution};
use crate::slot::FrameSlot;
use crate::stats::{bump, StatsCounters};

/// Whether a handler took responsibility for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The handler processed the command (and posted a response if one was due).
    Handled,
    /// The handler does not know this command. The listener applies its
    /// unknown-command policy.
    Unhandled,
}

/// Device-specific command logic.
///
/// All methods run on the poll loop, never on the receive path, so they may
/// take as long as the device can afford between ticks. Work that cannot
/// finish before the requester gives up should use [`Responder::defer`].
///
/// `CMD_QUERY_ID` and `CMD_QUERY_RESPONSE` are answered by the listener and
/// never reach the handler.
pub trait CommandHandler {
    /// Called from [`CommandListener::begin`](crate::CommandListener::begin).
    fn on_begin(&mut self, _responder: &mut Responder<'_>) {}

    /// Process one command.
    fn on_command(&mut self, command: &Command, responder: &mut Responder<'_>) -> Disposition;

    /// Called on every poll tick after dispatch. Use it to finish deferred work.
    fn on_poll(&mut self, _responder: &mut Responder<'_>) {}
}

impl<H: CommandHandler + ?Sized> CommandHandler for Box<H> {
    fn on_begin(&mut self, responder: &mut Responder<'_>) {
        (**self).on_begin(responder)
    }

    fn on_command(&mut self, command: &Command, responder: &mut Responder<'_>) -> Disposition {
        (**self).on_command(command, responder)
    }

    fn on_poll(&mut self, responder: &mut Responder<'_>) {
        (**self).on_poll(responder)
    }
}

/// Answers nothing beyond the built-in commands.
///
/// A listener with this handler identifies itself and serves deferred
/// lookups, and treats every other command as unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl CommandHandler for DefaultHandler {
    fn on_command(&mut self, _command: &Command, _responder: &mut Responder<'_>) -> Disposition {
        Disposition::Unhandled
    }
}

/// A handler's view of the listener during one poll tick.
pub struct Responder<'a> {
    device: &'a DeviceContext,
    response: &'a FrameSlot,
    registry: &'a mut DeferredRegistry,
    stats: &'a StatsCounters,
    now: Instant,
}

impl<'a> Responder<'a> {
    pub(crate) fn new(
        device: &'a DeviceContext,
        response: &'a FrameSlot,
        registry: &'a mut DeferredRegistry,
        stats: &'a StatsCounters,
        now: Instant,
    ) -> Self {
        Self {
            device,
            response,
            registry,
            stats,
            now,
        }
    }

    /// This device's identifier.
    pub fn device_id(&self) -> u8 {
        self.device.device_id
    }

    /// The time this tick started.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Write `response` into the response buffer, replacing any response
    /// still waiting there.
    ///
    /// Fails only if the encoded response exceeds the frame capacity.
    pub fn post(&mut self, response: Response) -> Result<()> {
        let frame = response_frame(&response)?;
        debug!(
            code = %response.code,
            response_id = response.response_id,
            len = frame.len(),
            "posting response"
        );
        self.post_frame(frame);
        Ok(())
    }

    /// Register a deferred response for `original_command` and post
    /// `DEFERRED` carrying its ID.
    ///
    /// Keep the returned handle and complete it when the work is done. On
    /// [`ListenerError::RegistryFull`](crate::ListenerError::RegistryFull)
    /// nothing is posted; the handler chooses how to refuse.
    pub fn defer(&mut self, original_command: u8) -> Result<DeferredHandle> {
        let handle = self.registry.register(original_command, self.now)?;
        bump(&self.stats.deferred_registered);
        self.post_frame(RawFrame::status(
            ResponseCode::Deferred,
            handle.response_id(),
        ));
        Ok(handle)
    }

    /// Deferred slots currently in use.
    pub fn deferred_in_use(&self) -> usize {
        self.registry.len()
    }

    /// Total deferred slots.
    pub fn deferred_capacity(&self) -> usize {
        self.registry.capacity()
    }

    pub(crate) fn post_frame(&mut self, frame: RawFrame) {
        self.response.store(frame);
        bump(&self.stats.responses_posted);
    }

    /// Answer a `CMD_QUERY_RESPONSE`.
    pub(crate) fn resolve(&mut self, response_id: u8, original_command: u8) {
        match self
            .registry
            .resolve(response_id, original_command, self.now)
        {
            Resolution::Ready(response) => {
                bump(&self.stats.deferred_resolved);
                match response_frame(&response) {
                    Ok(frame) => self.post_frame(frame),
                    Err(err) => {
                        debug!(response_id, error = %err, "deferred response does not fit a frame");
                        self.post_frame(RawFrame::status(ResponseCode::Error, response_id));
                    }
                }
            }
            Resolution::Pending => {
                trace!(response_id, "deferred response not ready");
                self.post_frame(RawFrame::status(ResponseCode::NotReady, response_id));
            }
            Resolution::Unknown => {
                self.post_frame(RawFrame::status(ResponseCode::Error, response_id));
            }
        }
    }

    pub(crate) fn record_expired(&self, count: usize) {
        self.stats
            .deferred_expired
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Responder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("device_id", &self.device.device_id)
            .field("deferred_in_use", &self.registry.len())
            .finish()
    }
}

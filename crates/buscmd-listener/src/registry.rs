use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use buscmd_frame::{command_name, FrameError, Response, CMD_NONE, MAX_FRAME_SIZE};
use tracing::{debug, warn};

use crate::error::{ListenerError, Result};

/// Largest registry the one-byte response ID space can address.
pub const MAX_REGISTRY_CAPACITY: usize = u8::MAX as usize;

type Cell = Arc<Mutex<Option<Response>>>;

/// The producer side of a deferred response.
///
/// Returned by [`DeferredRegistry::register`]. The handler keeps it and calls
/// [`DeferredHandle::complete`] when the work finishes, from the poll loop or
/// any other thread. The registry holds the other end until the requester
/// collects the result.
#[derive(Debug, Clone)]
pub struct DeferredHandle {
    response_id: u8,
    original_command: u8,
    cell: Cell,
}

impl DeferredHandle {
    /// The ID the requester will quote in `CMD_QUERY_RESPONSE`.
    pub fn response_id(&self) -> u8 {
        self.response_id
    }

    /// The command code this response answers.
    pub fn original_command(&self) -> u8 {
        self.original_command
    }

    /// Store the finished response. The response ID is stamped with this
    /// handle's ID. Completing twice keeps the latest response.
    ///
    /// A response that does not fit a frame is refused and the entry stays
    /// pending, so the handler can complete it again with something smaller.
    pub fn complete(&self, response: Response) -> Result<()> {
        let size = response.wire_size();
        if size > MAX_FRAME_SIZE {
            warn!(
                response_id = self.response_id,
                size, "deferred response does not fit a frame"
            );
            return Err(FrameError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            }
            .into());
        }
        let response = response.with_response_id(self.response_id);
        *self.cell.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
        Ok(())
    }

    /// True once [`DeferredHandle::complete`] has been called.
    pub fn is_complete(&self) -> bool {
        self.cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Outcome of looking up a response ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The work finished. The slot has been freed.
    Ready(Response),
    /// The slot exists but the work has not finished.
    Pending,
    /// No slot matches: stale, expired, already collected, or never issued.
    Unknown,
}

#[derive(Debug)]
struct Entry {
    response_id: u8,
    original_command: u8,
    registered_at: Instant,
    cell: Cell,
}

/// Fixed-capacity table of in-progress deferred responses.
///
/// Slots are scanned linearly. Response IDs run `1..=255` round-robin and
/// skip IDs still in use, so an ID is only reused after its slot is cleared.
/// `0` is never issued because it means "not deferred" on the wire.
#[derive(Debug)]
pub struct DeferredRegistry {
    slots: Vec<Option<Entry>>,
    next_id: u8,
    ttl: Option<Duration>,
}

impl DeferredRegistry {
    /// Create a registry with `capacity` slots (clamped to `1..=255`).
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = capacity.clamp(1, MAX_REGISTRY_CAPACITY);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next_id: 1,
            ttl,
        }
    }

    /// Claim a slot for a response to `original_command`.
    ///
    /// Fails with [`ListenerError::RegistryFull`] when every slot is in use;
    /// existing entries are untouched.
    pub fn register(&mut self, original_command: u8, now: Instant) -> Result<DeferredHandle> {
        self.expire(now);

        let Some(index) = self.slots.iter().position(Option::is_none) else {
            warn!(
                capacity = self.slots.len(),
                command = command_name(original_command),
                "deferred response registry full"
            );
            return Err(ListenerError::RegistryFull {
                capacity: self.slots.len(),
            });
        };

        let response_id = self.allocate_id();
        let cell: Cell = Arc::new(Mutex::new(None));
        self.slots[index] = Some(Entry {
            response_id,
            original_command,
            registered_at: now,
            cell: Arc::clone(&cell),
        });
        debug!(
            response_id,
            command = command_name(original_command),
            "registered deferred response"
        );

        Ok(DeferredHandle {
            response_id,
            original_command,
            cell,
        })
    }

    /// Look up `response_id` on behalf of a `CMD_QUERY_RESPONSE`.
    ///
    /// A non-zero `original_command` must match the registered command;
    /// `CMD_NONE` matches any.
    pub fn resolve(&mut self, response_id: u8, original_command: u8, now: Instant) -> Resolution {
        self.expire(now);

        let Some(slot) = self.slots.iter_mut().find(|slot| {
            slot.as_ref().is_some_and(|entry| {
                entry.response_id == response_id
                    && (original_command == CMD_NONE || entry.original_command == original_command)
            })
        }) else {
            debug!(response_id, "no deferred response with this id");
            return Resolution::Unknown;
        };

        let ready = slot.as_ref().and_then(|entry| {
            entry
                .cell
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        });
        match ready {
            Some(response) => {
                *slot = None;
                debug!(response_id, "deferred response collected");
                Resolution::Ready(response)
            }
            None => Resolution::Pending,
        }
    }

    /// Reclaim entries older than the TTL. Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let mut expired = 0;
        for slot in &mut self.slots {
            let stale = slot
                .as_ref()
                .is_some_and(|entry| now.saturating_duration_since(entry.registered_at) >= ttl);
            if stale {
                if let Some(entry) = slot.take() {
                    warn!(
                        response_id = entry.response_id,
                        command = command_name(entry.original_command),
                        ?ttl,
                        "deferred response expired uncollected"
                    );
                }
                expired += 1;
            }
        }
        expired
    }

    /// True if `response_id` occupies a slot.
    pub fn contains(&self, response_id: u8) -> bool {
        self.entries().any(|entry| entry.response_id == response_id)
    }

    /// IDs currently in use, in slot order.
    pub fn in_use_ids(&self) -> Vec<u8> {
        self.entries().map(|entry| entry.response_id).collect()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    /// True if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.len() == self.slots.len()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().flatten()
    }

    fn allocate_id(&mut self) -> u8 {
        loop {
            let candidate = self.next_id;
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            if !self.contains(candidate) {
                return candidate;
            }
        }
    }
}

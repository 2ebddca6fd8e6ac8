use std::sync::{Mutex, MutexGuard, PoisonError};

use buscmd_frame::RawFrame;

/// One frame buffer plus its pending flag.
#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub(crate) frame: RawFrame,
    pub(crate) pending: bool,
}

/// A single-frame buffer shared between the receive path and the poll loop.
///
/// The lock is only held for a flag check and a fixed-size copy, so it
/// stands in for masking interrupts around the buffer swap.
#[derive(Debug, Default)]
pub(crate) struct FrameSlot {
    state: Mutex<SlotState>,
}

impl FrameSlot {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the held frame and mark it pending.
    pub(crate) fn store(&self, frame: RawFrame) {
        let mut state = self.lock();
        state.frame = frame;
        state.pending = true;
    }

    /// Remove the pending frame, if any.
    pub(crate) fn take(&self) -> Option<RawFrame> {
        let mut state = self.lock();
        if state.pending {
            state.pending = false;
            Some(state.frame)
        } else {
            None
        }
    }

    /// Copy the pending frame without clearing it.
    pub(crate) fn peek(&self) -> Option<RawFrame> {
        let state = self.lock();
        state.pending.then_some(state.frame)
    }

    pub(crate) fn clear(&self) {
        self.lock().pending = false;
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.lock().pending
    }
}

#[cfg(test)]
mod tests {
    use buscmd_frame::ResponseCode;

    use super::*;

    #[test]
    fn take_clears_pending() {
        let slot = FrameSlot::default();
        assert!(slot.take().is_none());

        slot.store(RawFrame::status(ResponseCode::Ok, 0));
        assert!(slot.is_pending());
        assert_eq!(slot.peek().unwrap().as_bytes(), &[3, 0, 0]);
        assert_eq!(slot.take().unwrap().as_bytes(), &[3, 0, 0]);
        assert!(slot.take().is_none());
    }

    #[test]
    fn store_overwrites() {
        let slot = FrameSlot::default();
        slot.store(RawFrame::status(ResponseCode::Ok, 0));
        slot.store(RawFrame::status(ResponseCode::Busy, 0));
        assert_eq!(slot.take().unwrap().code(), Some(ResponseCode::Busy as u8));
    }
}

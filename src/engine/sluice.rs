//! Gate over the pull chain. While blocked it swallows pulled events into a
//! FIFO; reopening hands the buffer back for replay through Dispatch.

use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::warn;

use crate::event::KeyEvent;

pub type Drained = SmallVec<[KeyEvent; 8]>;

#[derive(Default)]
pub struct Sluice {
    depth: u32,
    buffer: VecDeque<KeyEvent>,
}

impl Sluice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self) -> bool {
        self.depth > 0
    }

    pub fn block(&mut self) {
        self.depth += 1;
    }

    /// Open one level. Returns the buffered events once fully open. Calls must
    /// pair with `block`; a stray unblock is a programming error and is
    /// dropped.
    pub fn unblock(&mut self) -> Option<Drained> {
        if self.depth == 0 {
            debug_assert!(false, "sluice unblocked while open");
            warn!("sluice unblocked while open; ignoring");
            return None;
        }
        self.depth -= 1;
        if self.depth == 0 {
            Some(self.buffer.drain(..).collect())
        } else {
            None
        }
    }

    /// Swallow an event while blocked.
    pub fn buffer(&mut self, ev: KeyEvent) {
        debug_assert!(self.is_blocked(), "sluice buffered while open");
        self.buffer.push_back(ev);
    }
}

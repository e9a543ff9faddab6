//! Device boundary: abstract source/sink traits plus their evdev and uinput
//! implementations.

pub mod evdev;
pub mod uinput;

use std::time::Instant;

use crate::error::SourceError;
use crate::event::KeyEvent;

/// Producer side of the pipeline.
pub trait KeySource {
    /// Block until an event arrives or `deadline` passes. `Ok(None)` means the
    /// deadline won; `Err(SourceError::Closed)` is the orderly end of input.
    fn pull(&mut self, deadline: Option<Instant>) -> Result<Option<KeyEvent>, SourceError>;
}

/// Consumer side. Must forward events in the order given.
pub trait KeySink: Send {
    fn emit(&mut self, ev: &KeyEvent) -> std::io::Result<()>;
}

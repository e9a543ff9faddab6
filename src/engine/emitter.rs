//! Output side: a rendezvous cell feeding a dedicated worker.
//!
//! The engine blocks on every `send` until the worker takes the message, so an
//! emitter stall back-pressures the whole loop instead of dropping output.

use std::collections::HashSet;
use std::io;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::hooks::{HookEntry, HookMap, Verdict};
use crate::event::{KeyCode, KeyEvent, Switch};
use crate::io::KeySink;

/// Message across the rendezvous cell.
pub enum OutMsg {
    Event(KeyEvent),
    Hook(OutputHook),
}

/// Hook applied to outbound events on the worker thread. The action may write
/// replacement events straight to the sink and catch the original.
pub struct OutputHook {
    predicate: Box<dyn Fn(&KeyEvent) -> bool + Send>,
    deadline: Option<Instant>,
    action: Box<dyn FnOnce(&mut dyn KeySink, &KeyEvent) -> anyhow::Result<Verdict> + Send>,
    on_timeout: Option<Box<dyn FnOnce(&mut dyn KeySink) -> anyhow::Result<()> + Send>>,
}

impl OutputHook {
    pub fn new(
        predicate: impl Fn(&KeyEvent) -> bool + Send + 'static,
        action: impl FnOnce(&mut dyn KeySink, &KeyEvent) -> anyhow::Result<Verdict> + Send + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            deadline: None,
            action: Box::new(action),
            on_timeout: None,
        }
    }

    pub fn timed(
        predicate: impl Fn(&KeyEvent) -> bool + Send + 'static,
        deadline: Instant,
        action: impl FnOnce(&mut dyn KeySink, &KeyEvent) -> anyhow::Result<Verdict> + Send + 'static,
        on_timeout: impl FnOnce(&mut dyn KeySink) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            deadline: Some(deadline),
            action: Box::new(action),
            on_timeout: Some(Box::new(on_timeout)),
        }
    }
}

impl HookEntry for OutputHook {
    fn matches(&self, ev: &KeyEvent) -> bool {
        (self.predicate)(ev)
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Drains the output cell: applies output hooks, forwards survivors to the
/// sink, and tracks presses so an interrupted session releases what it holds.
pub struct Emitter {
    rx: Receiver<OutMsg>,
    sink: Box<dyn KeySink>,
    hooks: HookMap<OutputHook>,
    pressed: HashSet<KeyCode>,
}

impl Emitter {
    pub fn new(rx: Receiver<OutMsg>, sink: Box<dyn KeySink>) -> Self {
        Self {
            rx,
            sink,
            hooks: HookMap::new(),
            pressed: HashSet::new(),
        }
    }

    pub fn run(mut self) {
        loop {
            let msg = match self.hooks.next_deadline() {
                Some(deadline) => match self.rx.recv_deadline(deadline) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => {
                        for hook in self.hooks.take_expired(Instant::now()) {
                            if let Some(on_timeout) = hook.on_timeout {
                                if let Err(e) = on_timeout(self.sink.as_mut()) {
                                    error!("output hook timeout failed: {e}");
                                }
                            }
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };
            match msg {
                OutMsg::Hook(hook) => {
                    self.hooks.register(hook);
                }
                OutMsg::Event(ev) => {
                    if let Err(e) = self.forward(ev) {
                        error!("key sink failed: {e}");
                        break;
                    }
                }
            }
        }
        self.release_held();
        debug!("emitter worker ending");
    }

    fn forward(&mut self, ev: KeyEvent) -> anyhow::Result<()> {
        let mark = self.hooks.mark();
        while let Some(hook) = self.hooks.pop_first_match(&ev, mark) {
            if (hook.action)(self.sink.as_mut(), &ev)? == Verdict::Catch {
                return Ok(());
            }
        }
        match ev.switch {
            Switch::Press => {
                self.pressed.insert(ev.code);
            }
            Switch::Release => {
                self.pressed.remove(&ev.code);
            }
        }
        self.sink.emit(&ev)?;
        Ok(())
    }

    /// Anything still pressed when the worker goes down would stay stuck on
    /// the virtual device; release it.
    fn release_held(&mut self) {
        if self.pressed.is_empty() {
            return;
        }
        info!("releasing {} held key(s) before shutdown", self.pressed.len());
        for code in std::mem::take(&mut self.pressed) {
            if let Err(e) = self.sink.emit(&KeyEvent::release(code)) {
                warn!("failed to release key {code}: {e}");
            }
        }
    }
}

/// Create the rendezvous cell and start the worker thread.
pub fn spawn(sink: Box<dyn KeySink>) -> io::Result<(Sender<OutMsg>, JoinHandle<()>)> {
    let (tx, rx) = crossbeam_channel::bounded(0);
    let handle = std::thread::Builder::new()
        .name("keyflume-emitter".into())
        .spawn(move || Emitter::new(rx, sink).run())?;
    Ok((tx, handle))
}

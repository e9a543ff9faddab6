//! The event engine: a pull chain from the input device up to the button
//! runtime, plus the handoff to the output worker.
//!
//! Stages, bottom to top: `Dispatch` (replay queue over the key source), the
//! input hook table, the `Sluice` gate, then the loop itself, which resolves
//! presses through the `Keymap` and runs button actions. Everything here is
//! touched from exactly one thread; the emitter worker on the other side of
//! the rendezvous channel is the only parallel task.

pub mod button;
pub mod dispatch;
pub mod emitter;
pub mod hooks;
pub mod keymap;
pub mod sluice;

use std::time::Instant;

use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use tracing::{debug, trace};

use self::button::ActionCtx;
use self::dispatch::Dispatch;
use self::emitter::{OutMsg, OutputHook};
use self::hooks::{HookEntry, HookMap, Verdict};
use self::keymap::{ButtonMap, Keymap};
use self::sluice::Sluice;
use crate::error::SourceError;
use crate::event::{KeyCode, KeyEvent, Switch};
use crate::io::KeySource;

/// Hook installed on the input side of the pipeline.
pub struct InputHook {
    predicate: Box<dyn Fn(&KeyEvent) -> bool>,
    deadline: Option<Instant>,
    action: Box<dyn FnOnce(&mut Engine, &KeyEvent) -> Result<Verdict>>,
    on_timeout: Option<Box<dyn FnOnce(&mut Engine) -> Result<()>>>,
}

impl InputHook {
    pub fn new(
        predicate: impl Fn(&KeyEvent) -> bool + 'static,
        action: impl FnOnce(&mut Engine, &KeyEvent) -> Result<Verdict> + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            deadline: None,
            action: Box::new(action),
            on_timeout: None,
        }
    }

    pub fn timed(
        predicate: impl Fn(&KeyEvent) -> bool + 'static,
        deadline: Instant,
        action: impl FnOnce(&mut Engine, &KeyEvent) -> Result<Verdict> + 'static,
        on_timeout: impl FnOnce(&mut Engine) -> Result<()> + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            deadline: Some(deadline),
            action: Box::new(action),
            on_timeout: Some(Box::new(on_timeout)),
        }
    }
}

impl HookEntry for InputHook {
    fn matches(&self, ev: &KeyEvent) -> bool {
        (self.predicate)(ev)
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Engine settings that survive from the loader.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pass unmapped keys through unchanged instead of dropping them.
    pub fall_through: bool,
    /// Keycode tapped ahead of every compose sequence.
    pub compose_key: KeyCode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fall_through: true,
            compose_key: KeyCode(127),
        }
    }
}

pub struct Engine {
    pub(crate) dispatch: Dispatch,
    pub(crate) hooks: HookMap<InputHook>,
    pub(crate) sluice: Sluice,
    pub(crate) keymap: Keymap,
    pub(crate) compose_key: KeyCode,
    fall_through: bool,
    out: Sender<OutMsg>,
}

impl Engine {
    pub fn new(
        map: ButtonMap,
        cfg: EngineConfig,
        source: Box<dyn KeySource>,
        out: Sender<OutMsg>,
    ) -> Self {
        Self {
            dispatch: Dispatch::new(source),
            hooks: HookMap::new(),
            sluice: Sluice::new(),
            keymap: Keymap::new(map),
            compose_key: cfg.compose_key,
            fall_through: cfg.fall_through,
            out,
        }
    }

    /// Run until the source closes. Only I/O faults propagate; pending hooks
    /// are dropped without firing on shutdown.
    pub fn run(&mut self) -> Result<()> {
        debug!("engine loop started");
        while let Some(ev) = self.pull()? {
            if ev.switch == Switch::Press {
                self.press_key(&ev)?;
            }
            // Releases are handled by hooks installed at press time.
        }
        debug!("input source closed; engine loop ending");
        Ok(())
    }

    /// Sluice stage: swallow events while blocked, yield otherwise.
    fn pull(&mut self) -> Result<Option<KeyEvent>> {
        loop {
            let Some(ev) = self.pull_hooked()? else {
                return Ok(None);
            };
            if self.sluice.is_blocked() {
                self.sluice.buffer(ev);
                continue;
            }
            return Ok(Some(ev));
        }
    }

    /// Hook stage: fire anything past its deadline, pull from Dispatch with
    /// the nearest deadline as the wait bound, offer each event to the
    /// pending hooks and loop whenever one catches.
    fn pull_hooked(&mut self) -> Result<Option<KeyEvent>> {
        loop {
            for hook in self.hooks.take_expired(Instant::now()) {
                if let Some(on_timeout) = hook.on_timeout {
                    on_timeout(self)?;
                }
            }
            let deadline = self.hooks.next_deadline();
            let pulled = match self.dispatch.pull(deadline) {
                Ok(pulled) => pulled,
                Err(SourceError::Closed) => return Ok(None),
                Err(SourceError::Io(e)) => return Err(e.into()),
            };
            let Some(ev) = pulled else {
                // Deadline won; expiry runs at the top of the loop.
                continue;
            };
            trace!(switch = ?ev.switch, code = %ev.code, "pulled");
            if self.offer(&ev)? == Verdict::NoCatch {
                return Ok(Some(ev));
            }
        }
    }

    /// Offer `ev` to every hook registered before this offer, in registration
    /// order, until one catches. Matching hooks are consumed either way.
    fn offer(&mut self, ev: &KeyEvent) -> Result<Verdict> {
        let mark = self.hooks.mark();
        while let Some(hook) = self.hooks.pop_first_match(ev, mark) {
            if (hook.action)(self, ev)? == Verdict::Catch {
                trace!(code = %ev.code, "event caught by hook");
                return Ok(Verdict::Catch);
            }
        }
        Ok(Verdict::NoCatch)
    }

    fn press_key(&mut self, ev: &KeyEvent) -> Result<()> {
        let Some(id) = self.keymap.lookup(ev.code) else {
            return self.fall_through(ev);
        };
        let cell = self.keymap.binding_mut(id);
        if cell.last == Some(Switch::Press) {
            // TODO: decide whether auto-repeat presses should re-trigger held
            // buttons instead of being dropped here.
            trace!(code = %ev.code, "duplicate press ignored");
            return Ok(());
        }
        cell.last = Some(Switch::Press);
        let button = cell.button.clone();
        let key = ev.code;

        // The release wrapper goes in ahead of the press action: the bound
        // button's release half must run before any decision hooks the press
        // installs (a wrapping button releases its inner side first), and
        // NoCatch lets those hooks still see the event.
        let release_button = button.clone();
        self.hooks.register(InputHook::new(
            move |e| e.concerns(key, Switch::Release),
            move |engine, rev| {
                engine.keymap.binding_mut(id).last = Some(Switch::Release);
                let mut ctx = ActionCtx::new(engine, rev.code, release_button.clone());
                release_button.on_release(&mut ctx)?;
                Ok(Verdict::NoCatch)
            },
        ));

        let mut ctx = ActionCtx::new(self, key, button.clone());
        button.on_press(&mut ctx)?;
        Ok(())
    }

    /// Policy for keys the keymap does not know.
    fn fall_through(&mut self, ev: &KeyEvent) -> Result<()> {
        if !self.fall_through {
            trace!(code = %ev.code, "unmapped key dropped");
            return Ok(());
        }
        let key = ev.code;
        self.send_out(KeyEvent::press(key))?;
        self.hooks.register(InputHook::new(
            move |e| e.concerns(key, Switch::Release),
            move |engine, _| {
                engine.send_out(KeyEvent::release(key))?;
                Ok(Verdict::Catch)
            },
        ));
        Ok(())
    }

    pub(crate) fn send_out(&mut self, ev: KeyEvent) -> Result<()> {
        self.out
            .send(OutMsg::Event(ev))
            .map_err(|_| anyhow!("output side disconnected"))
    }

    pub(crate) fn send_hook(&mut self, hook: OutputHook) -> Result<()> {
        self.out
            .send(OutMsg::Hook(hook))
            .map_err(|_| anyhow!("output side disconnected"))
    }
}

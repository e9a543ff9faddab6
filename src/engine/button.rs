//! The button tree and its runtime.
//!
//! A button's press action runs synchronously inside the engine loop with a
//! capability set (`ActionCtx`) that can emit, gate the sluice, install hooks,
//! mutate the layer stack and inject events. Buttons whose outcome depends on
//! later input (tap/hold and friends) decide by installing hooks and return;
//! the hook continues the work when the deciding event or deadline arrives.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, warn};

use crate::engine::hooks::{HookId, Verdict};
use crate::engine::keymap::{LayerOp, LayerTag};
use crate::engine::{Engine, InputHook};
use crate::event::{KeyCode, KeyEvent, Switch};

/// A node in the button tree bound to a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Button {
    /// Mirror the key's cycle onto another keycode.
    Emit(KeyCode),
    /// Activate a layer while held.
    LayerToggle(LayerTag),
    /// Replace the base layer.
    LayerSwitch(LayerTag),
    /// Tap unless some other event arrives before this key's release.
    TapNext { tap: Box<Button>, hold: Box<Button> },
    /// Tap when released within the delay, hold otherwise.
    TapHold {
        delay_ms: u64,
        tap: Box<Button>,
        hold: Box<Button>,
    },
    /// Resolve by the number of consecutive taps, one `(gap, button)` step per
    /// count, falling back to `last` once the steps run out.
    MultiTap {
        steps: Vec<(u64, Button)>,
        last: Box<Button>,
    },
    /// Wrap the inner button's cycle inside the outer one's.
    Around { outer: Box<Button>, inner: Box<Button> },
    /// Tap every child in order.
    TapMacro(Vec<Button>),
    /// Tap the configured compose leader, then every child in order.
    ComposeSeq(Vec<Button>),
    /// Stall the pipeline for the given number of milliseconds.
    Pause(u64),
    /// Spawn a shell command, fire and forget.
    Cmd(String),
    /// Inherited from a lower layer; resolved away before dispatch.
    Trans,
    /// Swallow the whole press/release cycle.
    Block,
}

impl Button {
    /// Run the press half of this button.
    pub fn on_press(&self, k: &mut ActionCtx<'_>) -> Result<()> {
        match self {
            Button::Emit(code) => k.emit(KeyEvent::press(*code)),
            Button::LayerToggle(tag) => {
                k.layer_op(LayerOp::Push(tag.clone()));
                Ok(())
            }
            Button::LayerSwitch(tag) => {
                k.layer_op(LayerOp::SetBase(tag.clone()));
                Ok(())
            }
            Button::TapNext { tap, hold } => press_tap_next(k, tap, hold),
            Button::TapHold {
                delay_ms,
                tap,
                hold,
            } => press_tap_hold(k, *delay_ms, tap, hold),
            Button::MultiTap { steps, last } => {
                multi_tap_step(k, steps.clone(), 0, (**last).clone())
            }
            Button::Around { outer, inner } => {
                outer.on_press(k)?;
                inner.on_press(k)
            }
            Button::TapMacro(seq) => {
                for b in seq {
                    b.tap(k)?;
                }
                Ok(())
            }
            Button::ComposeSeq(seq) => {
                Button::Emit(k.compose_key()).tap(k)?;
                for b in seq {
                    b.tap(k)?;
                }
                Ok(())
            }
            Button::Pause(ms) => {
                k.pause(*ms);
                Ok(())
            }
            Button::Cmd(cmd) => {
                spawn_cmd(cmd);
                Ok(())
            }
            Button::Trans => {
                warn!("transparent button dispatched; lookup should have resolved it");
                Ok(())
            }
            Button::Block => Ok(()),
        }
    }

    /// Run the release half. Buttons that resolve their release from a hook
    /// installed at press time have nothing left to do here.
    pub fn on_release(&self, k: &mut ActionCtx<'_>) -> Result<()> {
        match self {
            Button::Emit(code) => k.emit(KeyEvent::release(*code)),
            Button::LayerToggle(tag) => {
                k.layer_op(LayerOp::Pop(tag.clone()));
                Ok(())
            }
            Button::Around { outer, inner } => {
                inner.on_release(k)?;
                outer.on_release(k)
            }
            _ => Ok(()),
        }
    }

    /// Full press/release pair, run synchronously.
    pub fn tap(&self, k: &mut ActionCtx<'_>) -> Result<()> {
        self.on_press(k)?;
        self.on_release(k)
    }
}

fn press_tap_next(k: &mut ActionCtx<'_>, tap: &Button, hold: &Button) -> Result<()> {
    k.hold(true);
    let key = k.key;
    let binding = k.binding.clone();
    let tap = tap.clone();
    let hold = hold.clone();
    // The very next event decides: my own release means tap, anything else
    // means hold.
    k.wait_for(
        |_| true,
        move |engine, ev| {
            let mut k = ActionCtx::new(engine, key, binding);
            k.hold(false);
            if ev.concerns(key, Switch::Release) {
                tap.tap(&mut k)?;
            } else {
                hold.on_press(&mut k)?;
                release_later(&mut k, hold);
            }
            Ok(Verdict::NoCatch)
        },
    );
    Ok(())
}

fn press_tap_hold(k: &mut ActionCtx<'_>, delay_ms: u64, tap: &Button, hold: &Button) -> Result<()> {
    k.hold(true);
    let key = k.key;
    let binding = k.binding.clone();
    let binding_t = binding.clone();
    let tap = tap.clone();
    let hold = hold.clone();
    let deadline = Instant::now() + Duration::from_millis(delay_ms);
    k.register(InputHook::timed(
        move |ev| ev.concerns(key, Switch::Release),
        deadline,
        move |engine, _ev| {
            // Released in time: the whole thing was a tap.
            let mut k = ActionCtx::new(engine, key, binding);
            k.hold(false);
            tap.tap(&mut k)?;
            Ok(Verdict::NoCatch)
        },
        move |engine| {
            // Deadline passed while held: commit to the hold button and let
            // the buffered events replay behind its press.
            let mut k = ActionCtx::new(engine, key, binding_t);
            k.hold(false);
            hold.on_press(&mut k)?;
            release_later(&mut k, hold);
            Ok(())
        },
    ));
    Ok(())
}

/// One step of a multi-tap chain: wait for the next press of the same key
/// within `gap`; a match advances the chain, a timeout taps the step's button.
fn multi_tap_step(
    k: &mut ActionCtx<'_>,
    steps: Vec<(u64, Button)>,
    idx: usize,
    last: Button,
) -> Result<()> {
    if idx >= steps.len() {
        last.on_press(k)?;
        release_later(k, last);
        return Ok(());
    }
    let key = k.key;
    let binding = k.binding.clone();
    let binding_t = binding.clone();
    let (gap, step) = steps[idx].clone();
    let deadline = Instant::now() + Duration::from_millis(gap);
    k.register(InputHook::timed(
        move |ev| ev.concerns(key, Switch::Press),
        deadline,
        move |engine, _ev| {
            // Caught: the repeated press must not restart the button.
            let mut k = ActionCtx::new(engine, key, binding);
            multi_tap_step(&mut k, steps, idx + 1, last)?;
            Ok(Verdict::Catch)
        },
        move |engine| {
            let mut k = ActionCtx::new(engine, key, binding_t);
            step.tap(&mut k)
        },
    ));
    Ok(())
}

/// Arrange `button`'s release half to run on this key's next release.
fn release_later(k: &mut ActionCtx<'_>, button: Button) {
    k.wait_for_my(Switch::Release, move |engine, ev| {
        let mut k = ActionCtx::new(engine, ev.code, button.clone());
        button.on_release(&mut k)?;
        Ok(Verdict::NoCatch)
    });
}

fn spawn_cmd(cmd: &str) {
    let cmd = cmd.to_string();
    std::thread::spawn(move || {
        let spawned = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(&cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            error!("failed to spawn `{cmd}`: {e}");
        }
    });
}

/// Capability set handed to button actions.
pub struct ActionCtx<'e> {
    engine: &'e mut Engine,
    key: KeyCode,
    binding: Button,
}

impl<'e> ActionCtx<'e> {
    pub(crate) fn new(engine: &'e mut Engine, key: KeyCode, binding: Button) -> Self {
        Self {
            engine,
            key,
            binding,
        }
    }

    /// The physical key this invocation runs under.
    pub fn key(&self) -> KeyCode {
        self.key
    }

    /// The button definition currently bound, for self-reference in recursive
    /// primitives.
    pub fn my_binding(&self) -> &Button {
        &self.binding
    }

    pub fn compose_key(&self) -> KeyCode {
        self.engine.compose_key
    }

    /// Hand an event to the output side. Blocks until the emitter takes it.
    pub fn emit(&mut self, ev: KeyEvent) -> Result<()> {
        self.engine.send_out(ev)
    }

    /// Stall the pipeline without yielding to other button actions.
    pub fn pause(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    /// Gate (`true`) or reopen (`false`) the sluice. Reopening replays the
    /// buffered events ahead of new input. Calls must balance over a cycle.
    pub fn hold(&mut self, on: bool) {
        if on {
            self.engine.sluice.block();
        } else if let Some(drained) = self.engine.sluice.unblock() {
            self.engine.dispatch.rerun(drained);
        }
    }

    /// Install a hook on the input side.
    pub fn register(&mut self, hook: InputHook) -> HookId {
        self.engine.hooks.register(hook)
    }

    /// Install a hook on the output side.
    pub fn register_output(&mut self, hook: crate::engine::emitter::OutputHook) -> Result<()> {
        self.engine.send_hook(hook)
    }

    pub fn layer_op(&mut self, op: LayerOp) {
        self.engine.keymap.apply(op);
    }

    /// Whether `tag` is anywhere on the active layer stack.
    pub fn layer_active(&self, tag: &LayerTag) -> bool {
        self.engine.keymap.is_active(tag)
    }

    /// Push a synthetic event onto the head of the replay queue.
    pub fn inject(&mut self, ev: KeyEvent) {
        self.engine.dispatch.inject(ev);
    }

    /// One-shot hook on the next event matching `pred`.
    pub fn wait_for(
        &mut self,
        pred: impl Fn(&KeyEvent) -> bool + 'static,
        action: impl FnOnce(&mut Engine, &KeyEvent) -> Result<Verdict> + 'static,
    ) -> HookId {
        self.engine.hooks.register(InputHook::new(pred, action))
    }

    /// One-shot hook on this key's next `switch` event.
    pub fn wait_for_my(
        &mut self,
        switch: Switch,
        action: impl FnOnce(&mut Engine, &KeyEvent) -> Result<Verdict> + 'static,
    ) -> HookId {
        let key = self.key;
        self.wait_for(move |ev| ev.concerns(key, switch), action)
    }
}

//! uinput-backed virtual keyboard as a `KeySink`.

use anyhow::{Context, Result};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, Device, EventType, InputEvent, Key};

use super::KeySink;
use crate::event::{KeyEvent, Switch};

pub const VIRTUAL_PREFIX: &str = "keyflume virtual keyboard";

/// Virtual device mirroring the key capabilities of the grabbed physical
/// keyboard.
pub struct UinputSink {
    device: VirtualDevice,
}

impl UinputSink {
    pub fn mirroring(physical: &Device, name: &str) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        if let Some(supported) = physical.supported_keys() {
            for key in supported {
                keys.insert(key);
            }
        }
        let device = VirtualDeviceBuilder::new()?
            .name(&format!("{VIRTUAL_PREFIX} ({name})"))
            .with_keys(&keys)?
            .build()
            .context("failed to build virtual device")?;
        Ok(Self { device })
    }
}

impl KeySink for UinputSink {
    fn emit(&mut self, ev: &KeyEvent) -> std::io::Result<()> {
        let value = match ev.switch {
            Switch::Press => 1,
            Switch::Release => 0,
        };
        let event = InputEvent::new_now(EventType::KEY, ev.code.0 as u16, value);
        self.device.emit(&[event])
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Direction of a key switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Switch {
    Press,
    Release,
}

/// Keycode as reported by the input device. Opaque to the engine; only the
/// io boundary knows it is an evdev code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyCode(pub u32);

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single key event travelling through the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct KeyEvent {
    pub switch: Switch,
    pub code: KeyCode,
    pub time: Instant,
}

impl KeyEvent {
    pub fn new(switch: Switch, code: KeyCode) -> Self {
        Self {
            switch,
            code,
            time: Instant::now(),
        }
    }

    pub fn press(code: KeyCode) -> Self {
        Self::new(Switch::Press, code)
    }

    pub fn release(code: KeyCode) -> Self {
        Self::new(Switch::Release, code)
    }

    pub fn is_press(&self) -> bool {
        self.switch == Switch::Press
    }

    /// True when this event is `switch` of exactly `code`.
    pub fn concerns(&self, code: KeyCode, switch: Switch) -> bool {
        self.code == code && self.switch == switch
    }
}

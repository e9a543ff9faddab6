//! Grabbed evdev keyboard as a `KeySource`.

use std::collections::VecDeque;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use evdev::{Device, EventType};
use tracing::{debug, info, warn};

use super::uinput::VIRTUAL_PREFIX;
use super::KeySource;
use crate::error::SourceError;
use crate::event::{KeyCode, KeyEvent, Switch};

const POLL_NAP: Duration = Duration::from_millis(1);

/// Exclusive handle on a physical keyboard. Grabbed on creation and ungrabbed
/// on drop, so the real keyboard comes back even on abnormal exits.
pub struct EvdevSource {
    device: Device,
    queue: VecDeque<KeyEvent>,
    stop: Arc<AtomicBool>,
}

impl EvdevSource {
    pub fn open(path: &Path, stop: Arc<AtomicBool>) -> Result<Self> {
        let mut device = Device::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        // Non-blocking reads, so the pull loop can honor deadlines and the
        // shutdown flag.
        let fd = device.as_raw_fd();
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        device.grab().context("failed to grab device")?;
        info!("grabbed {}", path.display());
        Ok(Self {
            device,
            queue: VecDeque::new(),
            stop,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Pull whatever the device has ready into the local queue. Returns true
    /// when any event arrived.
    fn drain_device(&mut self) -> Result<bool, SourceError> {
        match self.device.fetch_events() {
            Ok(events) => {
                let before = self.queue.len();
                for ev in events {
                    if ev.event_type() != EventType::KEY {
                        continue;
                    }
                    let switch = match ev.value() {
                        1 => Switch::Press,
                        0 => Switch::Release,
                        _ => continue, // auto-repeat
                    };
                    self.queue
                        .push_back(KeyEvent::new(switch, KeyCode(u32::from(ev.code()))));
                }
                Ok(self.queue.len() > before)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                warn!("input device disappeared");
                Err(SourceError::Closed)
            }
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

impl KeySource for EvdevSource {
    fn pull(&mut self, deadline: Option<Instant>) -> Result<Option<KeyEvent>, SourceError> {
        loop {
            if let Some(ev) = self.queue.pop_front() {
                return Ok(Some(ev));
            }
            if self.stop.load(Ordering::Relaxed) {
                return Err(SourceError::Closed);
            }
            if self.drain_device()? {
                continue;
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Ok(None);
                }
            }
            std::thread::sleep(POLL_NAP);
        }
    }
}

impl Drop for EvdevSource {
    fn drop(&mut self) {
        match self.device.ungrab() {
            Ok(()) => debug!("device ungrabbed"),
            Err(e) => warn!("failed to ungrab device: {e}"),
        }
    }
}

/// Input devices that look like keyboards: letters plus a space bar, and not
/// one of our own virtual devices.
pub fn discover_keyboards() -> Vec<(PathBuf, String)> {
    let mut found = Vec::new();
    for (path, device) in evdev::enumerate() {
        let Some(keys) = device.supported_keys() else {
            continue;
        };
        let looks_like_keyboard = keys.contains(evdev::Key::KEY_A)
            && keys.contains(evdev::Key::KEY_Z)
            && keys.contains(evdev::Key::KEY_SPACE);
        if !looks_like_keyboard {
            continue;
        }
        let name = device.name().unwrap_or("unknown").to_string();
        if name.starts_with(VIRTUAL_PREFIX) {
            continue;
        }
        debug!("found keyboard: {} at {}", name, path.display());
        found.push((path, name));
    }
    found
}

//! Wiring: device discovery, grab, virtual device, emitter worker, engine.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::Config;
use crate::engine::{emitter, Engine};
use crate::io::evdev::{discover_keyboards, EvdevSource};
use crate::io::uinput::UinputSink;

/// Run the remapping pipeline until a signal arrives or the device goes away.
pub fn run(config: &Config, device_override: Option<PathBuf>) -> Result<()> {
    let (map, engine_cfg) = config.resolve()?;

    let stop = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&stop))
            .context("failed to install signal handler")?;
    }

    let path = match device_override.or_else(|| config.device.clone()) {
        Some(path) => path,
        None => {
            let mut keyboards = discover_keyboards();
            if keyboards.is_empty() {
                bail!("no keyboard-looking input device found");
            }
            let (path, name) = keyboards.remove(0);
            info!("autoselected {} ({})", path.display(), name);
            path
        }
    };

    let source = EvdevSource::open(&path, Arc::clone(&stop))?;
    let name = source.device().name().unwrap_or("unknown").to_string();
    let sink = UinputSink::mirroring(source.device(), &name)?;
    info!("virtual device created for {name}");

    let (out, emitter) = emitter::spawn(Box::new(sink))?;
    let mut engine = Engine::new(map, engine_cfg, Box::new(source), out);
    let result = engine.run();

    // Dropping the engine ungrabs the physical keyboard; only then let the
    // emitter tear down the virtual device.
    drop(engine);
    if emitter.join().is_err() {
        bail!("emitter worker panicked");
    }
    info!("shutdown complete");
    result
}

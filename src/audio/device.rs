//! Input device discovery through the PipeWire registry

use crate::error::CaptureError;
use log::{debug, info};
use pipewire as pw;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Pseudo devices that alias a real one
const ALIAS_DEVICE_IDS: [&str; 2] = ["default", "communications"];

/// Represents an audio input device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioDevice {
    /// PipeWire node name, used as the stream target
    pub id: String,
    pub label: String,
    /// Physical device the node belongs to, if known
    pub group_id: Option<String>,
}

impl AudioDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>, group_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            group_id,
        }
    }
}

/// Label used when a device reports no description
pub fn fallback_label(device_id: &str) -> String {
    let prefix: String = device_id.chars().take(8).collect();
    format!("Microphone {}", prefix)
}

/// Drop alias devices, keep the first node of each physical device and fill
/// in missing labels
pub fn prepare_device_list(devices: Vec<AudioDevice>) -> Vec<AudioDevice> {
    let mut seen_groups = HashSet::new();

    devices
        .into_iter()
        .filter(|d| !ALIAS_DEVICE_IDS.contains(&d.id.as_str()))
        .filter(|d| match &d.group_id {
            Some(group) => seen_groups.insert(group.clone()),
            None => true,
        })
        .map(|mut d| {
            if d.label.trim().is_empty() {
                d.label = fallback_label(&d.id);
            }
            d
        })
        .collect()
}

/// Check that a PipeWire daemon is reachable
pub fn probe_platform() -> Result<(), CaptureError> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| CaptureError::UnsupportedPlatform(format!("main loop: {}", e)))?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| CaptureError::UnsupportedPlatform(format!("context: {}", e)))?;
    let _core = context
        .connect_rc(None)
        .map_err(|e| CaptureError::UnsupportedPlatform(format!("connect: {}", e)))?;

    debug!("PipeWire daemon reachable");
    Ok(())
}

/// List audio sources known to PipeWire, in registry order
pub fn enumerate_sources() -> Result<Vec<AudioDevice>, CaptureError> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| CaptureError::UnsupportedPlatform(format!("main loop: {}", e)))?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| CaptureError::UnsupportedPlatform(format!("context: {}", e)))?;
    let core = context
        .connect_rc(None)
        .map_err(|e| CaptureError::UnsupportedPlatform(format!("connect: {}", e)))?;
    let registry = core
        .get_registry_rc()
        .map_err(|e| CaptureError::UnsupportedPlatform(format!("registry: {}", e)))?;

    let found: Rc<RefCell<Vec<AudioDevice>>> = Rc::new(RefCell::new(Vec::new()));

    let _registry_listener = registry
        .add_listener_local()
        .global({
            let found = found.clone();
            move |global| {
                if global.type_ != pw::types::ObjectType::Node {
                    return;
                }
                let Some(props) = global.props else { return };
                if props.get("media.class") != Some("Audio/Source") {
                    return;
                }
                let Some(name) = props.get("node.name") else {
                    return;
                };
                let label = props
                    .get("node.description")
                    .or_else(|| props.get("node.nick"))
                    .unwrap_or_default();
                let group = props.get("device.id").map(str::to_string);

                debug!("Found audio source {} ({})", name, label);
                found
                    .borrow_mut()
                    .push(AudioDevice::new(name, label, group));
            }
        })
        .register();

    // Quit once the daemon has answered everything queued before this sync
    let pending = core
        .sync(0)
        .map_err(|e| CaptureError::UnsupportedPlatform(format!("sync: {}", e)))?;
    let mainloop_weak = mainloop.downgrade();
    let _core_listener = core
        .add_listener_local()
        .done(move |id, seq| {
            if id == pw::core::PW_ID_CORE && seq == pending {
                if let Some(mainloop) = mainloop_weak.upgrade() {
                    mainloop.quit();
                }
            }
        })
        .register();

    mainloop.run();

    let devices = prepare_device_list(found.take());
    info!("Enumerated {} audio input device(s)", devices.len());
    Ok(devices)
}

use std::collections::BTreeMap;
use std::sync::Arc;

use pspemu_cpu::GuestMemory;
use pspemu_vfs::Vfs;

use crate::audio::{AudioBackend, SceAudio};
use crate::config::HleConfig;

/// Everything an HLE routine may touch during one emulator session.
#[derive(Debug)]
pub struct HleContext {
    pub config: HleConfig,
    pub memory: GuestMemory,
    pub audio: SceAudio,
    devices: BTreeMap<String, Arc<dyn Vfs>>,
}

impl HleContext {
    pub fn new(config: HleConfig, memory: GuestMemory, audio: Arc<dyn AudioBackend>) -> Self {
        let audio = SceAudio::new(audio, config.audio.default_sample_count);
        Self {
            config,
            memory,
            audio,
            devices: BTreeMap::new(),
        }
    }

    /// Mounts `vfs` under a device name such as `ms0:`. Returns the
    /// previous mount, if any.
    pub fn mount(&mut self, device: &str, vfs: Arc<dyn Vfs>) -> Option<Arc<dyn Vfs>> {
        self.devices.insert(device_key(device), vfs)
    }

    /// Finds the filesystem serving `path` by its device prefix.
    pub fn device_for(&self, path: &str) -> Option<Arc<dyn Vfs>> {
        let (device, _) = path.split_once(':')?;
        self.devices.get(&device_key(device)).cloned()
    }
}

fn device_key(device: &str) -> String {
    device.trim_end_matches(':').to_ascii_lowercase()
}

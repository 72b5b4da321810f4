//! Render endpoint lookup via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list active render endpoints and pick the
//! one whose friendly name contains a given substring.

use windows::core::BSTR;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::{eConsole, eRender, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator, DEVICE_STATE_ACTIVE};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL, STGM_READ};

use loopback_capture_core::models::error::CaptureError;

/// An active render endpoint.
pub struct RenderDevice {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub device: IMMDevice,
}

/// Audio device enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Create a new device enumerator.
    ///
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, CaptureError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| CaptureError::Unknown(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// List active render (output) devices.
    pub fn list_render_devices(&self) -> Result<Vec<RenderDevice>, CaptureError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE)
                .map_err(|e| CaptureError::Unknown(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| CaptureError::Unknown(format!("GetCount failed: {}", e)))?;

            let default_id = self
                .enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .ok()
                .and_then(|d| d.GetId().ok())
                .and_then(|id| id.to_string().ok());

            let mut devices = Vec::new();
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Ok(id) = device.GetId() else {
                    continue;
                };
                let id = id.to_string().unwrap_or_default();
                let name = friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                let is_default = default_id.as_deref() == Some(id.as_str());
                devices.push(RenderDevice {
                    id,
                    name,
                    is_default,
                    device,
                });
            }
            Ok(devices)
        }
    }

    /// First active render device whose friendly name contains `name_substring`.
    pub fn find_render_device(&self, name_substring: &str) -> Result<Option<RenderDevice>, CaptureError> {
        let devices = self.list_render_devices()?;
        log::debug!(
            "Found {} render endpoints, searching for \"{}\"",
            devices.len(),
            name_substring
        );
        for device in &devices {
            log::debug!("  {} [{}]{}", device.name, device.id, if device.is_default { " (default)" } else { "" });
        }
        Ok(devices
            .into_iter()
            .find(|device| name_matches(&device.name, name_substring)))
    }
}

fn name_matches(friendly_name: &str, name_substring: &str) -> bool {
    friendly_name.contains(name_substring)
}

/// Read the PKEY_Device_FriendlyName property from a device.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        // The returned PROPVARIANT clears itself on drop.
        let prop_variant = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = BSTR::try_from(&prop_variant).ok()?.to_string();
        (!name.is_empty()).then_some(name)
    }
}

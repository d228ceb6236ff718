use crate::audio::error::{AudioError, AudioResult};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use serde::{Deserialize, Serialize};

/// Information about an audio input device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Human-readable device name, also the lookup key
    pub name: String,
    /// Maximum number of input channels the device offers
    pub input_channels: u16,
    /// Supported sample rates
    pub sample_rates: Vec<u32>,
    /// Whether this is the host's default input device
    pub is_default: bool,
}

/// Open the first available host audio API
///
/// The returned `Host` is the only handle on the audio subsystem; dropping it
/// releases whatever the backend set up, on success and error paths alike.
fn open_host() -> AudioResult<Host> {
    match cpal::available_hosts().first() {
        Some(id) => Ok(cpal::host_from_id(*id)?),
        None => Ok(cpal::default_host()),
    }
}

/// List all available input devices
///
/// # Returns
/// The input devices of the first available host, in enumeration order.
/// An empty list means the host works but has no inputs attached.
///
/// # Errors
/// Returns `AudioError::BackendUnavailable` if the audio subsystem cannot be
/// initialized or queried.
///
/// # Example
/// ```no_run
/// use radiocast_lib::audio::device::list_input_devices;
///
/// for device in list_input_devices().unwrap() {
///     println!("{}", device.name);
/// }
/// ```
pub fn list_input_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = open_host()?;
    let devices: Vec<Device> = host.input_devices()?.collect();

    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut audio_devices = Vec::with_capacity(devices.len());

    for device in devices {
        // Devices that cannot report a name cannot be selected either
        let Ok(name) = device.name() else {
            continue;
        };

        let is_default = default_name.as_deref() == Some(name.as_str());

        audio_devices.push(AudioDevice {
            input_channels: get_max_input_channels(&device),
            sample_rates: get_supported_sample_rates(&device),
            is_default,
            name,
        });
    }

    Ok(audio_devices)
}

/// Resolve a device by its exact, case-sensitive name
///
/// # Errors
/// Returns `AudioError::DeviceNotFound` if no device carries that name, and
/// propagates `AudioError::BackendUnavailable` from listing.
///
/// # Example
/// ```no_run
/// use radiocast_lib::audio::device::resolve_by_name;
///
/// let device = resolve_by_name("TestMic").unwrap();
/// println!("{} has {} channels", device.name, device.input_channels);
/// ```
pub fn resolve_by_name(name: &str) -> AudioResult<AudioDevice> {
    let devices = list_input_devices()?;
    match_by_name(devices, name, |d| d.name.as_str())
}

/// Find the live cpal handle for the named input device
pub(crate) fn find_input_device(name: &str) -> AudioResult<Device> {
    let host = open_host()?;
    let devices = host
        .input_devices()?
        .filter_map(|device| device.name().ok().map(|n| (n, device)));

    match_by_name(devices, name, |(n, _)| n.as_str()).map(|(_, device)| device)
}

/// Pick the first candidate whose name equals `name` exactly
pub(crate) fn match_by_name<T>(
    candidates: impl IntoIterator<Item = T>,
    name: &str,
    name_of: impl Fn(&T) -> &str,
) -> AudioResult<T> {
    if name.is_empty() {
        return Err(AudioError::DeviceNotFound(String::new()));
    }

    candidates
        .into_iter()
        .find(|candidate| name_of(candidate) == name)
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

/// Largest input channel count across the device's supported configurations
fn get_max_input_channels(device: &Device) -> u16 {
    let from_ranges = device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0);

    if from_ranges > 0 {
        return from_ranges;
    }

    device
        .default_input_config()
        .map(|c| c.channels())
        .unwrap_or(0)
}

/// Get supported sample rates for a device
fn get_supported_sample_rates(device: &Device) -> Vec<u32> {
    let mut rates = Vec::new();

    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            let common_rates = [8000, 16000, 22050, 32000, 44100, 48000, 96000];

            for &rate in &common_rates {
                let sample_rate = cpal::SampleRate(rate);
                if sample_rate >= config.min_sample_rate()
                    && sample_rate <= config.max_sample_rate()
                    && !rates.contains(&rate)
                {
                    rates.push(rate);
                }
            }
        }
    }

    if rates.is_empty() {
        if let Ok(config) = device.default_input_config() {
            rates.push(config.sample_rate().0);
        }
    }

    rates.sort_unstable();
    rates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Vec<AudioDevice> {
        ["Built-in Microphone", "TestMic", "testmic"]
            .into_iter()
            .map(|name| AudioDevice {
                name: name.to_string(),
                input_channels: 2,
                sample_rates: vec![48000],
                is_default: false,
            })
            .collect()
    }

    #[test]
    fn test_match_is_exact_and_case_sensitive() {
        let found = match_by_name(directory(), "TestMic", |d| d.name.as_str()).unwrap();
        assert_eq!(found.name, "TestMic");

        let found = match_by_name(directory(), "testmic", |d| d.name.as_str()).unwrap();
        assert_eq!(found.name, "testmic");

        let result = match_by_name(directory(), "TESTMIC", |d| d.name.as_str());
        assert!(matches!(result, Err(AudioError::DeviceNotFound(n)) if n == "TESTMIC"));
    }

    #[test]
    fn test_match_rejects_partial_names() {
        let result = match_by_name(directory(), "Built-in", |d| d.name.as_str());
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }

    #[test]
    fn test_match_empty_name() {
        let result = match_by_name(directory(), "", |d| d.name.as_str());
        assert!(matches!(result, Err(AudioError::DeviceNotFound(n)) if n.is_empty()));
    }

    #[test]
    fn test_match_empty_directory() {
        let result = match_by_name(Vec::<AudioDevice>::new(), "TestMic", |d| d.name.as_str());
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }

    #[test]
    fn test_list_devices() {
        match list_input_devices() {
            Ok(devices) => {
                for device in &devices {
                    assert!(!device.name.is_empty(), "Device name should not be empty");
                }
                println!("Found {} input devices", devices.len());
            }
            Err(e) => {
                // CI machines often have no audio subsystem at all
                eprintln!("Warning: Could not list devices: {}", e);
            }
        }
    }

    #[test]
    fn test_resolve_unknown_device() {
        let result = resolve_by_name("NonExistentDevice123456789");
        assert!(result.is_err());
        match result {
            Err(AudioError::DeviceNotFound(_)) | Err(AudioError::BackendUnavailable(_)) => {}
            other => panic!("Expected DeviceNotFound, got {:?}", other),
        }
    }
}

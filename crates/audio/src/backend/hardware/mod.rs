//! cpal-Backend fuer echte Audio-Hardware
//!
//! cpal-Streams sind nicht `Send`. Jeder Stream lebt deshalb in einem
//! eigenen Halte-Thread, der das Geraet selbst oeffnet, seine Bereitschaft
//! ueber einen crossbeam-Kanal meldet und bis zum Stopp-Signal blockiert.

mod capture;
mod playback;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use std::time::Duration;
use tracing::{debug, warn};

use super::{AudioBackend, CaptureCallback, InputStream, OutputStream};
use crate::config::AudioConfig;
use crate::device::DeviceInfo;
use crate::error::{AudioError, AudioResult};

/// Wartezeit auf den Halte-Thread beim Oeffnen eines Streams
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Richtung eines Geraets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

/// Audio-Hardware ueber den cpal-Standard-Host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn input_devices(&self) -> AudioResult<Vec<DeviceInfo>> {
        list_devices(Direction::Input)
    }

    fn output_devices(&self) -> AudioResult<Vec<DeviceInfo>> {
        list_devices(Direction::Output)
    }

    fn open_input(
        &self,
        device: &DeviceInfo,
        config: &AudioConfig,
        callback: CaptureCallback,
    ) -> AudioResult<Box<dyn InputStream>> {
        let stream = capture::open(device.index, *config, callback)?;
        Ok(Box::new(stream))
    }

    fn open_output(&self, device: &DeviceInfo, config: &AudioConfig) -> AudioResult<Box<dyn OutputStream>> {
        let stream = playback::open(device.index, *config)?;
        Ok(Box::new(stream))
    }
}

fn devices_of(host: &Host, direction: Direction) -> AudioResult<Vec<Device>> {
    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    Ok(devices.collect())
}

/// Listet alle Geraete einer Richtung auf
fn list_devices(direction: Direction) -> AudioResult<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
    .and_then(|d| d.name().ok());

    let mut result = Vec::new();
    for (index, device) in devices_of(&host, direction)?.iter().enumerate() {
        match describe(index, device, direction, default_name.as_deref()) {
            Ok(info) => result.push(info),
            Err(e) => warn!("Geraet {} konnte nicht gelesen werden: {}", index, e),
        }
    }
    debug!(richtung = ?direction, anzahl = result.len(), "Geraete aufgelistet");
    Ok(result)
}

/// Sucht ein Geraet anhand seines Listen-Index
pub(crate) fn find_device(direction: Direction, index: usize) -> AudioResult<Device> {
    let host = cpal::default_host();
    devices_of(&host, direction)?
        .into_iter()
        .nth(index)
        .ok_or_else(|| AudioError::GeraetNichtGefunden(format!("{:?} Index {}", direction, index)))
}

// Hilfsfunktion: cpal Device -> DeviceInfo
fn describe(
    index: usize,
    device: &Device,
    direction: Direction,
    default_name: Option<&str>,
) -> AudioResult<DeviceInfo> {
    let name = device
        .name()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let (max_channels, default_sample_rate) = match direction {
        Direction::Input => {
            let max = device
                .supported_input_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(1))
                .unwrap_or(1);
            let rate = device.default_input_config().map(|c| c.sample_rate().0).unwrap_or(0);
            (max, rate)
        }
        Direction::Output => {
            let max = device
                .supported_output_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(1))
                .unwrap_or(1);
            let rate = device.default_output_config().map(|c| c.sample_rate().0).unwrap_or(0);
            (max, rate)
        }
    };

    Ok(DeviceInfo {
        index,
        is_default: default_name == Some(name.as_str()),
        name,
        max_channels,
        default_sample_rate,
    })
}

fn stream_config(config: &AudioConfig) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

//! Geraete-Beschreibung und -Auswahl
//!
//! Auswahlreihenfolge: fester Index aus der Konfiguration, dann das erste
//! Geraet mit "USB" oder "MODEM" im Namen, dann das Standardgeraet, dann
//! das erste Geraet ueberhaupt.

use serde::Serialize;
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Namensbestandteile, die auf ein Modem hindeuten (Grossschreibung)
pub const PREFERRED_NAME_HINTS: [&str; 2] = ["USB", "MODEM"];

/// Repraesentiert ein Audio-Geraet mit seinen Eigenschaften
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Index in der Liste des Backends
    pub index: usize,
    /// Anzeigename des Geraets
    pub name: String,
    /// Maximale Kanalanzahl
    pub max_channels: u16,
    /// Bevorzugte Abtastrate des Geraets
    pub default_sample_rate: u32,
    /// Standardgeraet des Hosts
    pub is_default: bool,
}

impl DeviceInfo {
    /// Ob der Name auf ein Modem- oder USB-Geraet hindeutet
    pub fn looks_like_modem(&self) -> bool {
        let upper = self.name.to_uppercase();
        PREFERRED_NAME_HINTS.iter().any(|hint| upper.contains(hint))
    }
}

/// Waehlt ein Geraet aus der Liste
pub fn select_device(devices: &[DeviceInfo], requested: Option<usize>) -> AudioResult<DeviceInfo> {
    if devices.is_empty() {
        return Err(AudioError::GeraetNichtGefunden(
            "keine Geraete verfuegbar".to_string(),
        ));
    }

    if let Some(index) = requested {
        return devices
            .iter()
            .find(|d| d.index == index)
            .cloned()
            .ok_or_else(|| AudioError::GeraetNichtGefunden(format!("Index {}", index)));
    }

    let chosen = devices
        .iter()
        .find(|d| d.looks_like_modem())
        .or_else(|| devices.iter().find(|d| d.is_default))
        .unwrap_or(&devices[0]);

    debug!(index = chosen.index, name = %chosen.name, "Geraet ausgewaehlt");
    Ok(chosen.clone())
}

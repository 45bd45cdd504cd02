//! Sitzungs-Konfiguration: Abtastrate, Kanaele, Chunk-Groesse, Sample-Format
//!
//! Wird einmal beim Erstellen des `AudioInterface` festgelegt und danach
//! nicht mehr veraendert.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AudioError, AudioResult};

/// Sample-Format an der Geraetegrenze
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 16 Bit Integer PCM
    #[default]
    Pcm16,
    /// 24 Bit Integer PCM (3 Bytes, little-endian)
    Pcm24,
    /// 32 Bit Integer PCM
    Pcm32,
    /// 32 Bit IEEE Float
    Float32,
}

impl SampleFormat {
    /// Bytes pro Sample (ein Kanal)
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Pcm16 => 2,
            Self::Pcm24 => 3,
            Self::Pcm32 | Self::Float32 => 4,
        }
    }
}

/// Unveraenderliche Audio-Konfiguration einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Abtastrate in Hz (z.B. 8000, 16000, 44100)
    pub sample_rate: u32,
    /// Kanalanzahl (1 = Mono, 2 = Stereo)
    pub channels: u16,
    /// Frames pro Chunk
    pub chunk_size: usize,
    /// Sample-Format an der Geraetegrenze
    pub format: SampleFormat,
    /// Fester Geraete-Index (None = automatische Auswahl)
    pub device_index: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 512,
            format: SampleFormat::Pcm16,
            device_index: None,
        }
    }
}

impl AudioConfig {
    /// Prueft die Konfiguration auf offensichtlich unbrauchbare Werte
    pub fn validate(&self) -> AudioResult<()> {
        if self.sample_rate == 0 {
            return Err(AudioError::Konfiguration(
                "Abtastrate muss > 0 sein".to_string(),
            ));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(AudioError::Konfiguration(format!(
                "Kanalanzahl muss 1 oder 2 sein, ist {}",
                self.channels
            )));
        }
        if self.chunk_size == 0 {
            return Err(AudioError::Konfiguration(
                "Chunk-Groesse muss > 0 sein".to_string(),
            ));
        }
        Ok(())
    }

    /// Bytes pro Frame (alle Kanaele)
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Bytes eines vollstaendigen Chunks
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_size * self.bytes_per_frame()
    }

    /// Dauer eines Chunks
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_size as f64 / self.sample_rate as f64)
    }
}

/// Schalter fuer die optionalen DSP-Stufen
///
/// Hoch- und Tiefpass sowie die Qualitaetsmetriken laufen immer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub echo_cancellation: bool,
    pub noise_reduction: bool,
    pub gain_control: bool,
    pub voice_activity: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self::all()
    }
}

impl ProcessingOptions {
    /// Alle optionalen Stufen aktiv
    pub fn all() -> Self {
        Self {
            echo_cancellation: true,
            noise_reduction: true,
            gain_control: true,
            voice_activity: true,
        }
    }

    /// Keine Verarbeitung – der Capture-Pfad reicht Rohdaten durch
    pub fn none() -> Self {
        Self {
            echo_cancellation: false,
            noise_reduction: false,
            gain_control: false,
            voice_activity: false,
        }
    }

    /// Ob mindestens eine Stufe aktiv ist
    pub fn any(&self) -> bool {
        self.echo_cancellation || self.noise_reduction || self.gain_control || self.voice_activity
    }
}

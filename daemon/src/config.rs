//! Daemon-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Daemon ohne Konfigurationsdatei
//! lauffaehig ist.

use modemvoice_audio::{AudioConfig, InterfaceConfig, ProcessingOptions, ProcessorConfig};
use serde::{Deserialize, Serialize};

/// Vollstaendige Daemon-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Format der Audio-Streams
    pub audio: AudioConfig,
    /// Welche optionalen DSP-Stufen laufen
    pub verarbeitung: ProcessingOptions,
    /// Parameter der DSP-Stufen
    pub dsp: ProcessorConfig,
    /// Frame-Puffer und Zeitlimits
    pub puffer: PufferEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Ablauf der Sitzung
    pub sitzung: SitzungEinstellungen,
}

/// Frame-Puffer und Zeitlimits des Interfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PufferEinstellungen {
    /// Maximale Anzahl gepufferter Buffer
    pub max_buffer_size: usize,
    /// Zeitlimit fuer den Geraetetest in Millisekunden
    pub device_timeout_ms: u64,
    /// Zeitlimit beim Stoppen der Wiedergabe in Millisekunden
    pub playback_join_timeout_ms: u64,
}

impl Default for PufferEinstellungen {
    fn default() -> Self {
        let standard = InterfaceConfig::default();
        Self {
            max_buffer_size: standard.max_buffer_size,
            device_timeout_ms: standard.device_timeout_ms,
            playback_join_timeout_ms: standard.playback_join_timeout_ms,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder EnvFilter-Ausdruck
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Ablauf einer Aufnahme-Sitzung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SitzungEinstellungen {
    /// Dauer in Sekunden (leer = bis Ctrl-C)
    pub dauer_sekunden: Option<u64>,
    /// Ziel fuer den WAV-Export des Puffers beim Beenden (leer = kein Export)
    pub aufnahme_datei: Option<String>,
    /// WAV-Datei, die zu Beginn abgespielt wird (optional)
    pub ansage_datei: Option<String>,
    /// Abstand der Status-Ausgaben in Millisekunden
    pub status_intervall_ms: u64,
    /// Simulierte Leitung statt Audio-Hardware
    pub simulierte_leitung: bool,
}

impl Default for SitzungEinstellungen {
    fn default() -> Self {
        Self {
            dauer_sekunden: None,
            aufnahme_datei: Some("aufnahme.wav".into()),
            ansage_datei: None,
            status_intervall_ms: 5000,
            simulierte_leitung: !cfg!(feature = "hardware"),
        }
    }
}

impl DaemonConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Baut die Konfiguration fuer das AudioInterface
    pub fn interface_config(&self) -> InterfaceConfig {
        InterfaceConfig {
            audio: self.audio,
            options: self.verarbeitung,
            processor: self.dsp.clone(),
            max_buffer_size: self.puffer.max_buffer_size,
            device_timeout_ms: self.puffer.device_timeout_ms,
            playback_join_timeout_ms: self.puffer.playback_join_timeout_ms,
        }
    }
}

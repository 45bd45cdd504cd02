//! modemvoice-audio – Audio-Kern fuer Modem-Sprachverbindungen
//!
//! - Geraeteauswahl mit Vorrang fuer USB-/Modem-Geraete
//! - Capture und Playback ueber austauschbare Backends (cpal oder Loopback)
//! - DSP-Kette: Hochpass, Echo-Unterdrueckung, Spectral Subtraction, AGC,
//!   VAD, Tiefpass, Qualitaetsmetriken
//! - Begrenzter Frame-Puffer, Statistiken und WAV-Export

pub mod backend;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod device;
pub mod dsp;
pub mod error;
pub mod interface;
pub mod processor;
pub mod ring;
pub mod state;

// Bequeme Re-Exporte der wichtigsten Typen
pub use backend::{
    AudioBackend, CaptureCallback, InputStream, LoopbackBackend, OutputStream, StreamControl,
};
#[cfg(feature = "hardware")]
pub use backend::CpalBackend;
pub use buffer::AudioBuffer;
pub use codec::{decode_pcm, downmix_to_mono, encode_pcm};
pub use config::{AudioConfig, ProcessingOptions, SampleFormat};
pub use device::{select_device, DeviceInfo};
pub use error::{AudioError, AudioResult};
pub use interface::{AudioConsumer, AudioInterface, InterfaceConfig};
pub use processor::{AudioProcessor, ProcessedFrame, ProcessingReport, ProcessorConfig, StageOutcome};
pub use ring::FrameRing;
pub use state::{AudioState, AudioStatus, StatisticsSnapshot};

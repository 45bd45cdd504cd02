//! Geraete-Backends
//!
//! Das `AudioInterface` spricht Hardware nur ueber `AudioBackend` an.
//! `LoopbackBackend` haelt alles im Speicher, `CpalBackend` (Feature
//! `hardware`) nutzt cpal.

pub mod loopback;

#[cfg(feature = "hardware")]
pub mod hardware;

use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::debug;

use crate::config::AudioConfig;
use crate::device::DeviceInfo;
use crate::error::{AudioError, AudioResult};

pub use loopback::LoopbackBackend;

#[cfg(feature = "hardware")]
pub use hardware::CpalBackend;

/// Rueckgabe des Capture-Callbacks an die Plattform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Abort,
}

/// Wird pro Chunk mit den rohen PCM-Bytes aufgerufen
///
/// Aufrufe fuer einen Stream sind serialisiert.
pub type CaptureCallback = Box<dyn FnMut(&[u8]) -> StreamControl + Send>;

/// Laufender Aufnahme-Stream
pub trait InputStream: Send {
    /// Stoppt den Stream; danach kommen keine Callbacks mehr
    fn stop(&mut self) -> AudioResult<()>;
}

/// Laufender Wiedergabe-Stream
pub trait OutputStream: Send {
    /// Schreibt einen Chunk, blockiert bis das Geraet ihn angenommen hat
    fn write(&mut self, chunk: &[u8]) -> AudioResult<()>;

    /// Laesst den Puffer auslaufen und gibt das Geraet frei
    fn close(&mut self) -> AudioResult<()>;

    /// Underruns seit dem letzten Aufruf
    fn take_underruns(&mut self) -> u64 {
        0
    }
}

/// Zugriff auf Audio-Geraete einer Plattform
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn input_devices(&self) -> AudioResult<Vec<DeviceInfo>>;

    fn output_devices(&self) -> AudioResult<Vec<DeviceInfo>>;

    /// Oeffnet einen Aufnahme-Stream; Chunks haben genau `chunk_size` Frames
    fn open_input(
        &self,
        device: &DeviceInfo,
        config: &AudioConfig,
        callback: CaptureCallback,
    ) -> AudioResult<Box<dyn InputStream>>;

    fn open_output(&self, device: &DeviceInfo, config: &AudioConfig) -> AudioResult<Box<dyn OutputStream>>;

    /// Kurzer Funktionstest: einen Chunk aufnehmen, einen Chunk Stille spielen
    fn self_test(
        &self,
        input: &DeviceInfo,
        output: &DeviceInfo,
        config: &AudioConfig,
        timeout: Duration,
    ) -> AudioResult<()> {
        let (tx, rx) = bounded::<usize>(1);
        let callback: CaptureCallback = Box::new(move |bytes: &[u8]| {
            let _ = tx.try_send(bytes.len());
            StreamControl::Continue
        });

        let mut stream = self.open_input(input, config, callback)?;
        let received = rx.recv_timeout(timeout);
        stream.stop()?;
        let bytes = received.map_err(|_| {
            AudioError::Zeitlimit(format!("kein Chunk von '{}' innerhalb {:?}", input.name, timeout))
        })?;

        let mut output_stream = self.open_output(output, config)?;
        output_stream.write(&vec![0u8; config.chunk_bytes()])?;
        output_stream.close()?;

        debug!(bytes, eingang = %input.name, ausgang = %output.name, "Geraetetest bestanden");
        Ok(())
    }
}

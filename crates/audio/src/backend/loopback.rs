//! In-Memory-Backend ohne Hardware
//!
//! Capture-Chunks werden per `inject` synchron an den aktiven Callback
//! uebergeben, so wie es der Plattform-Thread tun wuerde. Wiedergegebene
//! Bytes werden mitgeschrieben. Fehler lassen sich gezielt ausloesen.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{AudioBackend, CaptureCallback, InputStream, OutputStream, StreamControl};
use crate::config::AudioConfig;
use crate::device::DeviceInfo;
use crate::error::{AudioError, AudioResult};

struct ActiveCapture {
    generation: u64,
    callback: CaptureCallback,
}

struct Inner {
    inputs: Vec<DeviceInfo>,
    outputs: Vec<DeviceInfo>,
    capture: Mutex<Option<ActiveCapture>>,
    generation: AtomicU64,
    inputs_opened: AtomicUsize,
    played: Mutex<Vec<u8>>,
    chunks_written: AtomicUsize,
    write_delay: Mutex<Duration>,
    pending_underruns: AtomicU64,
    fail_self_test: AtomicBool,
    fail_writes: AtomicBool,
}

/// Geraete im Speicher; Klone teilen sich denselben Zustand
#[derive(Clone)]
pub struct LoopbackBackend {
    inner: Arc<Inner>,
}

impl LoopbackBackend {
    /// Ein Ein- und ein Ausgabegeraet namens "Loopback"
    pub fn new() -> Self {
        let device = DeviceInfo {
            index: 0,
            name: "Loopback".to_string(),
            max_channels: 2,
            default_sample_rate: 16000,
            is_default: true,
        };
        Self::with_devices(vec![device.clone()], vec![device])
    }

    /// Backend mit vorgegebenen Geraetelisten
    pub fn with_devices(inputs: Vec<DeviceInfo>, outputs: Vec<DeviceInfo>) -> Self {
        Self {
            inner: Arc::new(Inner {
                inputs,
                outputs,
                capture: Mutex::new(None),
                generation: AtomicU64::new(0),
                inputs_opened: AtomicUsize::new(0),
                played: Mutex::new(Vec::new()),
                chunks_written: AtomicUsize::new(0),
                write_delay: Mutex::new(Duration::ZERO),
                pending_underruns: AtomicU64::new(0),
                fail_self_test: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }),
        }
    }

    /// Liefert einen Chunk an den aktiven Capture-Callback
    ///
    /// Gibt `false` zurueck, wenn keine Aufnahme laeuft oder der Callback
    /// den Stream abgebrochen hat.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        let mut guard = self.inner.capture.lock();
        let Some(active) = guard.as_mut() else {
            return false;
        };
        match (active.callback)(bytes) {
            StreamControl::Continue => true,
            StreamControl::Abort => {
                debug!(generation = active.generation, "Loopback-Capture vom Callback abgebrochen");
                *guard = None;
                false
            }
        }
    }

    /// Ob gerade ein Capture-Callback registriert ist
    pub fn is_capturing(&self) -> bool {
        self.inner.capture.lock().is_some()
    }

    /// Wie oft ein Aufnahme-Stream geoeffnet wurde
    pub fn inputs_opened(&self) -> usize {
        self.inner.inputs_opened.load(Ordering::SeqCst)
    }

    /// Alle bisher wiedergegebenen Bytes
    pub fn played_bytes(&self) -> Vec<u8> {
        self.inner.played.lock().clone()
    }

    pub fn chunks_written(&self) -> usize {
        self.inner.chunks_written.load(Ordering::SeqCst)
    }

    /// Verzoegerung pro geschriebenem Chunk
    pub fn set_write_delay(&self, delay: Duration) {
        *self.inner.write_delay.lock() = delay;
    }

    /// Meldet beim naechsten `take_underruns` zusaetzliche Underruns
    pub fn add_underruns(&self, count: u64) {
        self.inner.pending_underruns.fetch_add(count, Ordering::SeqCst);
    }

    pub fn fail_self_test(&self, fail: bool) {
        self.inner.fail_self_test.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for LoopbackBackend {
    fn name(&self) -> &str {
        "loopback"
    }

    fn input_devices(&self) -> AudioResult<Vec<DeviceInfo>> {
        Ok(self.inner.inputs.clone())
    }

    fn output_devices(&self) -> AudioResult<Vec<DeviceInfo>> {
        Ok(self.inner.outputs.clone())
    }

    fn self_test(
        &self,
        input: &DeviceInfo,
        _output: &DeviceInfo,
        _config: &AudioConfig,
        _timeout: Duration,
    ) -> AudioResult<()> {
        if self.inner.fail_self_test.load(Ordering::SeqCst) {
            return Err(AudioError::StreamFehler(format!(
                "Geraetetest fuer '{}' fehlgeschlagen",
                input.name
            )));
        }
        Ok(())
    }

    fn open_input(
        &self,
        device: &DeviceInfo,
        _config: &AudioConfig,
        callback: CaptureCallback,
    ) -> AudioResult<Box<dyn InputStream>> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.capture.lock() = Some(ActiveCapture {
            generation,
            callback,
        });
        self.inner.inputs_opened.fetch_add(1, Ordering::SeqCst);
        debug!(geraet = %device.name, generation, "Loopback-Capture geoeffnet");

        Ok(Box::new(LoopbackInput {
            inner: Arc::clone(&self.inner),
            generation,
        }))
    }

    fn open_output(&self, device: &DeviceInfo, _config: &AudioConfig) -> AudioResult<Box<dyn OutputStream>> {
        debug!(geraet = %device.name, "Loopback-Wiedergabe geoeffnet");
        Ok(Box::new(LoopbackOutput {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct LoopbackInput {
    inner: Arc<Inner>,
    generation: u64,
}

impl InputStream for LoopbackInput {
    fn stop(&mut self) -> AudioResult<()> {
        let mut guard = self.inner.capture.lock();
        // Nur den eigenen Callback entfernen, nicht den eines neueren Streams
        if guard.as_ref().map(|a| a.generation) == Some(self.generation) {
            *guard = None;
        }
        Ok(())
    }
}

struct LoopbackOutput {
    inner: Arc<Inner>,
}

impl OutputStream for LoopbackOutput {
    fn write(&mut self, chunk: &[u8]) -> AudioResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(AudioError::StreamFehler(
                "Loopback-Schreibfehler".to_string(),
            ));
        }
        let delay = *self.inner.write_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.inner.played.lock().extend_from_slice(chunk);
        self.inner.chunks_written.fetch_add(1, Ordering::SeqCst);
        trace!(bytes = chunk.len(), "Loopback-Chunk geschrieben");
        Ok(())
    }

    fn close(&mut self) -> AudioResult<()> {
        Ok(())
    }

    fn take_underruns(&mut self) -> u64 {
        self.inner.pending_underruns.swap(0, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_ohne_aufnahme() {
        let backend = LoopbackBackend::new();
        assert!(!backend.inject(&[0, 0]));
        assert!(!backend.is_capturing());
    }

    #[test]
    fn inject_ruft_callback() {
        let backend = LoopbackBackend::new();
        let gezaehlt = Arc::new(AtomicUsize::new(0));
        let zaehler = Arc::clone(&gezaehlt);
        let device = backend.input_devices().unwrap().remove(0);

        let mut stream = backend
            .open_input(
                &device,
                &AudioConfig::default(),
                Box::new(move |bytes: &[u8]| {
                    zaehler.fetch_add(bytes.len(), Ordering::SeqCst);
                    StreamControl::Continue
                }),
            )
            .unwrap();

        assert!(backend.inject(&[1, 2, 3, 4]));
        assert_eq!(gezaehlt.load(Ordering::SeqCst), 4);

        stream.stop().unwrap();
        assert!(!backend.inject(&[1, 2]));
        assert_eq!(backend.inputs_opened(), 1);
    }

    #[test]
    fn abort_beendet_stream() {
        let backend = LoopbackBackend::new();
        let device = backend.input_devices().unwrap().remove(0);
        let _stream = backend
            .open_input(&device, &AudioConfig::default(), Box::new(|_: &[u8]| StreamControl::Abort))
            .unwrap();
        assert!(!backend.inject(&[0, 0]));
        assert!(!backend.is_capturing());
    }

    #[test]
    fn alter_stream_stoppt_neuen_nicht() {
        let backend = LoopbackBackend::new();
        let device = backend.input_devices().unwrap().remove(0);
        let config = AudioConfig::default();
        let mut alt = backend
            .open_input(&device, &config, Box::new(|_: &[u8]| StreamControl::Continue))
            .unwrap();
        let _neu = backend
            .open_input(&device, &config, Box::new(|_: &[u8]| StreamControl::Continue))
            .unwrap();
        alt.stop().unwrap();
        assert!(backend.is_capturing());
    }

    #[test]
    fn wiedergabe_wird_mitgeschrieben() {
        let backend = LoopbackBackend::new();
        let device = backend.output_devices().unwrap().remove(0);
        let mut out = backend.open_output(&device, &AudioConfig::default()).unwrap();
        out.write(&[1, 2]).unwrap();
        out.write(&[3, 4]).unwrap();
        backend.add_underruns(2);
        assert_eq!(out.take_underruns(), 2);
        assert_eq!(out.take_underruns(), 0);
        out.close().unwrap();
        assert_eq!(backend.played_bytes(), vec![1, 2, 3, 4]);
        assert_eq!(backend.chunks_written(), 2);

        backend.fail_writes(true);
        assert!(out.write(&[5]).is_err());
    }

    #[test]
    fn selbsttest_fehler_einstellbar() {
        let backend = LoopbackBackend::new();
        let device = backend.input_devices().unwrap().remove(0);
        let config = AudioConfig::default();
        let timeout = Duration::from_millis(10);
        assert!(backend.self_test(&device, &device, &config, timeout).is_ok());
        backend.fail_self_test(true);
        assert!(backend.self_test(&device, &device, &config, timeout).is_err());
    }
}

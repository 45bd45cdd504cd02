//! AudioInterface: Geraete, Aufnahme, Wiedergabe, Puffer und Statistik
//!
//! Der Capture-Pfad laeuft im Callback des Backends (fremder Thread). Der
//! Wiedergabe-Pfad laeuft in genau einem eigenen Thread pro Wiedergabe.
//! Alles, was beide Pfade und der Aufrufer teilen, liegt in `Shared`.
//!
//! Oeffentliche Lebenszyklus-Methoden geben `bool` zurueck und loggen den
//! Fehler; die `try_*`-Varianten liefern das `AudioResult`.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backend::{AudioBackend, CaptureCallback, InputStream, OutputStream, StreamControl};
use crate::buffer::AudioBuffer;
use crate::codec::{decode_pcm, downmix_to_mono};
use crate::config::{AudioConfig, ProcessingOptions};
use crate::device::{select_device, DeviceInfo};
use crate::error::{AudioError, AudioResult};
use crate::processor::{AudioProcessor, ProcessorConfig};
use crate::ring::FrameRing;
use crate::state::{AudioState, AudioStatus, Statistics, StatisticsSnapshot};

/// Empfaenger fuer verarbeitete Buffer, aufgerufen im Capture-Thread
pub type AudioConsumer = Box<dyn FnMut(&AudioBuffer) + Send>;

/// Konfiguration des Interfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    pub audio: AudioConfig,
    pub options: ProcessingOptions,
    pub processor: ProcessorConfig,
    /// Kapazitaet des Frame-Rings
    pub max_buffer_size: usize,
    /// Zeitlimit fuer den Geraetetest in `initialize`
    pub device_timeout_ms: u64,
    /// Zeitlimit beim Warten auf das Ende des Wiedergabe-Threads
    pub playback_join_timeout_ms: u64,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            options: ProcessingOptions::default(),
            processor: ProcessorConfig::default(),
            max_buffer_size: 100,
            device_timeout_ms: 3000,
            playback_join_timeout_ms: 5000,
        }
    }
}

impl InterfaceConfig {
    pub fn validate(&self) -> AudioResult<()> {
        self.audio.validate()?;
        self.processor.validate()?;
        if self.max_buffer_size == 0 {
            return Err(AudioError::Konfiguration(
                "max_buffer_size muss > 0 sein".to_string(),
            ));
        }
        Ok(())
    }
}

/// Zustand, den Aufrufer, Capture-Callback und Wiedergabe-Thread teilen
struct Shared {
    config: InterfaceConfig,
    state: RwLock<AudioState>,
    stats: Statistics,
    ring: Mutex<FrameRing>,
    processor: Mutex<Option<AudioProcessor>>,
    consumer: Mutex<Option<AudioConsumer>>,
    recording: AtomicBool,
    playing: AtomicBool,
    stop_recording: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: AudioState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(von = ?*current, nach = ?state, "Zustandswechsel");
            *current = state;
        }
    }

    /// Wechselt nur, wenn der aktuelle Zustand `from` ist
    fn transition(&self, from: AudioState, to: AudioState) {
        let mut current = self.state.write();
        if *current == from {
            *current = to;
        }
    }

    /// Verarbeitet einen rohen Capture-Chunk
    fn handle_chunk(&self, bytes: &[u8]) -> AudioResult<StreamControl> {
        if self.stop_recording.load(Ordering::SeqCst) {
            return Ok(StreamControl::Abort);
        }

        let audio = &self.config.audio;
        let channels = audio.channels.max(1);
        let raw = decode_pcm(bytes, audio.format)?;
        if raw.len() % channels as usize != 0 {
            return Err(AudioError::FormatFehler(format!(
                "{} Samples passen nicht zu {} Kanaelen",
                raw.len(),
                channels
            )));
        }

        let options = self.config.options;
        let buffer = if options.any() {
            let mono = downmix_to_mono(&raw, channels);
            self.transition(AudioState::Recording, AudioState::Processing);
            let processed = {
                let mut guard = self.processor.lock();
                let processor = guard.as_mut().ok_or(AudioError::NichtInitialisiert);
                processor.map(|p| p.process_audio(&mono, options))
            };
            self.transition(AudioState::Processing, AudioState::Recording);
            let processed = processed?;
            AudioBuffer::new(processed.samples, audio.sample_rate, 1).with_report(processed.report)
        } else {
            AudioBuffer::new(raw, audio.sample_rate, channels)
        };
        let frames = buffer.frames() as u64;

        if let Some(evicted) = self.ring.lock().push(buffer.clone()) {
            self.stats.add_overrun();
            debug!(zeitstempel = %evicted.timestamp(), "Aeltester Buffer verdraengt");
        }

        if let Some(consumer) = self.consumer.lock().as_mut() {
            if catch_unwind(AssertUnwindSafe(|| consumer(&buffer))).is_err() {
                error!("Consumer-Callback ist abgestuerzt, Chunk bleibt gezaehlt");
            }
        }

        self.stats.add_recorded(frames);
        Ok(StreamControl::Continue)
    }
}

/// Laufende Wiedergabe
struct PlaybackHandle {
    stop: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Setzt Flags und Zustand, auch wenn der Wiedergabe-Thread abstuerzt
struct PlaybackGuard {
    shared: Arc<Shared>,
    done_tx: Sender<()>,
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        self.shared.playing.store(false, Ordering::SeqCst);
        let next = if self.shared.recording.load(Ordering::SeqCst) {
            AudioState::Recording
        } else {
            AudioState::Idle
        };
        self.shared.transition(AudioState::Playing, next);
        let _ = self.done_tx.try_send(());
    }
}

/// Geraete- und Sitzungsverwaltung fuer Modem-Sprachaudio
pub struct AudioInterface {
    shared: Arc<Shared>,
    backend: Arc<dyn AudioBackend>,
    input_device: Option<DeviceInfo>,
    output_device: Option<DeviceInfo>,
    initialized: bool,
    input_stream: Option<Box<dyn InputStream>>,
    playback: Option<PlaybackHandle>,
}

impl AudioInterface {
    pub fn new(config: InterfaceConfig, backend: Arc<dyn AudioBackend>) -> Self {
        let ring = FrameRing::new(config.max_buffer_size);
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(AudioState::Idle),
                stats: Statistics::default(),
                ring: Mutex::new(ring),
                processor: Mutex::new(None),
                consumer: Mutex::new(None),
                recording: AtomicBool::new(false),
                playing: AtomicBool::new(false),
                stop_recording: AtomicBool::new(false),
            }),
            backend,
            input_device: None,
            output_device: None,
            initialized: false,
            input_stream: None,
            playback: None,
        }
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.shared.config
    }

    pub fn state(&self) -> AudioState {
        *self.shared.state.read()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_recording(&self) -> bool {
        self.input_stream.is_some() && self.shared.recording.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    pub fn input_device(&self) -> Option<&DeviceInfo> {
        self.input_device.as_ref()
    }

    pub fn output_device(&self) -> Option<&DeviceInfo> {
        self.output_device.as_ref()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.shared.stats.snapshot(self.shared.config.audio.sample_rate)
    }

    // --- Initialisierung ---

    /// Geraete suchen, testen und den Prozessor anlegen
    pub fn initialize(&mut self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                error!("Initialisierung fehlgeschlagen: {}", e);
                self.initialized = false;
                *self.shared.processor.lock() = None;
                self.shared.set_state(AudioState::Error);
                false
            }
        }
    }

    pub fn try_initialize(&mut self) -> AudioResult<()> {
        self.stop_recording();
        self.stop_playback();

        let config = &self.shared.config;
        config.validate()?;
        let audio = config.audio;

        let inputs = self.backend.input_devices()?;
        let outputs = self.backend.output_devices()?;
        let input = select_device(&inputs, audio.device_index)?;
        let output = select_device(&outputs, audio.device_index)?;

        self.backend.self_test(
            &input,
            &output,
            &audio,
            Duration::from_millis(config.device_timeout_ms),
        )?;

        let processor = AudioProcessor::new(audio.sample_rate, config.processor.clone())?;
        *self.shared.processor.lock() = Some(processor);

        self.shared.stats.reset();
        self.shared.ring.lock().clear();

        info!(
            backend = self.backend.name(),
            eingang = %input.name,
            ausgang = %output.name,
            sample_rate = audio.sample_rate,
            channels = audio.channels,
            chunk_size = audio.chunk_size,
            "AudioInterface initialisiert"
        );

        self.input_device = Some(input);
        self.output_device = Some(output);
        self.initialized = true;
        self.shared.set_state(AudioState::Idle);
        Ok(())
    }

    // --- Aufnahme ---

    /// Startet die Aufnahme; ist sie schon aktiv, passiert nichts
    pub fn start_recording(&mut self, consumer: Option<AudioConsumer>) -> bool {
        match self.try_start_recording(consumer) {
            Ok(()) => true,
            Err(e) => {
                error!("Aufnahme konnte nicht gestartet werden: {}", e);
                false
            }
        }
    }

    pub fn try_start_recording(&mut self, consumer: Option<AudioConsumer>) -> AudioResult<()> {
        if self.is_recording() {
            debug!("Aufnahme laeuft bereits");
            return Ok(());
        }
        if !self.initialized {
            return Err(AudioError::NichtInitialisiert);
        }
        if self.state() == AudioState::Error {
            return Err(AudioError::StreamFehler(
                "Interface im Fehlerzustand, cleanup() und initialize() noetig".to_string(),
            ));
        }
        let device = self.input_device.clone().ok_or(AudioError::NichtInitialisiert)?;

        // Reste eines abgebrochenen Streams aufraeumen
        if let Some(mut old) = self.input_stream.take() {
            let _ = old.stop();
        }

        *self.shared.consumer.lock() = consumer;
        self.shared.stop_recording.store(false, Ordering::SeqCst);
        self.shared.recording.store(true, Ordering::SeqCst);

        let callback = capture_callback(Arc::clone(&self.shared));
        match self.backend.open_input(&device, &self.shared.config.audio, callback) {
            Ok(stream) => self.input_stream = Some(stream),
            Err(e) => {
                self.shared.recording.store(false, Ordering::SeqCst);
                self.shared.consumer.lock().take();
                self.shared.set_state(AudioState::Error);
                return Err(e);
            }
        }

        if self.state() != AudioState::Playing {
            self.shared.set_state(AudioState::Recording);
        }
        info!(geraet = %device.name, "Aufnahme gestartet");
        Ok(())
    }

    /// Stoppt die Aufnahme; ohne laufende Aufnahme ein No-op
    pub fn stop_recording(&mut self) -> bool {
        match self.try_stop_recording() {
            Ok(()) => true,
            Err(e) => {
                error!("Aufnahme konnte nicht gestoppt werden: {}", e);
                false
            }
        }
    }

    pub fn try_stop_recording(&mut self) -> AudioResult<()> {
        let Some(mut stream) = self.input_stream.take() else {
            return Ok(());
        };

        self.shared.stop_recording.store(true, Ordering::SeqCst);
        let result = stream.stop();
        self.shared.recording.store(false, Ordering::SeqCst);
        self.shared.consumer.lock().take();

        self.shared.transition(AudioState::Recording, AudioState::Idle);
        self.shared.transition(AudioState::Processing, AudioState::Idle);
        info!("Aufnahme gestoppt");
        result
    }

    // --- Wiedergabe ---

    /// Spielt rohe PCM-Bytes im konfigurierten Format ab
    ///
    /// Schlaegt fehl, wenn bereits eine Wiedergabe laeuft.
    pub fn start_playback(&mut self, audio: &[u8]) -> bool {
        match self.try_start_playback(audio) {
            Ok(()) => true,
            Err(e) => {
                error!("Wiedergabe konnte nicht gestartet werden: {}", e);
                false
            }
        }
    }

    pub fn try_start_playback(&mut self, audio: &[u8]) -> AudioResult<()> {
        if !self.initialized {
            return Err(AudioError::NichtInitialisiert);
        }
        if self.state() == AudioState::Error {
            return Err(AudioError::StreamFehler(
                "Interface im Fehlerzustand, cleanup() und initialize() noetig".to_string(),
            ));
        }
        if self.is_playing() {
            return Err(AudioError::WiedergabeAktiv);
        }
        // Beendete Wiedergabe einsammeln
        if let Some(finished) = self.playback.take() {
            let _ = finished.handle.join();
        }
        if audio.is_empty() {
            return Err(AudioError::FormatFehler("keine Audiodaten".to_string()));
        }
        let device = self.output_device.clone().ok_or(AudioError::NichtInitialisiert)?;

        let config = self.shared.config.audio;
        let stream = self.backend.open_output(&device, &config).map_err(|e| {
            self.shared.set_state(AudioState::Error);
            e
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = bounded::<()>(1);
        self.shared.playing.store(true, Ordering::SeqCst);
        self.shared.set_state(AudioState::Playing);

        let guard = PlaybackGuard {
            shared: Arc::clone(&self.shared),
            done_tx,
        };
        let thread_stop = Arc::clone(&stop);
        let data = audio.to_vec();

        let spawned = std::thread::Builder::new()
            .name("modemvoice-playback".to_string())
            .spawn(move || playback_loop(guard, stream, data, config, thread_stop));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // Guard wurde mit dem Closure verworfen und hat aufgeraeumt
                return Err(AudioError::StreamFehler(e.to_string()));
            }
        };

        info!(geraet = %device.name, bytes = audio.len(), "Wiedergabe gestartet");
        self.playback = Some(PlaybackHandle {
            stop,
            done_rx,
            handle,
        });
        Ok(())
    }

    /// Stoppt die Wiedergabe und wartet begrenzt auf den Thread
    pub fn stop_playback(&mut self) -> bool {
        match self.try_stop_playback() {
            Ok(()) => true,
            Err(e) => {
                error!("Wiedergabe konnte nicht gestoppt werden: {}", e);
                false
            }
        }
    }

    pub fn try_stop_playback(&mut self) -> AudioResult<()> {
        let Some(playback) = self.playback.take() else {
            return Ok(());
        };
        playback.stop.store(true, Ordering::SeqCst);

        let timeout = Duration::from_millis(self.shared.config.playback_join_timeout_ms);
        match playback.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if playback.handle.join().is_err() {
                    warn!("Wiedergabe-Thread ist abgestuerzt");
                }
                debug!("Wiedergabe gestoppt");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(AudioError::Zeitlimit(format!(
                "Wiedergabe-Thread nach {:?} nicht beendet",
                timeout
            ))),
        }
    }

    /// Wartet bis die laufende Wiedergabe von selbst endet
    pub fn wait_for_playback(&mut self, timeout: Duration) -> bool {
        let Some(playback) = self.playback.as_ref() else {
            return true;
        };
        match playback.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(finished) = self.playback.take() {
                    let _ = finished.handle.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    // --- Abfragen ---

    pub fn get_audio_status(&self) -> AudioStatus {
        let ring = self.shared.ring.lock();
        AudioStatus {
            state: self.state(),
            initialized: self.initialized,
            recording: self.is_recording(),
            playing: self.is_playing(),
            input_device: self.input_device.as_ref().map(|d| d.name.clone()),
            output_device: self.output_device.as_ref().map(|d| d.name.clone()),
            backend: self.backend.name().to_string(),
            config: self.shared.config.audio,
            options: self.shared.config.options,
            buffered_frames: ring.len(),
            buffer_capacity: ring.capacity(),
            statistics: self.statistics(),
        }
    }

    /// Der zuletzt aufgenommene Buffer
    pub fn get_latest_audio_buffer(&self) -> Option<AudioBuffer> {
        self.shared.ring.lock().latest()
    }

    /// Alle gepufferten Buffer, aeltester zuerst
    pub fn buffered_audio(&self) -> Vec<AudioBuffer> {
        self.shared.ring.lock().snapshot()
    }

    pub fn clear_buffer(&self) {
        self.shared.ring.lock().clear();
    }

    /// Setzt den adaptiven DSP-Zustand zurueck
    pub fn reset_processor(&self) -> bool {
        match self.shared.processor.lock().as_mut() {
            Some(processor) => {
                processor.reset();
                true
            }
            None => false,
        }
    }

    // --- Aufraeumen ---

    /// Stoppt alles, leert den Puffer und gibt die Geraete frei
    pub fn cleanup(&mut self) {
        self.shared.stop_recording.store(true, Ordering::SeqCst);
        if let Some(playback) = self.playback.as_ref() {
            playback.stop.store(true, Ordering::SeqCst);
        }
        self.stop_recording();
        self.stop_playback();

        self.shared.ring.lock().clear();
        *self.shared.processor.lock() = None;
        self.input_device = None;
        self.output_device = None;
        let was_initialized = std::mem::replace(&mut self.initialized, false);
        self.shared.set_state(AudioState::Idle);
        if was_initialized {
            info!("AudioInterface aufgeraeumt");
        }
    }
}

impl Drop for AudioInterface {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn capture_callback(shared: Arc<Shared>) -> CaptureCallback {
    Box::new(move |bytes: &[u8]| match shared.handle_chunk(bytes) {
        Ok(control) => control,
        Err(e) => {
            shared.stats.add_processing_error();
            shared.recording.store(false, Ordering::SeqCst);
            shared.set_state(AudioState::Error);
            error!("Capture-Chunk fehlerhaft, Stream wird abgebrochen: {}", e);
            StreamControl::Abort
        }
    })
}

fn playback_loop(
    guard: PlaybackGuard,
    mut stream: Box<dyn OutputStream>,
    data: Vec<u8>,
    config: AudioConfig,
    stop: Arc<AtomicBool>,
) {
    let chunk_bytes = config.chunk_bytes();
    let stats = &guard.shared.stats;
    let mut chunks = 0usize;

    for chunk in data.chunks(chunk_bytes) {
        if stop.load(Ordering::SeqCst) {
            debug!(chunks, "Wiedergabe abgebrochen");
            break;
        }

        let result = if chunk.len() == chunk_bytes {
            stream.write(chunk)
        } else {
            // Letzten Chunk mit Stille auffuellen
            let mut padded = chunk.to_vec();
            padded.resize(chunk_bytes, 0);
            stream.write(&padded)
        };

        if let Err(e) = result {
            error!("Schreiben auf Ausgabegeraet fehlgeschlagen: {}", e);
            break;
        }

        chunks += 1;
        stats.add_played(config.chunk_size as u64);
        stats.add_underruns(stream.take_underruns());
    }

    if let Err(e) = stream.close() {
        warn!("Ausgabe-Stream nicht sauber geschlossen: {}", e);
    }
    stats.add_underruns(stream.take_underruns());
    info!(chunks, "Wiedergabe beendet");
    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LoopbackBackend;

    fn interface() -> (AudioInterface, LoopbackBackend) {
        let backend = LoopbackBackend::new();
        let iface = AudioInterface::new(InterfaceConfig::default(), Arc::new(backend.clone()));
        (iface, backend)
    }

    #[test]
    fn standard_config() {
        let config = InterfaceConfig::default();
        assert_eq!(config.max_buffer_size, 100);
        assert_eq!(config.playback_join_timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ohne_initialisierung_keine_aufnahme() {
        let (mut iface, backend) = interface();
        assert!(!iface.start_recording(None));
        assert!(!iface.start_playback(&[0u8; 4]));
        assert_eq!(backend.inputs_opened(), 0);
    }

    #[test]
    fn initialisieren_setzt_idle() {
        let (mut iface, _backend) = interface();
        assert!(iface.initialize());
        assert!(iface.is_initialized());
        assert_eq!(iface.state(), AudioState::Idle);
        assert_eq!(iface.input_device().map(|d| d.name.as_str()), Some("Loopback"));
    }

    #[test]
    fn cleanup_setzt_zurueck() {
        let (mut iface, backend) = interface();
        assert!(iface.initialize());
        assert!(iface.start_recording(None));
        assert!(backend.is_capturing());
        iface.cleanup();
        assert!(!backend.is_capturing());
        assert!(!iface.is_initialized());
        assert_eq!(iface.state(), AudioState::Idle);
        assert!(!iface.reset_processor());
    }

    #[test]
    fn leere_wiedergabe_abgelehnt() {
        let (mut iface, _backend) = interface();
        assert!(iface.initialize());
        assert!(!iface.start_playback(&[]));
        assert!(!iface.is_playing());
    }
}

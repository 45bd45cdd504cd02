//! Simulierte Modem-Leitung
//!
//! Speist einen Loopback-Backend im Echtzeit-Takt mit einem synthetischen
//! Signal: abwechselnd eine Sekunde Ton (440 Hz mit schwacher Oberwelle)
//! und eine Sekunde Stille.

use modemvoice_audio::{encode_pcm, AudioConfig, LoopbackBackend};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

const TON_HZ: f32 = 440.0;
const AMPLITUDE: f32 = 0.3;

/// Loopback-Leitung, deren Capture-Seite ein Thread bespielt
pub struct SimulierteLeitung {
    backend: LoopbackBackend,
}

/// Laufender Einspeise-Thread
pub struct LeitungsHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulierteLeitung {
    pub fn neu() -> Self {
        Self {
            backend: LoopbackBackend::new(),
        }
    }

    /// Backend fuer das AudioInterface
    pub fn backend(&self) -> LoopbackBackend {
        self.backend.clone()
    }

    /// Startet die Einspeisung im Takt der Chunk-Dauer
    pub fn starten(self, config: AudioConfig) -> LeitungsHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let backend = self.backend;

        let handle = std::thread::Builder::new()
            .name("modemvoice-leitung".to_string())
            .spawn(move || einspeisen(backend, config, thread_stop));

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Leitungs-Thread konnte nicht gestartet werden: {e}");
                None
            }
        };
        LeitungsHandle { stop, handle }
    }
}

impl Default for SimulierteLeitung {
    fn default() -> Self {
        Self::neu()
    }
}

impl LeitungsHandle {
    pub fn stoppen(mut self) {
        self.beenden();
    }

    fn beenden(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Leitungs-Thread ist abgestuerzt");
            }
        }
    }
}

impl Drop for LeitungsHandle {
    fn drop(&mut self) {
        self.beenden();
    }
}

/// Erzeugt einen Chunk ab Frame-Position `start`, Kanaele verschraenkt
pub fn signal_chunk(config: &AudioConfig, start: u64) -> Vec<f32> {
    let rate = config.sample_rate.max(1) as u64;
    let channels = config.channels.max(1) as usize;
    let mut samples = Vec::with_capacity(config.chunk_size * channels);

    for i in 0..config.chunk_size as u64 {
        let frame = start + i;
        let ton_an = (frame / rate) % 2 == 0;
        let wert = if ton_an {
            let t = frame as f32 / rate as f32;
            AMPLITUDE * (2.0 * PI * TON_HZ * t).sin()
                + 0.1 * AMPLITUDE * (4.0 * PI * TON_HZ * t).sin()
        } else {
            0.0
        };
        samples.extend(std::iter::repeat(wert).take(channels));
    }
    samples
}

fn einspeisen(backend: LoopbackBackend, config: AudioConfig, stop: Arc<AtomicBool>) {
    let takt = config.chunk_duration();
    let beginn = Instant::now();
    let mut position = 0u64;
    let mut chunks = 0u32;

    tracing::debug!(takt_ms = takt.as_millis() as u64, "Leitung speist ein");
    while !stop.load(Ordering::SeqCst) {
        let bytes = encode_pcm(&signal_chunk(&config, position), config.format);
        if !backend.inject(&bytes) {
            tracing::trace!("Keine aktive Aufnahme, Chunk verworfen");
        }
        position += config.chunk_size as u64;
        chunks += 1;

        // Gegen die Startzeit takten, damit sich keine Drift aufbaut
        let faellig = beginn + takt * chunks;
        let jetzt = Instant::now();
        if faellig > jetzt {
            std::thread::sleep(faellig - jetzt);
        }
    }
    tracing::debug!(chunks, "Leitung gestoppt");
}

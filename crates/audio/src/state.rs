//! Zustand und Statistiken des AudioInterface

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{AudioConfig, ProcessingOptions};

/// Aktueller Zustand des Interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioState {
    #[default]
    Idle,
    Recording,
    Playing,
    /// Nur kurzzeitig innerhalb des Capture-Callbacks
    Processing,
    Error,
}

impl AudioState {
    pub const ALL: [AudioState; 5] = [
        AudioState::Idle,
        AudioState::Recording,
        AudioState::Playing,
        AudioState::Processing,
        AudioState::Error,
    ];

    /// Name wie in der Serialisierung
    pub fn as_str(self) -> &'static str {
        match self {
            AudioState::Idle => "idle",
            AudioState::Recording => "recording",
            AudioState::Playing => "playing",
            AudioState::Processing => "processing",
            AudioState::Error => "error",
        }
    }
}

/// Zaehler, die von Capture- und Playback-Thread fortgeschrieben werden
///
/// Dauern werden als Frame-Anzahl gezaehlt und erst beim Auslesen in
/// Sekunden umgerechnet.
#[derive(Debug, Default)]
pub struct Statistics {
    recorded_frames: AtomicU64,
    played_frames: AtomicU64,
    buffer_overruns: AtomicU64,
    buffer_underruns: AtomicU64,
    processing_errors: AtomicU64,
    frames_captured: AtomicU64,
}

impl Statistics {
    pub fn add_recorded(&self, frames: u64) {
        self.recorded_frames.fetch_add(frames, Ordering::Relaxed);
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_played(&self, frames: u64) {
        self.played_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn add_overrun(&self) {
        self.buffer_overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_underruns(&self, count: u64) {
        if count > 0 {
            self.buffer_underruns.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn add_processing_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Setzt alle Zaehler zurueck (nur bei Re-Initialisierung)
    pub fn reset(&self) {
        for counter in [
            &self.recorded_frames,
            &self.played_frames,
            &self.buffer_overruns,
            &self.buffer_underruns,
            &self.processing_errors,
            &self.frames_captured,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, sample_rate: u32) -> StatisticsSnapshot {
        let rate = sample_rate.max(1) as f64;
        StatisticsSnapshot {
            total_recorded_seconds: self.recorded_frames.load(Ordering::Relaxed) as f64 / rate,
            total_played_seconds: self.played_frames.load(Ordering::Relaxed) as f64 / rate,
            buffer_overruns: self.buffer_overruns.load(Ordering::Relaxed),
            buffer_underruns: self.buffer_underruns.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
        }
    }
}

/// Momentaufnahme der Statistiken
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub total_recorded_seconds: f64,
    pub total_played_seconds: f64,
    pub buffer_overruns: u64,
    pub buffer_underruns: u64,
    pub processing_errors: u64,
    /// Anzahl verarbeiteter Capture-Chunks
    pub frames_captured: u64,
}

/// Serialisierbarer Status des Interfaces
#[derive(Debug, Clone, Serialize)]
pub struct AudioStatus {
    pub state: AudioState,
    pub initialized: bool,
    pub recording: bool,
    pub playing: bool,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub backend: String,
    pub config: AudioConfig,
    pub options: ProcessingOptions,
    pub buffered_frames: usize,
    pub buffer_capacity: usize,
    pub statistics: StatisticsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sekunden_aus_frames() {
        let stats = Statistics::default();
        for _ in 0..50 {
            stats.add_recorded(512);
        }
        stats.add_played(8000);
        let snap = stats.snapshot(16000);
        assert!((snap.total_recorded_seconds - 1.6).abs() < 1e-9);
        assert!((snap.total_played_seconds - 0.5).abs() < 1e-9);
        assert_eq!(snap.frames_captured, 50);
    }

    #[test]
    fn reset_setzt_alles_zurueck() {
        let stats = Statistics::default();
        stats.add_overrun();
        stats.add_underruns(3);
        stats.add_processing_error();
        stats.reset();
        assert_eq!(stats.snapshot(8000), StatisticsSnapshot::default());
    }

    #[test]
    fn zustand_klein_serialisiert() {
        let json = serde_json::to_string(&AudioState::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}

//! Verarbeitete Audio-Frames und WAV-Export
//!
//! Ein `AudioBuffer` entsteht pro aufgenommenem Chunk im Capture-Callback
//! und ist danach unveraenderlich. Die Samples liegen in einem `Arc<[f32]>`,
//! damit Snapshots des Ring-Puffers billig bleiben.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::codec::encode_pcm;
use crate::config::SampleFormat;
use crate::error::{AudioError, AudioResult};
use crate::processor::ProcessingReport;

/// Ein verarbeiteter Audio-Chunk mit Zeitstempel
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    timestamp: DateTime<Utc>,
    sample_rate: u32,
    channels: u16,
    report: Option<Arc<ProcessingReport>>,
}

impl AudioBuffer {
    /// Erstellt einen Buffer mit aktuellem Zeitstempel
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self::with_timestamp(samples, sample_rate, channels, Utc::now())
    }

    /// Erstellt einen Buffer mit vorgegebenem Zeitstempel
    pub fn with_timestamp(
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            samples: samples.into(),
            timestamp,
            sample_rate,
            channels: channels.max(1),
            report: None,
        }
    }

    /// Haengt den Verarbeitungsbericht des Prozessors an
    pub fn with_report(mut self, report: ProcessingReport) -> Self {
        self.report = Some(Arc::new(report));
        self
    }

    /// Normalisierte Samples (interleaved bei mehreren Kanaelen)
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Bericht der DSP-Kette, falls der Chunk verarbeitet wurde
    pub fn report(&self) -> Option<&ProcessingReport> {
        self.report.as_deref()
    }

    /// Anzahl Frames (Samples pro Kanal)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Dauer in Sekunden
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Rohdaten als 16-Bit PCM (little-endian)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_bytes_as(SampleFormat::Pcm16)
    }

    /// Rohdaten im angegebenen Geraeteformat
    pub fn to_bytes_as(&self, format: SampleFormat) -> Vec<u8> {
        encode_pcm(&self.samples, format)
    }

    /// Schreibt den Buffer als 16-Bit WAV-Datei
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AudioResult<()> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
        for &sample in self.samples.iter() {
            let s = if sample.is_finite() { sample } else { 0.0 };
            let scaled = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(scaled)?;
        }
        writer.finalize()?;

        debug!(
            pfad = %path.as_ref().display(),
            frames = self.frames(),
            "WAV-Datei geschrieben"
        );
        Ok(())
    }

    /// Liest eine WAV-Datei (Integer oder Float) als Buffer
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> AudioResult<Self> {
        let reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        Ok(Self::new(samples, spec.sample_rate, spec.channels))
    }

    /// Haengt mehrere Buffer gleichen Formats aneinander
    ///
    /// Zeitstempel des Ergebnisses ist der des ersten Buffers.
    pub fn concat(buffers: &[AudioBuffer]) -> AudioResult<Option<AudioBuffer>> {
        let Some(first) = buffers.first() else {
            return Ok(None);
        };

        let mut samples = Vec::with_capacity(buffers.iter().map(|b| b.samples.len()).sum());
        for buffer in buffers {
            if buffer.sample_rate != first.sample_rate || buffer.channels != first.channels {
                return Err(AudioError::Konfiguration(format!(
                    "Buffer-Formate passen nicht zusammen: {}Hz/{}ch vs {}Hz/{}ch",
                    first.sample_rate, first.channels, buffer.sample_rate, buffer.channels
                )));
            }
            samples.extend_from_slice(&buffer.samples);
        }

        Ok(Some(Self::with_timestamp(
            samples,
            first.sample_rate,
            first.channels,
            first.timestamp,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinus(frames: usize, sample_rate: u32) -> Vec<f32> {
        (0..frames)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn dauer_aus_laenge_und_rate() {
        let buffer = AudioBuffer::new(vec![0.0; 8000], 16000, 1);
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-12);

        let stereo = AudioBuffer::new(vec![0.0; 8000], 16000, 2);
        assert_eq!(stereo.frames(), 4000);
        assert!((stereo.duration_secs() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn to_bytes_ist_int16() {
        let buffer = AudioBuffer::new(vec![0.5, -0.5, 0.0], 8000, 1);
        let bytes = buffer.to_bytes();
        assert_eq!(bytes.len(), 6);
        let erster = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(erster, 16384);
    }

    #[test]
    fn wav_hin_und_zurueck() {
        let dir = tempfile::tempdir().expect("Temp-Verzeichnis konnte nicht erstellt werden");
        let pfad = dir.path().join("frame.wav");

        let original = AudioBuffer::new(sinus(512, 16000), 16000, 1);
        original.save_to_file(&pfad).unwrap();

        let geladen = AudioBuffer::load_from_file(&pfad).unwrap();
        assert_eq!(geladen.sample_rate(), 16000);
        assert_eq!(geladen.channels(), 1);
        assert_eq!(geladen.samples().len(), original.samples().len());
        for (a, b) in original.samples().iter().zip(geladen.samples()) {
            // int16-Quantisierung
            assert!((a - b).abs() < 2.0 / 32768.0, "{} != {}", a, b);
        }
    }

    #[test]
    fn concat_haengt_an() {
        let a = AudioBuffer::new(vec![0.1; 4], 8000, 1);
        let b = AudioBuffer::new(vec![0.2; 6], 8000, 1);
        let gesamt = AudioBuffer::concat(&[a.clone(), b]).unwrap().unwrap();
        assert_eq!(gesamt.samples().len(), 10);
        assert_eq!(gesamt.timestamp(), a.timestamp());
    }

    #[test]
    fn concat_leer_und_unpassend() {
        assert!(AudioBuffer::concat(&[]).unwrap().is_none());
        let a = AudioBuffer::new(vec![0.1; 4], 8000, 1);
        let b = AudioBuffer::new(vec![0.2; 4], 16000, 1);
        assert!(AudioBuffer::concat(&[a, b]).is_err());
    }

    #[test]
    fn clone_teilt_samples() {
        let a = AudioBuffer::new(vec![0.3; 16], 8000, 1);
        let b = a.clone();
        assert!(std::ptr::eq(a.samples().as_ptr(), b.samples().as_ptr()));
        assert!(a.report().is_none());
    }
}

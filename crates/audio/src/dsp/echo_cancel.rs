//! Echo-Unterdrueckung ueber Kreuzkorrelation
//!
//! Haelt eine rollende Historie der eigenen, bereits verarbeiteten Ausgabe
//! (standardmaessig eine Sekunde). Pro Frame wird die Verzoegerung mit der
//! staerksten Korrelation zwischen Frame und Historie geschaetzt. Liegt sie
//! innerhalb des Frames, wird eine gedaempfte, verzoegerte Kopie des Frames
//! von sich selbst abgezogen.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

use super::{std_dev, validate_frame, DspStage, SpectralAnalyzer, EPSILON};
use crate::error::{AudioError, AudioResult};

/// Konfiguration der Echo-Unterdrueckung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoCancelConfig {
    /// Daempfung der abgezogenen, verzoegerten Kopie
    pub damping: f32,
    /// Laenge der Historie in Sekunden
    pub history_secs: f32,
}

impl Default for EchoCancelConfig {
    fn default() -> Self {
        Self {
            damping: 0.3,
            history_secs: 1.0,
        }
    }
}

impl EchoCancelConfig {
    pub fn validate(&self) -> AudioResult<()> {
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(AudioError::Konfiguration(format!(
                "Echo-Daempfung muss in [0, 1] liegen, ist {}",
                self.damping
            )));
        }
        if self.history_secs <= 0.0 {
            return Err(AudioError::Konfiguration(
                "Echo-Historie muss > 0 s sein".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bericht der Echo-Unterdrueckung
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EchoReport {
    /// Geschaetzte Verzoegerung in Samples
    pub delay_samples: usize,
    /// Geschaetzte Verzoegerung in Millisekunden
    pub delay_ms: f32,
    /// Erreichte Daempfung: 20·log10(std(ein) / std(aus))
    pub echo_reduction_db: f32,
    /// Ob tatsaechlich subtrahiert wurde
    pub applied: bool,
}

/// Echo-Unterdrueckung mit eigener Ausgabe-Historie
pub struct EchoCanceller {
    config: EchoCancelConfig,
    sample_rate: u32,
    history_len: usize,
    history: VecDeque<f32>,
    analyzer: SpectralAnalyzer,
}

impl EchoCanceller {
    pub fn new(config: EchoCancelConfig, sample_rate: u32) -> Self {
        let history_len = ((sample_rate as f32 * config.history_secs) as usize).max(1);
        Self {
            config,
            sample_rate,
            history_len,
            history: VecDeque::with_capacity(history_len),
            analyzer: SpectralAnalyzer::new(),
        }
    }

    /// Anzahl Samples in der Historie
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Schaetzt die Verzoegerung des Frames gegenueber der Historie
    ///
    /// Korrelation c[k] = sum_i h[i + k] · f[i] fuer k in 0..len(h). Die
    /// Verzoegerung ist der Abstand vom Historien-Ende: len(h) − argmax |c|.
    /// Ohne nennenswerte Korrelation ist die Verzoegerung 0.
    pub fn estimate_delay(&mut self, frame: &[f32]) -> AudioResult<usize> {
        let h_len = self.history.len();
        let n = frame.len();
        if h_len == 0 || n == 0 {
            return Ok(0);
        }

        // Kreuzkorrelation ueber das Spektrum: H · conj(F)
        let fft_len = (h_len + n).next_power_of_two();
        let mut h = vec![0.0f32; fft_len];
        for (dst, src) in h.iter_mut().zip(self.history.iter()) {
            *dst = *src;
        }
        let mut f = vec![0.0f32; fft_len];
        f[..n].copy_from_slice(frame);

        let h_spec = self.analyzer.forward(&h)?;
        let f_spec = self.analyzer.forward(&f)?;
        let mut product: Vec<_> = h_spec
            .iter()
            .zip(f_spec.iter())
            .map(|(a, b)| a * b.conj())
            .collect();
        let corr = self.analyzer.inverse(&mut product, fft_len)?;

        let (best_k, best) = corr[..h_len]
            .iter()
            .map(|c| c.abs())
            .enumerate()
            .fold((0usize, 0.0f32), |acc, (k, c)| if c > acc.1 { (k, c) } else { acc });

        if best < EPSILON {
            return Ok(0);
        }
        Ok(h_len - best_k)
    }

    fn remember(&mut self, output: &[f32]) {
        self.history.extend(output.iter().copied());
        let excess = self.history.len().saturating_sub(self.history_len);
        self.history.drain(..excess);
    }
}

impl DspStage for EchoCanceller {
    type Report = EchoReport;

    fn process(&mut self, samples: &mut [f32]) -> AudioResult<EchoReport> {
        validate_frame(samples)?;

        let delay = self.estimate_delay(samples)?;
        let n = samples.len();
        let std_in = std_dev(samples);

        let applied = delay > 0 && delay < n;
        if applied {
            let input = samples.to_vec();
            for i in delay..n {
                samples[i] = input[i] - self.config.damping * input[i - delay];
            }
        }

        let std_out = std_dev(samples);
        let echo_reduction_db = 20.0 * ((std_in + EPSILON) / (std_out + EPSILON)).log10();

        self.remember(samples);

        trace!(
            verzoegerung = delay,
            angewendet = applied,
            daempfung_db = echo_reduction_db,
            "Echo-Unterdrueckung"
        );

        Ok(EchoReport {
            delay_samples: delay,
            delay_ms: delay as f32 * 1000.0 / self.sample_rate as f32,
            echo_reduction_db,
            applied,
        })
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rauschen(len: usize, seed: u32) -> Vec<f32> {
        // Einfacher LCG, deterministisch
        let mut state = seed.wrapping_mul(2654435761).max(1);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect()
    }

    #[test]
    fn erster_frame_ohne_historie() {
        let mut aec = EchoCanceller::new(EchoCancelConfig::default(), 16000);
        let original = rauschen(256, 1);
        let mut frame = original.clone();
        let report = aec.process(&mut frame).unwrap();
        assert_eq!(report.delay_samples, 0);
        assert!(!report.applied);
        assert_eq!(frame, original);
        assert_eq!(aec.history_len(), 256);
    }

    #[test]
    fn historie_begrenzt_auf_eine_sekunde() {
        let mut aec = EchoCanceller::new(EchoCancelConfig::default(), 8000);
        for seed in 0..40 {
            let mut frame = rauschen(512, seed);
            aec.process(&mut frame).unwrap();
        }
        assert_eq!(aec.history_len(), 8000);
    }

    #[test]
    fn verzoegerung_wird_gefunden() {
        let mut aec = EchoCanceller::new(EchoCancelConfig::default(), 16000);
        let signal = rauschen(1024, 7);
        // Historie direkt setzen, damit sie exakt das Signal enthaelt
        aec.history.extend(signal.iter().copied());

        // Frame beginnt 100 Samples vor dem Historien-Ende
        let frame: Vec<f32> = signal[924..]
            .iter()
            .copied()
            .chain(rauschen(156, 99).into_iter().map(|s| s * 0.01))
            .collect();
        assert_eq!(frame.len(), 256);
        let delay = aec.estimate_delay(&frame).unwrap();
        assert_eq!(delay, 100);
    }

    #[test]
    fn subtraktion_mit_daempfung() {
        let mut aec = EchoCanceller::new(EchoCancelConfig::default(), 16000);
        let signal = rauschen(1024, 3);
        aec.history.extend(signal.iter().copied());

        let original: Vec<f32> = signal[924..].iter().copied().chain(vec![0.0; 156]).collect();
        let mut frame = original.clone();
        let report = aec.process(&mut frame).unwrap();

        assert_eq!(report.delay_samples, 100);
        assert!(report.applied);
        assert!((report.delay_ms - 6.25).abs() < 1e-3);
        for i in 100..frame.len() {
            let erwartet = original[i] - 0.3 * original[i - 100];
            assert!((frame[i] - erwartet).abs() < 1e-6);
        }
        assert_eq!(&frame[..100], &original[..100]);
    }

    #[test]
    fn stille_ergibt_keine_verzoegerung() {
        let mut aec = EchoCanceller::new(EchoCancelConfig::default(), 16000);
        let mut stille = vec![0.0f32; 256];
        aec.process(&mut stille).unwrap();
        let mut noch_stille = vec![0.0f32; 256];
        let report = aec.process(&mut noch_stille).unwrap();
        assert_eq!(report.delay_samples, 0);
        assert!(report.echo_reduction_db.is_finite());
    }

    #[test]
    fn reset_leert_historie() {
        let mut aec = EchoCanceller::new(EchoCancelConfig::default(), 16000);
        let mut frame = rauschen(128, 5);
        aec.process(&mut frame).unwrap();
        aec.reset();
        assert_eq!(aec.history_len(), 0);
    }

    #[test]
    fn daempfung_ausserhalb_abgelehnt() {
        let config = EchoCancelConfig {
            damping: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

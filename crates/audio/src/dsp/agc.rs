//! Automatic Gain Control (AGC)
//!
//! Regelt den Frame-Pegel auf einen Ziel-RMS. Der benoetigte Gain wird
//! begrenzt, exponentiell gegen den letzten Gain geglaettet und in einer
//! kurzen Historie gehalten. Ein Limiter skaliert danach herunter, falls
//! die Spitze die Grenze ueberschreitet.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

use super::{amplitude_db, peak, rms, validate_frame, DspStage, EPSILON};
use crate::error::{AudioError, AudioResult};

/// Konfiguration fuer den AGC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgcConfig {
    /// Ziel-RMS-Pegel (normalisiert, 0.1 entspricht ca. -20 dBFS)
    pub target_rms: f32,
    /// Minimaler Gain-Faktor
    pub min_gain: f32,
    /// Maximaler Gain-Faktor (verhindert Aufblasen von Stille ins Unendliche)
    pub max_gain: f32,
    /// Gewicht des neuen Gains bei der Glaettung
    pub smoothing: f32,
    /// Laenge der Gain-Historie
    pub history_len: usize,
    /// Limiter-Schwelle fuer den Spitzenwert
    pub peak_limit: f32,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            target_rms: 0.1,
            min_gain: 0.1,
            max_gain: 10.0,
            smoothing: 0.1,
            history_len: 100,
            peak_limit: 0.95,
        }
    }
}

impl AgcConfig {
    pub fn validate(&self) -> AudioResult<()> {
        if !(self.min_gain > 0.0 && self.min_gain <= self.max_gain) {
            return Err(AudioError::Konfiguration(format!(
                "Gain-Bereich ungueltig: [{}, {}]",
                self.min_gain, self.max_gain
            )));
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(AudioError::Konfiguration(format!(
                "AGC-Glaettung muss in (0, 1] liegen, ist {}",
                self.smoothing
            )));
        }
        if !(self.peak_limit > 0.0 && self.peak_limit <= 1.0) {
            return Err(AudioError::Konfiguration(format!(
                "Limiter-Schwelle muss in (0, 1] liegen, ist {}",
                self.peak_limit
            )));
        }
        if self.target_rms <= 0.0 || self.history_len == 0 {
            return Err(AudioError::Konfiguration(
                "Ziel-RMS und Historienlaenge muessen > 0 sein".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bericht des AGC
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GainReport {
    pub input_rms_db: f32,
    pub output_rms_db: f32,
    /// Geglaetteter Gain in dB (vor dem Limiter)
    pub gain_db: f32,
    /// Ob der Limiter eingegriffen hat
    pub limited: bool,
}

/// Automatic Gain Control mit Gain-Historie
pub struct Agc {
    config: AgcConfig,
    history: VecDeque<f32>,
}

impl Agc {
    pub fn new(config: AgcConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_len),
            config,
        }
    }

    /// Zuletzt angewendeter Gain (1.0 ohne Historie)
    pub fn current_gain(&self) -> f32 {
        self.history.back().copied().unwrap_or(1.0)
    }

    /// Gain-Historie, aeltester Wert zuerst
    pub fn history(&self) -> Vec<f32> {
        self.history.iter().copied().collect()
    }

    /// Benoetigter Gain fuer einen Frame-RMS, begrenzt auf den Gain-Bereich
    fn required_gain(&self, input_rms: f32) -> f32 {
        if input_rms < EPSILON {
            return self.config.max_gain;
        }
        (self.config.target_rms / input_rms).clamp(self.config.min_gain, self.config.max_gain)
    }
}

impl DspStage for Agc {
    type Report = GainReport;

    fn process(&mut self, samples: &mut [f32]) -> AudioResult<GainReport> {
        validate_frame(samples)?;

        let input_rms = rms(samples);
        let required = self.required_gain(input_rms);
        let w = self.config.smoothing;
        let gain = (w * required + (1.0 - w) * self.current_gain())
            .clamp(self.config.min_gain, self.config.max_gain);

        self.history.push_back(gain);
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }

        for s in samples.iter_mut() {
            *s *= gain;
        }

        // Limiter
        let frame_peak = peak(samples);
        let limited = frame_peak > self.config.peak_limit;
        if limited {
            let scale = self.config.peak_limit / frame_peak;
            for s in samples.iter_mut() {
                *s *= scale;
            }
        }

        trace!(gain, limitiert = limited, "AGC");

        Ok(GainReport {
            input_rms_db: amplitude_db(input_rms),
            output_rms_db: amplitude_db(rms(samples)),
            gain_db: amplitude_db(gain),
            limited,
        })
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ton(amp: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn spitze_nie_ueber_grenze() {
        let mut agc = Agc::new(AgcConfig::default());
        for amp in [0.001f32, 0.01, 0.1, 0.5, 1.0] {
            for _ in 0..50 {
                let mut frame = ton(amp, 512);
                agc.process(&mut frame).unwrap();
                assert!(peak(&frame) <= 0.95 + 1e-5, "Spitze {} bei Amplitude {}", peak(&frame), amp);
            }
        }
    }

    #[test]
    fn gain_immer_im_bereich() {
        let mut agc = Agc::new(AgcConfig::default());
        for amp in [0.0f32, 1.0, 0.0001, 0.9, 0.0] {
            for _ in 0..30 {
                let mut frame = ton(amp, 256);
                agc.process(&mut frame).unwrap();
                let g = agc.current_gain();
                assert!((0.1..=10.0).contains(&g), "Gain {} ausserhalb", g);
            }
        }
    }

    #[test]
    fn stille_ohne_nan() {
        let mut agc = Agc::new(AgcConfig::default());
        let mut frame = vec![0.0f32; 512];
        let report = agc.process(&mut frame).unwrap();
        assert!(frame.iter().all(|s| *s == 0.0));
        assert!(report.input_rms_db.is_finite());
        assert!(report.output_rms_db.is_finite());
        assert!(report.gain_db.is_finite());
        // 0.1 · 10 + 0.9 · 1
        assert!((agc.current_gain() - 1.9).abs() < 1e-5);
    }

    #[test]
    fn glaettung_gegen_letzten_gain() {
        let mut agc = Agc::new(AgcConfig::default());
        // RMS von 0.05-Ton ≈ 0.0354 → benoetigt ≈ 2.83
        let mut frame = ton(0.05, 1600);
        agc.process(&mut frame).unwrap();
        let erwartet = 0.1 * (0.1 / rms(&ton(0.05, 1600))) + 0.9;
        assert!((agc.current_gain() - erwartet).abs() < 1e-3);
    }

    #[test]
    fn konvergiert_zum_ziel() {
        let mut agc = Agc::new(AgcConfig::default());
        let mut letzter = 0.0;
        for _ in 0..100 {
            let mut frame = ton(0.05, 512);
            let report = agc.process(&mut frame).unwrap();
            letzter = report.output_rms_db;
        }
        // Ziel -20 dB
        assert!((letzter + 20.0).abs() < 0.5, "Ausgang {} dB", letzter);
    }

    #[test]
    fn historie_begrenzt() {
        let mut agc = Agc::new(AgcConfig::default());
        for _ in 0..150 {
            let mut frame = ton(0.2, 64);
            agc.process(&mut frame).unwrap();
        }
        assert_eq!(agc.history().len(), 100);
        agc.reset();
        assert!(agc.history().is_empty());
        assert_eq!(agc.current_gain(), 1.0);
    }

    #[test]
    fn ungueltiger_bereich_abgelehnt() {
        let config = AgcConfig {
            min_gain: 5.0,
            max_gain: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(AgcConfig::default().validate().is_ok());
    }
}

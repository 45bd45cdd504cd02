//! Rauschunterdrueckung per Spectral Subtraction
//!
//! Pro Frame: FFT, Rauschprofil pflegen, spektralen Gain berechnen,
//! Betrag skalieren, Phase behalten, inverse FFT.
//!
//! Das Rauschprofil wird beim ersten Frame (oder bei geaenderter
//! Frame-Laenge) mit einem Bruchteil des aktuellen Betragsspektrums
//! initialisiert. Danach wird es nur in leisen Frames nachgefuehrt:
//! Spitzenbetrag < 2 × mittleres Rauschprofil.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{amplitude_db, power_ratio_db, validate_frame, DspStage, SpectralAnalyzer, EPSILON};
use crate::error::{AudioError, AudioResult};

/// Konfiguration der Spectral Subtraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSuppressionConfig {
    /// Anteil des ersten Betragsspektrums als Startprofil
    pub seed_factor: f32,
    /// Gewicht des alten Profils bei der Nachfuehrung
    pub smoothing: f32,
    /// Uebersubtraktions-Faktor
    pub over_subtraction: f32,
    /// Untergrenze des spektralen Gains
    pub spectral_floor: f32,
    /// Leise-Frame-Schwelle als Vielfaches des mittleren Profils
    pub update_threshold: f32,
}

impl Default for NoiseSuppressionConfig {
    fn default() -> Self {
        Self {
            seed_factor: 0.1,
            smoothing: 0.9,
            over_subtraction: 2.0,
            spectral_floor: 0.01,
            update_threshold: 2.0,
        }
    }
}

impl NoiseSuppressionConfig {
    pub fn validate(&self) -> AudioResult<()> {
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(AudioError::Konfiguration(format!(
                "Glaettung muss in [0, 1) liegen, ist {}",
                self.smoothing
            )));
        }
        if !(0.0..=1.0).contains(&self.spectral_floor) {
            return Err(AudioError::Konfiguration(format!(
                "Spektraler Boden muss in [0, 1] liegen, ist {}",
                self.spectral_floor
            )));
        }
        if self.seed_factor < 0.0 || self.over_subtraction < 0.0 {
            return Err(AudioError::Konfiguration(
                "Startfaktor und Uebersubtraktion duerfen nicht negativ sein".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bericht der Rauschunterdrueckung
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoiseReport {
    /// Mittleres Rauschprofil in dB
    pub noise_floor_db: f32,
    /// SNR nach minus SNR vor der Subtraktion in dB
    pub snr_improvement_db: f32,
    /// Ob das Profil in diesem Frame nachgefuehrt wurde
    pub profile_updated: bool,
}

/// Spectral-Subtraction-Stufe mit adaptivem Rauschprofil
pub struct NoiseSuppressor {
    config: NoiseSuppressionConfig,
    profile: Option<Vec<f32>>,
    analyzer: SpectralAnalyzer,
}

impl NoiseSuppressor {
    pub fn new(config: NoiseSuppressionConfig) -> Self {
        Self {
            config,
            profile: None,
            analyzer: SpectralAnalyzer::new(),
        }
    }

    /// Aktuelles Rauschprofil (Betrag je Bin)
    pub fn profile(&self) -> Option<&[f32]> {
        self.profile.as_deref()
    }

    /// Pflegt das Profil; gibt zurueck ob nachgefuehrt wurde
    fn update_profile(&mut self, magnitudes: &[f32]) -> bool {
        match self.profile.as_mut() {
            Some(profile) if profile.len() == magnitudes.len() => {
                let mean = profile.iter().sum::<f32>() / profile.len() as f32;
                let max = magnitudes.iter().copied().fold(0.0f32, f32::max);
                if max < self.config.update_threshold * mean {
                    let old = self.config.smoothing;
                    for (p, m) in profile.iter_mut().zip(magnitudes) {
                        *p = old * *p + (1.0 - old) * m;
                    }
                    true
                } else {
                    false
                }
            }
            _ => {
                self.profile = Some(
                    magnitudes
                        .iter()
                        .map(|m| m * self.config.seed_factor)
                        .collect(),
                );
                true
            }
        }
    }
}

impl DspStage for NoiseSuppressor {
    type Report = NoiseReport;

    fn process(&mut self, samples: &mut [f32]) -> AudioResult<NoiseReport> {
        validate_frame(samples)?;
        let len = samples.len();

        let mut spectrum = self.analyzer.forward(samples)?;
        let magnitudes: Vec<f32> = spectrum.iter().map(|c| c.norm()).collect();
        let profile_updated = self.update_profile(&magnitudes);

        let Some(profile) = self.profile.as_deref() else {
            return Err(AudioError::Dsp("Rauschprofil fehlt".to_string()));
        };

        let mut signal_power = 0.0f32;
        let mut noise_before = 0.0f32;
        let mut noise_after = 0.0f32;

        for ((bin, &mag), &noise) in spectrum.iter_mut().zip(&magnitudes).zip(profile) {
            let s2 = mag * mag;
            let n2 = noise * noise;
            let gain = (1.0 - self.config.over_subtraction * n2 / (s2 + EPSILON))
                .max(self.config.spectral_floor);

            signal_power += s2;
            noise_before += n2;
            noise_after += gain * gain * n2;

            // Betrag skalieren, Phase bleibt
            *bin *= gain;
        }

        let output = self.analyzer.inverse(&mut spectrum, len)?;
        samples.copy_from_slice(&output);

        let mean_noise = profile.iter().sum::<f32>() / profile.len() as f32;
        let snr_before = power_ratio_db(signal_power, noise_before);
        let snr_after = power_ratio_db(signal_power, noise_after);

        trace!(
            profil_aktualisiert = profile_updated,
            rauschboden = mean_noise,
            "Spectral Subtraction"
        );

        Ok(NoiseReport {
            noise_floor_db: amplitude_db(mean_noise),
            snr_improvement_db: snr_after - snr_before,
            profile_updated,
        })
    }

    fn reset(&mut self) {
        self.profile = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::rms;

    fn ton(freq: f32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn erster_frame_initialisiert_profil() {
        let mut ns = NoiseSuppressor::new(NoiseSuppressionConfig::default());
        assert!(ns.profile().is_none());
        let mut frame = ton(1000.0, 512, 0.5);
        let report = ns.process(&mut frame).unwrap();
        assert!(report.profile_updated);
        let profil = ns.profile().unwrap();
        assert_eq!(profil.len(), 257);
        assert_eq!(frame.len(), 512);
    }

    #[test]
    fn starkes_signal_bleibt_erhalten() {
        let mut ns = NoiseSuppressor::new(NoiseSuppressionConfig::default());
        let mut frame = ton(1000.0, 512, 0.5);
        let vorher = rms(&frame);
        ns.process(&mut frame).unwrap();
        // Startprofil 0.1 × Betrag: Gain = 1 − 2·0.01 = 0.98 im Nutzband
        assert!((rms(&frame) / vorher - 0.98).abs() < 0.02);
    }

    #[test]
    fn lauter_frame_fuehrt_profil_nicht_nach() {
        let mut ns = NoiseSuppressor::new(NoiseSuppressionConfig::default());
        let mut leise = ton(1000.0, 512, 0.01);
        ns.process(&mut leise).unwrap();
        let profil_vorher = ns.profile().unwrap().to_vec();

        let mut laut = ton(1000.0, 512, 0.9);
        let report = ns.process(&mut laut).unwrap();
        assert!(!report.profile_updated);
        assert_eq!(ns.profile().unwrap(), profil_vorher.as_slice());
    }

    #[test]
    fn stille_fuehrt_profil_nach() {
        let mut ns = NoiseSuppressor::new(NoiseSuppressionConfig::default());
        let mut laut = ton(1000.0, 512, 0.5);
        ns.process(&mut laut).unwrap();
        let mittel_vorher: f32 = ns.profile().unwrap().iter().sum();

        let mut stille = vec![0.0f32; 512];
        let report = ns.process(&mut stille).unwrap();
        assert!(report.profile_updated);
        let mittel_nachher: f32 = ns.profile().unwrap().iter().sum();
        assert!((mittel_nachher - 0.9 * mittel_vorher).abs() < 1e-3 * mittel_vorher.max(1.0));
        assert!(stille.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn neue_frame_laenge_setzt_profil_neu() {
        let mut ns = NoiseSuppressor::new(NoiseSuppressionConfig::default());
        let mut a = ton(1000.0, 512, 0.5);
        ns.process(&mut a).unwrap();
        let mut b = ton(1000.0, 256, 0.5);
        ns.process(&mut b).unwrap();
        assert_eq!(ns.profile().unwrap().len(), 129);
    }

    #[test]
    fn berichtswerte_endlich() {
        let mut ns = NoiseSuppressor::new(NoiseSuppressionConfig::default());
        let mut stille = vec![0.0f32; 128];
        let report = ns.process(&mut stille).unwrap();
        assert!(report.noise_floor_db.is_finite());
        assert!(report.snr_improvement_db.is_finite());
    }

    #[test]
    fn reset_verwirft_profil() {
        let mut ns = NoiseSuppressor::new(NoiseSuppressionConfig::default());
        let mut frame = ton(500.0, 256, 0.3);
        ns.process(&mut frame).unwrap();
        ns.reset();
        assert!(ns.profile().is_none());
    }
}

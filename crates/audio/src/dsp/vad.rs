//! Voice Activity Detection (VAD)
//!
//! Kombiniert Kurzzeit-Energie, Zero-Crossing-Rate und spektralen
//! Schwerpunkt. Sprache gilt als erkannt, wenn alle drei Merkmale in
//! ihrem Bereich liegen. Veraendert die Samples NICHT.

use serde::{Deserialize, Serialize};

use super::{bin_frequency, validate_frame, DspStage, SpectralAnalyzer, EPSILON};
use crate::error::{AudioError, AudioResult};

/// Konfiguration fuer die VAD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Energie-Schwellenwert (mittlere Leistung)
    pub energy_threshold: f32,
    /// Untere Grenze der Zero-Crossing-Rate (exklusiv)
    pub zcr_min: f32,
    /// Obere Grenze der Zero-Crossing-Rate (exklusiv)
    pub zcr_max: f32,
    /// Untere Grenze des spektralen Schwerpunkts in Hz (exklusiv)
    pub centroid_min_hz: f32,
    /// Obere Grenze des spektralen Schwerpunkts in Hz (exklusiv)
    pub centroid_max_hz: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            zcr_min: 0.01,
            zcr_max: 0.3,
            centroid_min_hz: 200.0,
            centroid_max_hz: 4000.0,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> AudioResult<()> {
        if self.energy_threshold <= 0.0 {
            return Err(AudioError::Konfiguration(
                "VAD-Energieschwelle muss > 0 sein".to_string(),
            ));
        }
        if self.zcr_min >= self.zcr_max || self.centroid_min_hz >= self.centroid_max_hz {
            return Err(AudioError::Konfiguration(
                "VAD-Bereiche: Untergrenze muss unter Obergrenze liegen".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ergebnis der Sprachaktivitaets-Erkennung
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceActivity {
    pub voice_detected: bool,
    /// min(Energie / Schwelle, 1)
    pub confidence: f32,
    pub energy: f32,
    pub zero_crossing_rate: f32,
    pub spectral_centroid_hz: f32,
}

/// Voice Activity Detector
pub struct Vad {
    config: VadConfig,
    sample_rate: u32,
    analyzer: SpectralAnalyzer,
    last: Option<bool>,
}

impl Vad {
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            analyzer: SpectralAnalyzer::new(),
            last: None,
        }
    }

    /// Gibt zurueck ob im letzten analysierten Frame Sprache erkannt wurde
    pub fn is_voice_active(&self) -> bool {
        self.last.unwrap_or(false)
    }

    /// Analysiert einen Frame ohne ihn zu veraendern
    pub fn detect(&mut self, samples: &[f32]) -> AudioResult<VoiceActivity> {
        validate_frame(samples)?;

        let energy = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        let zcr = zero_crossing_rate(samples);
        let centroid = self.spectral_centroid(samples)?;

        let c = &self.config;
        let voice_detected = energy > c.energy_threshold
            && zcr > c.zcr_min
            && zcr < c.zcr_max
            && centroid > c.centroid_min_hz
            && centroid < c.centroid_max_hz;

        self.last = Some(voice_detected);

        Ok(VoiceActivity {
            voice_detected,
            confidence: (energy / c.energy_threshold).min(1.0),
            energy,
            zero_crossing_rate: zcr,
            spectral_centroid_hz: centroid,
        })
    }

    /// Betragsgewichteter Mittelwert der Bin-Frequenzen
    pub fn spectral_centroid(&mut self, samples: &[f32]) -> AudioResult<f32> {
        let mags = self.analyzer.magnitudes(samples)?;
        let total: f32 = mags.iter().sum();
        if total < EPSILON {
            return Ok(0.0);
        }
        let weighted: f32 = mags
            .iter()
            .enumerate()
            .map(|(bin, m)| bin_frequency(bin, samples.len(), self.sample_rate) * m)
            .sum();
        Ok(weighted / total)
    }
}

impl DspStage for Vad {
    type Report = VoiceActivity;

    fn process(&mut self, samples: &mut [f32]) -> AudioResult<VoiceActivity> {
        self.detect(samples)
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// Berechnet die normalisierte Zero-Crossing-Rate
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ton(freq: f32, amp: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn ton_440_ist_sprache() {
        let mut vad = Vad::new(VadConfig::default(), 16000);
        let result = vad.detect(&ton(440.0, 0.5, 512)).unwrap();
        assert!(result.voice_detected, "{:?}", result);
        assert_eq!(result.confidence, 1.0);
        assert!(vad.is_voice_active());
    }

    #[test]
    fn stille_ist_keine_sprache() {
        let mut vad = Vad::new(VadConfig::default(), 16000);
        let result = vad.detect(&vec![0.0; 512]).unwrap();
        assert!(!result.voice_detected);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.spectral_centroid_hz, 0.0);
    }

    #[test]
    fn leiser_ton_unter_schwelle() {
        let mut vad = Vad::new(VadConfig::default(), 16000);
        // Leistung 0.005 < 0.02
        let result = vad.detect(&ton(440.0, 0.1, 512)).unwrap();
        assert!(!result.voice_detected);
        assert!((result.confidence - 0.25).abs() < 0.02);
    }

    #[test]
    fn hoher_ton_zu_viele_nulldurchgaenge() {
        let mut vad = Vad::new(VadConfig::default(), 16000);
        // 6 kHz: ZCR ≈ 0.75, Schwerpunkt ueber 4 kHz
        let result = vad.detect(&ton(6000.0, 0.5, 512)).unwrap();
        assert!(!result.voice_detected);
        assert!(result.zero_crossing_rate > 0.3);
    }

    #[test]
    fn schwerpunkt_nahe_tonfrequenz() {
        let mut vad = Vad::new(VadConfig::default(), 16000);
        // 1 kHz liegt bei 512 Samples genau auf einem Bin
        let centroid = vad.spectral_centroid(&ton(1000.0, 0.5, 512)).unwrap();
        assert!((centroid - 1000.0).abs() < 20.0, "Schwerpunkt {}", centroid);
    }

    #[test]
    fn process_veraendert_nichts() {
        let mut vad = Vad::new(VadConfig::default(), 16000);
        let original = ton(440.0, 0.5, 256);
        let mut frame = original.clone();
        vad.process(&mut frame).unwrap();
        assert_eq!(frame, original);
    }

    #[test]
    fn zcr_sinus_niedrig() {
        let zcr = zero_crossing_rate(&ton(100.0, 1.0, 1600));
        assert!(zcr < 0.02, "ZCR {}", zcr);
        assert_eq!(zero_crossing_rate(&[0.5]), 0.0);
    }
}

//! DSP-Module fuer die Frame-Verarbeitung
//!
//! Alle Stufen implementieren das `DspStage` Trait. Eine Stufe arbeitet
//! in-place auf einem Frame und liefert einen Bericht; schlaegt sie fehl,
//! verwirft der `AudioProcessor` ihr Ergebnis und reicht den Eingang durch.

pub mod agc;
pub mod echo_cancel;
pub mod filter;
pub mod noise_suppression;
pub mod quality;
pub mod vad;

use realfft::num_complex::Complex;
use realfft::RealFftPlanner;

use crate::error::{AudioError, AudioResult};

/// Untergrenze fuer Logarithmen und Divisionen
pub const EPSILON: f32 = 1e-10;

/// Gemeinsames Trait fuer alle DSP-Stufen
///
/// Stufen sind Send, aber nicht Sync: ein Prozessor gehoert genau einem
/// Audio-Stream.
pub trait DspStage: Send {
    /// Stufenspezifischer Bericht
    type Report;

    /// Verarbeitet einen Frame in-place
    fn process(&mut self, samples: &mut [f32]) -> AudioResult<Self::Report>;

    /// Setzt den adaptiven Zustand zurueck
    fn reset(&mut self) {}
}

/// Lehnt leere Frames und nicht-endliche Samples ab
pub fn validate_frame(samples: &[f32]) -> AudioResult<()> {
    if samples.is_empty() {
        return Err(AudioError::UngueltigesFrame("leeres Frame".to_string()));
    }
    if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
        return Err(AudioError::UngueltigesFrame(format!(
            "nicht-endliches Sample an Position {}",
            pos
        )));
    }
    Ok(())
}

/// RMS eines Frames
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Spitzenwert (Betrag) eines Frames
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Standardabweichung eines Frames
pub fn std_dev(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / samples.len() as f32;
    var.sqrt()
}

/// Amplitude in dB (20·log10)
pub fn amplitude_db(value: f32) -> f32 {
    20.0 * (value + EPSILON).log10()
}

/// Leistungsverhaeltnis in dB (10·log10)
pub fn power_ratio_db(numerator: f32, denominator: f32) -> f32 {
    10.0 * ((numerator + EPSILON) / (denominator + EPSILON)).log10()
}

/// FFT-Helfer fuer reelle Frames
///
/// Haelt einen Planner, der Plaene pro Frame-Laenge zwischenspeichert.
pub struct SpectralAnalyzer {
    planner: RealFftPlanner<f32>,
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
        }
    }

    /// Vorwaerts-FFT: liefert `len / 2 + 1` komplexe Bins
    pub fn forward(&mut self, samples: &[f32]) -> AudioResult<Vec<Complex<f32>>> {
        if samples.is_empty() {
            return Err(AudioError::UngueltigesFrame("leeres Frame".to_string()));
        }
        let fft = self.planner.plan_fft_forward(samples.len());
        let mut input = samples.to_vec();
        let mut spectrum = fft.make_output_vec();
        fft.process(&mut input, &mut spectrum)
            .map_err(|e| AudioError::Dsp(e.to_string()))?;
        Ok(spectrum)
    }

    /// Betragsspektrum (`len / 2 + 1` Bins)
    pub fn magnitudes(&mut self, samples: &[f32]) -> AudioResult<Vec<f32>> {
        Ok(self.forward(samples)?.iter().map(|c| c.norm()).collect())
    }

    /// Inverse FFT mit Normierung auf die Frame-Laenge
    pub fn inverse(&mut self, spectrum: &mut [Complex<f32>], len: usize) -> AudioResult<Vec<f32>> {
        if len == 0 || spectrum.len() != len / 2 + 1 {
            return Err(AudioError::Dsp(format!(
                "Spektrum mit {} Bins passt nicht zu Laenge {}",
                spectrum.len(),
                len
            )));
        }
        // DC und Nyquist-Bin muessen fuer ein reelles Signal reell sein
        spectrum[0].im = 0.0;
        if len % 2 == 0 {
            if let Some(last) = spectrum.last_mut() {
                last.im = 0.0;
            }
        }

        let ifft = self.planner.plan_fft_inverse(len);
        let mut output = ifft.make_output_vec();
        ifft.process(spectrum, &mut output)
            .map_err(|e| AudioError::Dsp(e.to_string()))?;

        let scale = 1.0 / len as f32;
        for s in output.iter_mut() {
            *s *= scale;
        }
        Ok(output)
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frequenz eines FFT-Bins in Hz
pub fn bin_frequency(bin: usize, frame_len: usize, sample_rate: u32) -> f32 {
    bin as f32 * sample_rate as f32 / frame_len as f32
}

//! Qualitaetsmetriken eines verarbeiteten Frames
//!
//! Rein analytisch. Der THD-Wert ist eine Naeherung: die Grundfrequenz wird
//! per Spitzenwertsuche im unteren Viertel des Spektrums bestimmt.

use serde::Serialize;

use super::{peak, rms, validate_frame, SpectralAnalyzer, EPSILON};
use crate::error::{AudioError, AudioResult};

/// Obergrenze fuer SNR und Dynamikumfang in dB
pub const METRIC_CAP_DB: f32 = 60.0;

/// Anzahl betrachteter Oberwellen (2. bis 5.)
const HARMONICS: std::ops::RangeInclusive<usize> = 2..=5;

/// Qualitaetsmetriken eines Frames
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    /// Verarbeitetes Signal gegen Residuum (Original − Verarbeitet)
    pub snr_db: f32,
    /// Geschaetzte harmonische Verzerrung (Verhaeltnis, nicht Prozent)
    pub thd: f32,
    /// Verhaeltnis groesster zu kleinstem Betrag ungleich 0
    pub dynamic_range_db: f32,
    pub peak: f32,
    pub rms: f32,
}

/// Berechnet die Metriken von `processed` relativ zu `original`
pub fn measure(
    analyzer: &mut SpectralAnalyzer,
    original: &[f32],
    processed: &[f32],
) -> AudioResult<QualityMetrics> {
    validate_frame(processed)?;
    if original.len() != processed.len() {
        return Err(AudioError::Dsp(format!(
            "Laengen passen nicht: Original {} vs. verarbeitet {}",
            original.len(),
            processed.len()
        )));
    }

    Ok(QualityMetrics {
        snr_db: snr_db(original, processed),
        thd: total_harmonic_distortion(analyzer, processed)?,
        dynamic_range_db: dynamic_range_db(processed),
        peak: peak(processed),
        rms: rms(processed),
    })
}

/// SNR in dB, gedeckelt; ohne Residuum gilt der Deckel
pub fn snr_db(original: &[f32], processed: &[f32]) -> f32 {
    let n = processed.len().max(1) as f32;
    let signal = processed.iter().map(|s| s * s).sum::<f32>() / n;
    let residual = original
        .iter()
        .zip(processed)
        .map(|(o, p)| (o - p) * (o - p))
        .sum::<f32>()
        / n;

    if residual < EPSILON {
        return METRIC_CAP_DB;
    }
    (10.0 * ((signal + EPSILON) / residual).log10()).min(METRIC_CAP_DB)
}

/// THD-Schaetzung: Oberwellen 2–5 gegen die Grundwelle
pub fn total_harmonic_distortion(analyzer: &mut SpectralAnalyzer, samples: &[f32]) -> AudioResult<f32> {
    let mags = analyzer.magnitudes(samples)?;
    let search_end = (samples.len() / 4).min(mags.len());
    if search_end <= 1 {
        return Ok(0.0);
    }

    let Some((fundamental_bin, fundamental)) = mags[1..search_end]
        .iter()
        .enumerate()
        .map(|(i, m)| (i + 1, *m))
        .max_by(|a, b| a.1.total_cmp(&b.1))
    else {
        return Ok(0.0);
    };

    if fundamental < EPSILON {
        return Ok(0.0);
    }

    let harmonic_power: f32 = HARMONICS
        .map(|h| h * fundamental_bin)
        .take_while(|&bin| bin < mags.len())
        .map(|bin| mags[bin] * mags[bin])
        .sum();

    Ok(harmonic_power.sqrt() / fundamental)
}

/// Dynamikumfang in dB, gedeckelt; 0 ohne Samples ungleich 0
pub fn dynamic_range_db(samples: &[f32]) -> f32 {
    let (min, max) = samples
        .iter()
        .map(|s| s.abs())
        .filter(|a| *a > 0.0)
        .fold((f32::MAX, 0.0f32), |(lo, hi), a| (lo.min(a), hi.max(a)));

    if max <= 0.0 {
        return 0.0;
    }
    (20.0 * (max / min).log10()).min(METRIC_CAP_DB)
}

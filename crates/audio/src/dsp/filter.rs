//! Butterworth Hoch- und Tiefpass
//!
//! Kaskade aus Biquads (bilineare Transformation, RBJ-Koeffizienten) mit
//! Butterworth-Guete je Sektion. Gefiltert wird vorwaerts und rueckwaerts
//! (Nullphase), mit ungerader Spiegelung an den Raendern und
//! eingeschwungenem Anfangszustand. Die Frame-Laenge bleibt erhalten.
//! Jeder Frame wird unabhaengig gefiltert, es gibt keinen Zustand zwischen
//! Frames.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::{validate_frame, DspStage};
use crate::error::{AudioError, AudioResult};

/// Konfiguration der beiden Festfilter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Grenzfrequenz des Hochpasses in Hz
    pub high_pass_cutoff_hz: f32,
    /// Abstand der Tiefpass-Grenzfrequenz unter Nyquist in Hz
    pub low_pass_margin_hz: f32,
    /// Filterordnung (gerade, >= 2)
    pub order: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            high_pass_cutoff_hz: 80.0,
            low_pass_margin_hz: 1000.0,
            order: 4,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> AudioResult<()> {
        if self.order == 0 || self.order % 2 != 0 {
            return Err(AudioError::Konfiguration(format!(
                "Filterordnung muss gerade und > 0 sein, ist {}",
                self.order
            )));
        }
        if self.high_pass_cutoff_hz <= 0.0 {
            return Err(AudioError::Konfiguration(
                "Hochpass-Grenzfrequenz muss > 0 sein".to_string(),
            ));
        }
        if self.low_pass_margin_hz < 0.0 {
            return Err(AudioError::Konfiguration(
                "Tiefpass-Abstand darf nicht negativ sein".to_string(),
            ));
        }
        Ok(())
    }
}

/// Filtertyp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    HighPass,
    LowPass,
}

/// Bericht einer Filterstufe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterReport {
    pub kind: FilterKind,
    pub cutoff_hz: f32,
    pub order: usize,
}

/// Eine Biquad-Sektion (Transposed Direct Form II)
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn new(kind: FilterKind, cutoff_hz: f64, sample_rate: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match kind {
            FilterKind::LowPass => {
                let b = (1.0 - cos_w0) / 2.0;
                (b, 1.0 - cos_w0, b)
            }
            FilterKind::HighPass => {
                let b = (1.0 + cos_w0) / 2.0;
                (b, -(1.0 + cos_w0), b)
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Gleichanteil-Verstaerkung H(z=1)
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Setzt den Zustand so, als laege `x` schon unendlich lange an.
    /// Gibt den eingeschwungenen Ausgang zurueck.
    fn prime(&mut self, x: f64) -> f64 {
        let y = self.dc_gain() * x;
        self.z2 = self.b2 * x - self.a2 * y;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        y
    }

    #[inline]
    fn tick(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Butterworth-Filter gerader Ordnung als Biquad-Kaskade
#[derive(Debug, Clone)]
pub struct ButterworthFilter {
    kind: FilterKind,
    cutoff_hz: f32,
    order: usize,
    sections: Vec<Biquad>,
}

impl ButterworthFilter {
    /// Erstellt das Filter; die Grenzfrequenz muss in (0, Nyquist) liegen
    pub fn new(kind: FilterKind, cutoff_hz: f32, sample_rate: u32, order: usize) -> AudioResult<Self> {
        let nyquist = sample_rate as f32 / 2.0;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(AudioError::Konfiguration(format!(
                "Grenzfrequenz {} Hz ausserhalb (0, {}) Hz",
                cutoff_hz, nyquist
            )));
        }
        if order == 0 || order % 2 != 0 {
            return Err(AudioError::Konfiguration(format!(
                "Filterordnung muss gerade sein, ist {}",
                order
            )));
        }

        // Butterworth-Pole: Guete je Sektion aus den Polwinkeln
        let sections = (0..order / 2)
            .map(|k| {
                let theta = PI * (2 * k + 1) as f64 / (2 * order) as f64;
                let q = 1.0 / (2.0 * theta.cos());
                Biquad::new(kind, cutoff_hz as f64, sample_rate as f64, q)
            })
            .collect();

        Ok(Self {
            kind,
            cutoff_hz,
            order,
            sections,
        })
    }

    /// Hochpass nach Konfiguration
    pub fn high_pass(config: &FilterConfig, sample_rate: u32) -> AudioResult<Self> {
        Self::new(FilterKind::HighPass, config.high_pass_cutoff_hz, sample_rate, config.order)
    }

    /// Tiefpass bei Nyquist minus Abstand
    pub fn low_pass(config: &FilterConfig, sample_rate: u32) -> AudioResult<Self> {
        let cutoff = sample_rate as f32 / 2.0 - config.low_pass_margin_hz;
        Self::new(FilterKind::LowPass, cutoff, sample_rate, config.order)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    /// Ein Durchlauf durch die Kaskade, Zustand eingeschwungen auf `signal[0]`
    fn run(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };
        let mut sections = self.sections.clone();
        let mut x0 = first;
        for section in sections.iter_mut() {
            x0 = section.prime(x0);
        }
        for s in signal.iter_mut() {
            let mut v = *s;
            for section in sections.iter_mut() {
                v = section.tick(v);
            }
            *s = v;
        }
    }

    /// Nullphasen-Filterung (vorwaerts + rueckwaerts)
    pub fn filtfilt(&self, samples: &mut [f32]) {
        let n = samples.len();
        if n == 0 {
            return;
        }

        // Ungerade Spiegelung an beiden Raendern gegen Einschwingen
        let pad = (3 * (self.order + 1)).min(n - 1);
        let first = samples[0] as f64;
        let last = samples[n - 1] as f64;

        let mut ext = Vec::with_capacity(n + 2 * pad);
        for i in (1..=pad).rev() {
            ext.push(2.0 * first - samples[i] as f64);
        }
        ext.extend(samples.iter().map(|&s| s as f64));
        for i in 1..=pad {
            ext.push(2.0 * last - samples[n - 1 - i] as f64);
        }

        self.run(&mut ext);
        ext.reverse();
        self.run(&mut ext);
        ext.reverse();

        for (out, v) in samples.iter_mut().zip(ext[pad..pad + n].iter()) {
            *out = *v as f32;
        }
    }
}

impl DspStage for ButterworthFilter {
    type Report = FilterReport;

    fn process(&mut self, samples: &mut [f32]) -> AudioResult<FilterReport> {
        validate_frame(samples)?;
        self.filtfilt(samples);
        Ok(FilterReport {
            kind: self.kind,
            cutoff_hz: self.cutoff_hz,
            order: self.order,
        })
    }
}

//! AudioProcessor: zustandsbehaftete DSP-Kette fuer einen Audio-Stream
//!
//! Reihenfolge: Hochpass → Echo-Unterdrueckung → Rauschunterdrueckung →
//! AGC → VAD → Tiefpass → Qualitaetsmetriken. Jede Stufe laeuft auf einer
//! Kopie des Frames. Nur ein fehlerfreies, endliches Ergebnis wird
//! uebernommen; sonst wird der Fehler im Bericht vermerkt und der Frame
//! unveraendert weitergereicht.
//!
//! Ein Prozessor gehoert genau einem Stream. Rauschprofil, Echo-Historie
//! und Gain-Historie werden nicht synchronisiert; `process_audio` nimmt
//! `&mut self`, paralleler Zugriff braucht einen aeusseren Lock.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::ProcessingOptions;
use crate::dsp::agc::{Agc, AgcConfig, GainReport};
use crate::dsp::echo_cancel::{EchoCancelConfig, EchoCanceller, EchoReport};
use crate::dsp::filter::{ButterworthFilter, FilterConfig, FilterReport};
use crate::dsp::noise_suppression::{NoiseReport, NoiseSuppressionConfig, NoiseSuppressor};
use crate::dsp::quality::{self, QualityMetrics};
use crate::dsp::vad::{Vad, VadConfig, VoiceActivity};
use crate::dsp::{DspStage, SpectralAnalyzer};
use crate::error::{AudioError, AudioResult};

/// Konfiguration aller DSP-Stufen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub filter: FilterConfig,
    pub echo: EchoCancelConfig,
    pub noise: NoiseSuppressionConfig,
    pub agc: AgcConfig,
    pub vad: VadConfig,
}

impl ProcessorConfig {
    pub fn validate(&self) -> AudioResult<()> {
        self.filter.validate()?;
        self.echo.validate()?;
        self.noise.validate()?;
        self.agc.validate()?;
        self.vad.validate()
    }
}

/// Ergebnis einer einzelnen Stufe
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StageOutcome<T> {
    Applied(T),
    Failed { error: String },
}

impl<T> StageOutcome<T> {
    fn failed(err: &AudioError) -> Self {
        Self::Failed {
            error: err.to_string(),
        }
    }

    /// Bericht der Stufe, falls sie erfolgreich war
    pub fn applied(&self) -> Option<&T> {
        match self {
            Self::Applied(report) => Some(report),
            Self::Failed { .. } => None,
        }
    }

    /// Fehlermeldung, falls die Stufe fehlgeschlagen ist
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Applied(_) => None,
            Self::Failed { error } => Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Metadaten eines verarbeiteten Frames
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingReport {
    pub high_pass: StageOutcome<FilterReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo_cancellation: Option<StageOutcome<EchoReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_reduction: Option<StageOutcome<NoiseReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain_control: Option<StageOutcome<GainReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_activity: Option<StageOutcome<VoiceActivity>>,
    pub low_pass: StageOutcome<FilterReport>,
    pub quality: StageOutcome<QualityMetrics>,
    /// Nicht-endliche Samples, die am Ende durch 0.0 ersetzt wurden
    pub sanitized_samples: usize,
    pub processing_time_us: u64,
}

impl ProcessingReport {
    /// Anzahl fehlgeschlagener Stufen
    pub fn failed_stages(&self) -> usize {
        let pflicht = [
            self.high_pass.is_failed(),
            self.low_pass.is_failed(),
            self.quality.is_failed(),
        ];
        let optional = [
            self.echo_cancellation.as_ref().map(StageOutcome::is_failed),
            self.noise_reduction.as_ref().map(StageOutcome::is_failed),
            self.gain_control.as_ref().map(StageOutcome::is_failed),
            self.voice_activity.as_ref().map(StageOutcome::is_failed),
        ];
        pflicht.iter().filter(|f| **f).count()
            + optional.iter().filter(|f| **f == Some(true)).count()
    }

    /// Sprache erkannt (nur wenn die VAD lief und erfolgreich war)
    pub fn voice_detected(&self) -> Option<bool> {
        self.voice_activity
            .as_ref()
            .and_then(StageOutcome::applied)
            .map(|v| v.voice_detected)
    }
}

/// Verarbeiteter Frame mit Bericht
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub samples: Vec<f32>,
    pub report: ProcessingReport,
}

/// Zustandsbehaftete DSP-Kette
pub struct AudioProcessor {
    sample_rate: u32,
    config: ProcessorConfig,
    high_pass: Option<ButterworthFilter>,
    low_pass: Option<ButterworthFilter>,
    echo: EchoCanceller,
    noise: NoiseSuppressor,
    agc: Agc,
    vad: Vad,
    analyzer: SpectralAnalyzer,
}

impl AudioProcessor {
    /// Erstellt die Kette fuer eine Abtastrate
    ///
    /// Filter, deren Grenzfrequenz bei dieser Abtastrate ungueltig ist,
    /// werden nicht gebaut; ihre Stufe meldet dann pro Frame einen Fehler.
    pub fn new(sample_rate: u32, config: ProcessorConfig) -> AudioResult<Self> {
        if sample_rate == 0 {
            return Err(AudioError::Konfiguration(
                "Abtastrate muss > 0 sein".to_string(),
            ));
        }
        config.validate()?;

        let high_pass = Self::build_filter(ButterworthFilter::high_pass(&config.filter, sample_rate));
        let low_pass = Self::build_filter(ButterworthFilter::low_pass(&config.filter, sample_rate));

        debug!(
            sample_rate,
            hochpass = high_pass.is_some(),
            tiefpass = low_pass.is_some(),
            "AudioProcessor erstellt"
        );

        Ok(Self {
            sample_rate,
            echo: EchoCanceller::new(config.echo.clone(), sample_rate),
            noise: NoiseSuppressor::new(config.noise.clone()),
            agc: Agc::new(config.agc.clone()),
            vad: Vad::new(config.vad.clone(), sample_rate),
            analyzer: SpectralAnalyzer::new(),
            high_pass,
            low_pass,
            config,
        })
    }

    fn build_filter(result: AudioResult<ButterworthFilter>) -> Option<ButterworthFilter> {
        match result {
            Ok(filter) => Some(filter),
            Err(e) => {
                warn!("Filter nicht verfuegbar, Stufe wird uebersprungen: {}", e);
                None
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Verarbeitet einen Frame normalisierter Samples
    ///
    /// Liefert immer einen Frame gleicher Laenge mit ausschliesslich
    /// endlichen Samples. Fehler einzelner Stufen stehen im Bericht.
    pub fn process_audio(&mut self, frame: &[f32], options: ProcessingOptions) -> ProcessedFrame {
        let start = Instant::now();
        let mut samples = frame.to_vec();

        let high_pass = run_optional_filter(self.high_pass.as_mut(), &mut samples, "Hochpass");

        let echo_cancellation = options
            .echo_cancellation
            .then(|| run_stage(&mut self.echo, &mut samples, "Echo-Unterdrueckung"));

        let noise_reduction = options
            .noise_reduction
            .then(|| run_stage(&mut self.noise, &mut samples, "Rauschunterdrueckung"));

        let gain_control = options
            .gain_control
            .then(|| run_stage(&mut self.agc, &mut samples, "AGC"));

        let voice_activity = options.voice_activity.then(|| match self.vad.detect(&samples) {
            Ok(activity) => StageOutcome::Applied(activity),
            Err(e) => {
                warn!("Stufe VAD fehlgeschlagen: {}", e);
                StageOutcome::failed(&e)
            }
        });

        let low_pass = run_optional_filter(self.low_pass.as_mut(), &mut samples, "Tiefpass");

        let quality = match quality::measure(&mut self.analyzer, frame, &samples) {
            Ok(metrics) => StageOutcome::Applied(metrics),
            Err(e) => {
                warn!("Qualitaetsmetriken fehlgeschlagen: {}", e);
                StageOutcome::failed(&e)
            }
        };

        let mut sanitized_samples = 0;
        for s in samples.iter_mut() {
            if !s.is_finite() {
                *s = 0.0;
                sanitized_samples += 1;
            }
        }

        ProcessedFrame {
            samples,
            report: ProcessingReport {
                high_pass,
                echo_cancellation,
                noise_reduction,
                gain_control,
                voice_activity,
                low_pass,
                quality,
                sanitized_samples,
                processing_time_us: start.elapsed().as_micros() as u64,
            },
        }
    }

    /// Setzt Rauschprofil, Echo-Historie und Gain-Historie zurueck
    pub fn reset(&mut self) {
        self.echo.reset();
        self.noise.reset();
        self.agc.reset();
        self.vad.reset();
        debug!("AudioProcessor zurueckgesetzt");
    }

    pub fn noise_profile(&self) -> Option<&[f32]> {
        self.noise.profile()
    }

    pub fn gain_history(&self) -> Vec<f32> {
        self.agc.history()
    }

    pub fn echo_history_len(&self) -> usize {
        self.echo.history_len()
    }
}

/// Fuehrt eine Stufe auf einer Kopie aus und uebernimmt nur gueltige Ergebnisse
fn run_stage<S: DspStage>(stage: &mut S, samples: &mut Vec<f32>, name: &str) -> StageOutcome<S::Report> {
    let mut scratch = samples.clone();
    let result = stage.process(&mut scratch).and_then(|report| {
        if scratch.len() != samples.len() {
            return Err(AudioError::Dsp(format!(
                "Laenge geaendert: {} → {}",
                samples.len(),
                scratch.len()
            )));
        }
        if scratch.iter().any(|s| !s.is_finite()) {
            return Err(AudioError::Dsp("nicht-endliche Ausgabe".to_string()));
        }
        Ok(report)
    });

    match result {
        Ok(report) => {
            *samples = scratch;
            StageOutcome::Applied(report)
        }
        Err(e) => {
            warn!("Stufe {} fehlgeschlagen, Frame unveraendert: {}", name, e);
            StageOutcome::failed(&e)
        }
    }
}

fn run_optional_filter(
    filter: Option<&mut ButterworthFilter>,
    samples: &mut Vec<f32>,
    name: &str,
) -> StageOutcome<FilterReport> {
    match filter {
        Some(filter) => run_stage(filter, samples, name),
        None => StageOutcome::Failed {
            error: format!("{} bei dieser Abtastrate nicht verfuegbar", name),
        },
    }
}

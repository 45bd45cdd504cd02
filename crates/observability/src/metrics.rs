//! Prometheus-kompatible Metriken fuer modemvoice
//!
//! Registrierte Metriken:
//! - `modemvoice_recorded_seconds` – Gauge: Aufgenommene Sekunden
//! - `modemvoice_played_seconds` – Gauge: Wiedergegebene Sekunden
//! - `modemvoice_buffer_overruns` – Gauge: Verdraengte Buffer im Ring
//! - `modemvoice_buffer_underruns` – Gauge: Underruns der Ausgabe
//! - `modemvoice_processing_errors` – Gauge: Fehlerhafte Capture-Chunks
//! - `modemvoice_frames_captured` – Gauge: Verarbeitete Capture-Chunks
//! - `modemvoice_buffered_frames` – Gauge: Aktuell gepufferte Buffer
//! - `modemvoice_state` – Gauge (state): 1 fuer den aktuellen Zustand
//! - `modemvoice_voice_active` – Gauge: Sprache im letzten Frame
//! - `modemvoice_snr_db` – Gauge: SNR des letzten Frames
//! - `modemvoice_dsp_stage_failures_total` – Counter: Fehlgeschlagene DSP-Stufen
//! - `modemvoice_dsp_latency_seconds` – Histogram: Laufzeit der DSP-Kette
//!
//! Die Statistik-Werte sind kumulativ im Interface und werden hier nur
//! gespiegelt, deshalb Gauges statt Counter.

use anyhow::Result;
use modemvoice_audio::{AudioState, AudioStatus, ProcessingReport};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle modemvoice-Prometheus-Metriken
#[derive(Clone)]
pub struct AudioMetriken {
    pub registry: Arc<Registry>,

    // Interface-Statistiken
    pub recorded_seconds: Gauge,
    pub played_seconds: Gauge,
    pub buffer_overruns: IntGauge,
    pub buffer_underruns: IntGauge,
    pub processing_errors: IntGauge,
    pub frames_captured: IntGauge,
    pub buffered_frames: IntGauge,
    pub state: IntGaugeVec,

    // DSP-Metriken
    pub voice_active: IntGauge,
    pub snr_db: Gauge,
    pub dsp_stage_failures_total: IntCounter,
    pub dsp_latency_seconds: Histogram,
}

fn registrieren<M>(registry: &Registry, metrik: M) -> Result<M>
where
    M: prometheus::core::Collector + Clone + 'static,
{
    registry.register(Box::new(metrik.clone()))?;
    Ok(metrik)
}

impl AudioMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Interface-Statistiken ---
        let recorded_seconds = registrieren(
            &registry,
            Gauge::with_opts(Opts::new(
                "modemvoice_recorded_seconds",
                "Insgesamt aufgenommene Sekunden",
            ))?,
        )?;
        let played_seconds = registrieren(
            &registry,
            Gauge::with_opts(Opts::new(
                "modemvoice_played_seconds",
                "Insgesamt wiedergegebene Sekunden",
            ))?,
        )?;
        let buffer_overruns = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new(
                "modemvoice_buffer_overruns",
                "Aus dem vollen Ring verdraengte Buffer",
            ))?,
        )?;
        let buffer_underruns = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new(
                "modemvoice_buffer_underruns",
                "Underruns des Ausgabegeraets",
            ))?,
        )?;
        let processing_errors = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new(
                "modemvoice_processing_errors",
                "Capture-Chunks, die nicht verarbeitet werden konnten",
            ))?,
        )?;
        let frames_captured = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new(
                "modemvoice_frames_captured",
                "Verarbeitete Capture-Chunks",
            ))?,
        )?;
        let buffered_frames = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new(
                "modemvoice_buffered_frames",
                "Aktuell im Ring gepufferte Buffer",
            ))?,
        )?;
        let state = registrieren(
            &registry,
            IntGaugeVec::new(
                Opts::new("modemvoice_state", "Aktueller Zustand des Interfaces (1 = aktiv)"),
                &["state"],
            )?,
        )?;
        // Alle Zustaende vorbelegen, damit sie im Export erscheinen
        for s in AudioState::ALL {
            state.with_label_values(&[s.as_str()]).set(0);
        }

        // --- DSP-Metriken ---
        let voice_active = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new(
                "modemvoice_voice_active",
                "Sprache im zuletzt verarbeiteten Frame (0/1)",
            ))?,
        )?;
        let snr_db = registrieren(
            &registry,
            Gauge::with_opts(Opts::new(
                "modemvoice_snr_db",
                "SNR des zuletzt verarbeiteten Frames in dB",
            ))?,
        )?;
        let dsp_stage_failures_total = registrieren(
            &registry,
            IntCounter::with_opts(Opts::new(
                "modemvoice_dsp_stage_failures_total",
                "Fehlgeschlagene DSP-Stufen",
            ))?,
        )?;
        let dsp_latency_seconds = registrieren(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "modemvoice_dsp_latency_seconds",
                    "Laufzeit der DSP-Kette pro Frame in Sekunden",
                )
                .buckets(vec![0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05]),
            )?,
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            recorded_seconds,
            played_seconds,
            buffer_overruns,
            buffer_underruns,
            processing_errors,
            frames_captured,
            buffered_frames,
            state,
            voice_active,
            snr_db,
            dsp_stage_failures_total,
            dsp_latency_seconds,
        })
    }

    /// Spiegelt den Interface-Status in die Gauges
    pub fn aktualisieren(&self, status: &AudioStatus) {
        let stats = &status.statistics;
        self.recorded_seconds.set(stats.total_recorded_seconds);
        self.played_seconds.set(stats.total_played_seconds);
        self.buffer_overruns.set(stats.buffer_overruns as i64);
        self.buffer_underruns.set(stats.buffer_underruns as i64);
        self.processing_errors.set(stats.processing_errors as i64);
        self.frames_captured.set(stats.frames_captured as i64);
        self.buffered_frames.set(status.buffered_frames as i64);

        for s in AudioState::ALL {
            let aktiv = i64::from(s == status.state);
            self.state.with_label_values(&[s.as_str()]).set(aktiv);
        }
    }

    /// Uebernimmt Latenz, VAD-Entscheidung und SNR eines Frame-Berichts
    pub fn verarbeitung_beobachten(&self, report: &ProcessingReport) {
        self.dsp_latency_seconds
            .observe(report.processing_time_us as f64 / 1_000_000.0);
        self.dsp_stage_failures_total
            .inc_by(report.failed_stages() as u64);

        if let Some(sprache) = report.voice_detected() {
            self.voice_active.set(i64::from(sprache));
        }
        if let Some(metriken) = report.quality.applied() {
            self.snr_db.set(f64::from(metriken.snr_db));
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modemvoice_audio::{AudioProcessor, ProcessingOptions, ProcessorConfig};

    fn bericht(samples: &[f32]) -> ProcessingReport {
        let mut p = AudioProcessor::new(16000, ProcessorConfig::default()).unwrap();
        p.process_audio(samples, ProcessingOptions::all()).report
    }

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = AudioMetriken::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn bericht_wird_beobachtet() {
        let metriken = AudioMetriken::neu().unwrap();
        let ton: Vec<f32> = (0..512)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect();
        metriken.verarbeitung_beobachten(&bericht(&ton));

        assert_eq!(metriken.voice_active.get(), 1);
        assert_eq!(metriken.dsp_latency_seconds.get_sample_count(), 1);
        assert_eq!(metriken.dsp_stage_failures_total.get(), 0);
    }

    #[test]
    fn status_wird_gespiegelt() {
        use modemvoice_audio::{AudioInterface, InterfaceConfig, LoopbackBackend};
        use std::sync::Arc;

        let backend = LoopbackBackend::new();
        let mut iface = AudioInterface::new(InterfaceConfig::default(), Arc::new(backend.clone()));
        assert!(iface.initialize());
        assert!(iface.start_recording(None));
        assert!(backend.inject(&vec![0u8; 1024]));

        let metriken = AudioMetriken::neu().unwrap();
        metriken.aktualisieren(&iface.get_audio_status());
        assert_eq!(metriken.frames_captured.get(), 1);
        assert_eq!(metriken.buffered_frames.get(), 1);
        assert_eq!(metriken.state.with_label_values(&["recording"]).get(), 1);
        assert_eq!(metriken.state.with_label_values(&["idle"]).get(), 0);
        assert!((metriken.recorded_seconds.get() - 0.032).abs() < 1e-9);
    }

    #[test]
    fn fehlgeschlagene_stufen_werden_gezaehlt() {
        let metriken = AudioMetriken::neu().unwrap();
        metriken.verarbeitung_beobachten(&bericht(&[f32::NAN; 64]));
        assert!(metriken.dsp_stage_failures_total.get() > 0);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = AudioMetriken::neu().unwrap();
        metriken.buffer_overruns.set(3);

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("modemvoice_buffer_overruns 3"));
        assert!(output.contains("modemvoice_state{state=\"idle\"}"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = AudioMetriken::neu().unwrap();
        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "modemvoice_recorded_seconds",
            "modemvoice_played_seconds",
            "modemvoice_buffer_overruns",
            "modemvoice_buffer_underruns",
            "modemvoice_processing_errors",
            "modemvoice_frames_captured",
            "modemvoice_buffered_frames",
            "modemvoice_state",
            "modemvoice_voice_active",
            "modemvoice_snr_db",
            "modemvoice_dsp_stage_failures_total",
            "modemvoice_dsp_latency_seconds",
        ] {
            assert!(namen.contains(&name), "{} fehlt", name);
        }
    }
}

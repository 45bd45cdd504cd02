//! modemvoice-daemon – Bibliotheks-Root
//!
//! Fuehrt eine Aufnahme-Sitzung ueber das AudioInterface aus und stellt
//! den Einstiegspunkt fuer Integrationstests bereit.

pub mod config;
pub mod leitung;

use anyhow::{Context, Result};
use config::DaemonConfig;
use modemvoice_audio::{AudioBackend, AudioBuffer, AudioConsumer, AudioInterface};
use modemvoice_observability::AudioMetriken;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Ergebnis einer beendeten Sitzung
#[derive(Debug, Clone, Default)]
pub struct SitzungsErgebnis {
    /// Anzahl aufgenommener Capture-Chunks
    pub frames: u64,
    /// Exportierte Sekunden (0 ohne Export)
    pub exportierte_sekunden: f64,
}

/// Haelt die Konfiguration einer Aufnahme-Sitzung zusammen
pub struct Sitzung {
    pub config: DaemonConfig,
}

impl Sitzung {
    /// Erstellt eine neue Sitzung aus der gegebenen Konfiguration
    pub fn neu(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Laeuft bis zum Ablauf der Dauer oder bis Ctrl-C
    ///
    /// Reihenfolge:
    /// 1. Backend waehlen (Hardware oder simulierte Leitung)
    /// 2. Interface initialisieren und Aufnahme starten
    /// 3. Optional die Ansage abspielen
    /// 4. Periodisch Status und Metriken fortschreiben
    /// 5. Stoppen, Puffer als WAV exportieren, aufraeumen
    pub async fn starten(self) -> Result<SitzungsErgebnis> {
        let metriken = AudioMetriken::neu()?;
        let (backend, leitung) = self.backend_erstellen();

        let mut iface = AudioInterface::new(self.config.interface_config(), backend);
        if !iface.initialize() {
            anyhow::bail!("AudioInterface konnte nicht initialisiert werden");
        }

        if !iface.start_recording(Some(consumer(metriken.clone()))) {
            iface.cleanup();
            anyhow::bail!("Aufnahme konnte nicht gestartet werden");
        }
        let leitung = leitung.map(|l| l.starten(self.config.audio));

        if let Some(pfad) = &self.config.sitzung.ansage_datei {
            if let Err(e) = ansage_abspielen(&mut iface, pfad) {
                tracing::warn!(pfad = %pfad, "Ansage wird uebersprungen: {e:#}");
            }
        }

        self.warten(&iface, &metriken).await;

        if let Some(leitung) = leitung {
            leitung.stoppen();
        }
        iface.stop_playback();
        iface.stop_recording();
        metriken.aktualisieren(&iface.get_audio_status());

        let exportierte_sekunden = match &self.config.sitzung.aufnahme_datei {
            Some(pfad) => puffer_exportieren(&iface, pfad).unwrap_or_else(|e| {
                tracing::error!(pfad = %pfad, "WAV-Export fehlgeschlagen: {e:#}");
                0.0
            }),
            None => 0.0,
        };

        let statistik = iface.statistics();
        tracing::info!(
            aufgenommen_s = statistik.total_recorded_seconds,
            wiedergegeben_s = statistik.total_played_seconds,
            overruns = statistik.buffer_overruns,
            underruns = statistik.buffer_underruns,
            fehler = statistik.processing_errors,
            "Sitzung beendet"
        );
        match metriken.exportieren() {
            Ok(text) => tracing::debug!("Metriken:\n{text}"),
            Err(e) => tracing::warn!("Metriken-Export fehlgeschlagen: {e}"),
        }

        iface.cleanup();
        Ok(SitzungsErgebnis {
            frames: statistik.frames_captured,
            exportierte_sekunden,
        })
    }

    fn backend_erstellen(&self) -> (Arc<dyn AudioBackend>, Option<leitung::SimulierteLeitung>) {
        #[cfg(feature = "hardware")]
        if !self.config.sitzung.simulierte_leitung {
            tracing::info!("Verwende Audio-Hardware (cpal)");
            return (Arc::new(modemvoice_audio::CpalBackend::new()), None);
        }

        tracing::info!("Verwende simulierte Leitung");
        let leitung = leitung::SimulierteLeitung::neu();
        (Arc::new(leitung.backend()), Some(leitung))
    }

    /// Schreibt periodisch den Status fort, bis Dauer oder Ctrl-C erreicht sind
    async fn warten(&self, iface: &AudioInterface, metriken: &AudioMetriken) {
        let sitzung = &self.config.sitzung;
        let dauer = sitzung.dauer_sekunden.map(Duration::from_secs);
        let ende = async {
            match dauer {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(ende);

        let mut intervall =
            tokio::time::interval(Duration::from_millis(sitzung.status_intervall_ms.max(100)));
        intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(dauer_s = ?sitzung.dauer_sekunden, "Sitzung laeuft");
        loop {
            tokio::select! {
                _ = &mut ende => {
                    tracing::info!("Sitzungsdauer erreicht");
                    break;
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::warn!("Ctrl-C-Handler nicht verfuegbar: {e}");
                    }
                    tracing::info!("Shutdown-Signal empfangen, Sitzung wird beendet");
                    break;
                }
                _ = intervall.tick() => {
                    let status = iface.get_audio_status();
                    metriken.aktualisieren(&status);
                    tracing::info!(
                        zustand = status.state.as_str(),
                        aufgenommen_s = status.statistics.total_recorded_seconds,
                        gepuffert = status.buffered_frames,
                        overruns = status.statistics.buffer_overruns,
                        fehler = status.statistics.processing_errors,
                        "Status"
                    );
                }
            }
        }
    }
}

/// Consumer, der VAD-Wechsel protokolliert und Metriken fortschreibt
fn consumer(metriken: AudioMetriken) -> AudioConsumer {
    let mut letzte_sprache: Option<bool> = None;
    Box::new(move |buffer: &AudioBuffer| {
        let Some(report) = buffer.report() else {
            return;
        };
        metriken.verarbeitung_beobachten(report);

        let sprache = report.voice_detected();
        if sprache.is_some() && sprache != letzte_sprache {
            tracing::info!(
                sprache = sprache.unwrap_or(false),
                zeitstempel = %buffer.timestamp(),
                "Sprachaktivitaet geaendert"
            );
            letzte_sprache = sprache;
        }
        if report.failed_stages() > 0 {
            tracing::debug!(stufen = report.failed_stages(), "DSP-Stufen fehlgeschlagen");
        }
    })
}

/// Laedt eine WAV-Datei und spielt sie im Interface-Format ab
fn ansage_abspielen(iface: &mut AudioInterface, pfad: &str) -> Result<()> {
    let ansage = AudioBuffer::load_from_file(pfad)
        .with_context(|| format!("Ansage '{pfad}' nicht lesbar"))?;
    let audio = iface.config().audio;
    if ansage.sample_rate() != audio.sample_rate || ansage.channels() != audio.channels {
        anyhow::bail!(
            "Ansage hat {}Hz/{}ch, erwartet {}Hz/{}ch",
            ansage.sample_rate(),
            ansage.channels(),
            audio.sample_rate,
            audio.channels
        );
    }
    if !iface.start_playback(&ansage.to_bytes_as(audio.format)) {
        anyhow::bail!("Wiedergabe wurde abgelehnt");
    }
    tracing::info!(pfad = %pfad, dauer_s = ansage.duration_secs(), "Ansage gestartet");
    Ok(())
}

/// Exportiert alle gepufferten Buffer als eine WAV-Datei
fn puffer_exportieren(iface: &AudioInterface, pfad: impl AsRef<Path>) -> Result<f64> {
    let pfad = pfad.as_ref();
    let Some(aufnahme) = AudioBuffer::concat(&iface.buffered_audio())? else {
        tracing::info!("Puffer leer, kein WAV-Export");
        return Ok(0.0);
    };
    aufnahme.save_to_file(pfad)?;
    tracing::info!(
        pfad = %pfad.display(),
        dauer_s = aufnahme.duration_secs(),
        "Puffer als WAV exportiert"
    );
    Ok(aufnahme.duration_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kurze_sitzung(pfad: &Path) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.sitzung.dauer_sekunden = Some(1);
        config.sitzung.status_intervall_ms = 200;
        config.sitzung.simulierte_leitung = true;
        config.sitzung.aufnahme_datei = Some(pfad.to_string_lossy().into_owned());
        config
    }

    #[tokio::test]
    async fn sitzung_mit_simulierter_leitung() {
        let dir = tempfile::tempdir().expect("Temp-Verzeichnis konnte nicht erstellt werden");
        let pfad = dir.path().join("aufnahme.wav");

        let ergebnis = Sitzung::neu(kurze_sitzung(&pfad)).starten().await.unwrap();
        assert!(ergebnis.frames > 0, "Leitung sollte Chunks liefern");
        assert!(ergebnis.exportierte_sekunden > 0.0);

        let geladen = AudioBuffer::load_from_file(&pfad).unwrap();
        assert_eq!(geladen.sample_rate(), 16000);
        assert!(!geladen.samples().is_empty());
    }

    #[tokio::test]
    async fn fehlende_ansage_bricht_nicht_ab() {
        let dir = tempfile::tempdir().expect("Temp-Verzeichnis konnte nicht erstellt werden");
        let mut config = kurze_sitzung(&dir.path().join("aufnahme.wav"));
        config.sitzung.ansage_datei = Some(dir.path().join("fehlt.wav").to_string_lossy().into_owned());

        let ergebnis = Sitzung::neu(config).starten().await.unwrap();
        assert!(ergebnis.frames > 0);
    }

    #[tokio::test]
    async fn ansage_wird_abgespielt() {
        let dir = tempfile::tempdir().expect("Temp-Verzeichnis konnte nicht erstellt werden");
        let ansage = dir.path().join("ansage.wav");
        AudioBuffer::new(vec![0.1; 1600], 16000, 1).save_to_file(&ansage).unwrap();

        let mut config = kurze_sitzung(&dir.path().join("aufnahme.wav"));
        config.sitzung.ansage_datei = Some(ansage.to_string_lossy().into_owned());
        config.sitzung.aufnahme_datei = None;

        let ergebnis = Sitzung::neu(config).starten().await.unwrap();
        assert_eq!(ergebnis.exportierte_sekunden, 0.0);
    }

    #[tokio::test]
    async fn ungueltige_konfiguration_schlaegt_fehl() {
        let mut config = DaemonConfig::default();
        config.audio.channels = 5;
        config.sitzung.simulierte_leitung = true;
        assert!(Sitzung::neu(config).starten().await.is_err());
    }
}

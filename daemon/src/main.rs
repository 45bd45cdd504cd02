//! modemvoice – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet eine
//! Aufnahme-Sitzung.

use anyhow::Result;
use modemvoice_daemon::{config::DaemonConfig, Sitzung};
use modemvoice_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad =
        std::env::var("MODEMVOICE_CONFIG").unwrap_or_else(|_| "modemvoice.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = DaemonConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "modemvoice wird initialisiert"
    );

    let ergebnis = Sitzung::neu(config).starten().await?;
    tracing::info!(
        frames = ergebnis.frames,
        exportiert_s = ergebnis.exportierte_sekunden,
        "modemvoice beendet"
    );

    Ok(())
}

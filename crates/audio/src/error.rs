//! Fehlertypen fuer den Audio-Kern

use thiserror::Error;

/// Alle moeglichen Fehler des Audio-Kerns
///
/// Oeffentliche Lebenszyklus-Methoden von `AudioInterface` geben `bool`
/// zurueck; diese Fehler werden intern weitergereicht und an der Grenze
/// geloggt.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Ungueltiges Frame: {0}")]
    UngueltigesFrame(String),

    #[error("DSP-Fehler: {0}")]
    Dsp(String),

    #[error("PCM-Formatfehler: {0}")]
    FormatFehler(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Wiedergabe laeuft bereits")]
    WiedergabeAktiv,

    #[error("Audio-Interface nicht initialisiert")]
    NichtInitialisiert,

    #[error("WAV-Fehler: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;

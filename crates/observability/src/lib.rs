//! # modemvoice-observability
//!
//! Observability-Crate fuer modemvoice:
//! - Prometheus-kompatible Metriken fuer Interface-Statistiken und DSP-Laufzeit
//! - Structured Logging (Text oder JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::AudioMetriken;

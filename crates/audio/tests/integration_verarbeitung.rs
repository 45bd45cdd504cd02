//! Integration-Tests fuer die DSP-Kette des AudioProcessor

use modemvoice_audio::{AudioProcessor, ProcessingOptions, ProcessorConfig};

const RATE: u32 = 16000;
const FRAME: usize = 512;

fn prozessor() -> AudioProcessor {
    AudioProcessor::new(RATE, ProcessorConfig::default()).expect("Prozessor konnte nicht erstellt werden")
}

/// Ton mit deterministischem Pseudo-Rauschen, phasenstetig ueber Frames
fn verrauschter_ton(frame_index: usize, amp: f32) -> Vec<f32> {
    let mut seed = 0x2545_f491_u32.wrapping_add(frame_index as u32);
    (0..FRAME)
        .map(|i| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let rauschen = ((seed >> 16) as f32 / 32768.0 - 1.0) * 0.01;
            let t = (frame_index * FRAME + i) as f32 / RATE as f32;
            amp * (2.0 * std::f32::consts::PI * 440.0 * t).sin() + rauschen
        })
        .collect()
}

#[test]
fn kette_ueber_viele_frames() {
    let mut p = prozessor();
    for index in 0..30 {
        let frame = verrauschter_ton(index, 0.3);
        let out = p.process_audio(&frame, ProcessingOptions::all());
        assert_eq!(out.samples.len(), FRAME);
        assert!(out.samples.iter().all(|s| s.is_finite()));
        assert_eq!(out.report.failed_stages(), 0, "Frame {}: {:?}", index, out.report);
        assert_eq!(out.report.sanitized_samples, 0);
    }

    assert!(p.noise_profile().is_some_and(|profil| !profil.is_empty()));
    assert_eq!(p.gain_history().len(), 30);
    assert!(p.echo_history_len() > 0);
    assert!(p.echo_history_len() <= RATE as usize);
}

#[test]
fn gain_historie_ist_begrenzt() {
    let mut p = prozessor();
    for index in 0..130 {
        p.process_audio(&verrauschter_ton(index, 0.05), ProcessingOptions::all());
    }
    assert_eq!(p.gain_history().len(), 100);
}

#[test]
fn leiser_ton_wird_angehoben() {
    let mut p = prozessor();
    let mut letzter_gain_db = 0.0;
    for index in 0..60 {
        let out = p.process_audio(&verrauschter_ton(index, 0.01), ProcessingOptions::all());
        let gain = out.report.gain_control.as_ref().and_then(|g| g.applied()).unwrap();
        letzter_gain_db = gain.gain_db;
    }
    assert!(letzter_gain_db > 6.0, "Gain nur {} dB", letzter_gain_db);
}

#[test]
fn sprache_und_stille_werden_unterschieden() {
    let mut p = prozessor();
    let ton = p.process_audio(&verrauschter_ton(0, 0.5), ProcessingOptions::all());
    assert_eq!(ton.report.voice_detected(), Some(true));

    p.reset();
    let stille = p.process_audio(&vec![0.0; FRAME], ProcessingOptions::all());
    assert_eq!(stille.report.voice_detected(), Some(false));
}

#[test]
fn fehlerhafte_frames_degradieren() {
    let mut p = prozessor();
    let mut frame = verrauschter_ton(0, 0.3);
    frame[7] = f32::NAN;
    frame[100] = f32::INFINITY;

    let out = p.process_audio(&frame, ProcessingOptions::all());
    assert_eq!(out.samples.len(), FRAME);
    assert!(out.samples.iter().all(|s| s.is_finite()));
    assert!(out.report.failed_stages() > 0);
    assert!(out.report.quality.is_failed());

    // Danach laeuft die Kette normal weiter
    let out = p.process_audio(&verrauschter_ton(1, 0.3), ProcessingOptions::all());
    assert_eq!(out.report.failed_stages(), 0);
}

#[test]
fn ohne_optionen_nur_filter_und_metriken() {
    let mut p = prozessor();
    let out = p.process_audio(&verrauschter_ton(0, 0.3), ProcessingOptions::none());
    assert!(out.report.echo_cancellation.is_none());
    assert!(out.report.noise_reduction.is_none());
    assert!(out.report.gain_control.is_none());
    assert!(out.report.voice_activity.is_none());
    assert!(out.report.high_pass.applied().is_some());
    assert!(out.report.low_pass.applied().is_some());

    let json = serde_json::to_value(&out.report).unwrap();
    assert!(json.get("echo_cancellation").is_none());
    assert!(json["quality"]["snr_db"].is_number());
    assert_eq!(json["high_pass"]["cutoff_hz"], 80.0);
}

#[test]
fn zuruecksetzen_leert_zustand() {
    let mut p = prozessor();
    for index in 0..5 {
        p.process_audio(&verrauschter_ton(index, 0.3), ProcessingOptions::all());
    }
    p.reset();
    assert!(p.noise_profile().is_none());
    assert!(p.gain_history().is_empty());
    assert_eq!(p.echo_history_len(), 0);
}

#[test]
fn niedrige_abtastrate_ohne_tiefpass() {
    // Nyquist 1000 Hz, Tiefpass-Grenze waere 0 Hz
    let mut p = AudioProcessor::new(2000, ProcessorConfig::default()).unwrap();
    let out = p.process_audio(&vec![0.1; 256], ProcessingOptions::all());
    assert!(out.report.low_pass.is_failed());
    assert_eq!(out.samples.len(), 256);
}

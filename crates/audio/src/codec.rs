//! PCM-Konvertierung zwischen Geraete-Bytes und normalisierten f32-Samples
//!
//! Alle Integer-Formate sind little-endian und werden auf [-1.0, 1.0)
//! normalisiert. Beim Kodieren wird auf [-1.0, 1.0] begrenzt.

use crate::config::SampleFormat;
use crate::error::{AudioError, AudioResult};

const PCM16_SCALE: f32 = 32768.0;
const PCM24_SCALE: f32 = 8_388_608.0;
const PCM32_SCALE: f64 = 2_147_483_648.0;

/// Dekodiert interleaved PCM-Bytes zu normalisierten Samples
///
/// Eine Byte-Laenge die kein Vielfaches der Sample-Breite ist, gilt als
/// Strukturfehler.
pub fn decode_pcm(bytes: &[u8], format: SampleFormat) -> AudioResult<Vec<f32>> {
    let width = format.bytes_per_sample();
    if bytes.len() % width != 0 {
        return Err(AudioError::FormatFehler(format!(
            "{} Bytes sind kein Vielfaches der Sample-Breite {} ({:?})",
            bytes.len(),
            width,
            format
        )));
    }

    let samples = match format {
        SampleFormat::Pcm16 => bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / PCM16_SCALE)
            .collect(),
        SampleFormat::Pcm24 => bytes
            .chunks_exact(3)
            .map(|b| {
                // Vorzeichen erweitern: 24 Bit in die oberen Bytes schieben
                let raw = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                raw as f32 / PCM24_SCALE
            })
            .collect(),
        SampleFormat::Pcm32 => bytes
            .chunks_exact(4)
            .map(|b| (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / PCM32_SCALE) as f32)
            .collect(),
        SampleFormat::Float32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    };
    Ok(samples)
}

/// Kodiert normalisierte Samples zu interleaved PCM-Bytes
pub fn encode_pcm(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    for &s in samples {
        let s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
        match format {
            SampleFormat::Pcm16 => {
                let v = (s * (PCM16_SCALE - 1.0)).round() as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
            SampleFormat::Pcm24 => {
                let v = (s * (PCM24_SCALE - 1.0)).round() as i32;
                let b = v.to_le_bytes();
                out.extend_from_slice(&b[..3]);
            }
            SampleFormat::Pcm32 => {
                let v = (s as f64 * (PCM32_SCALE - 1.0)).round() as i32;
                out.extend_from_slice(&v.to_le_bytes());
            }
            SampleFormat::Float32 => out.extend_from_slice(&s.to_le_bytes()),
        }
    }
    out
}

/// Mischt interleaved Mehrkanal-Samples zu Mono (Mittelwert je Frame)
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_bekannte_werte() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0x00, 0x00];
        let samples = decode_pcm(&bytes, SampleFormat::Pcm16).unwrap();
        assert_eq!(samples, vec![0.5, -0.5, 0.0]);
    }

    #[test]
    fn pcm24_vorzeichen_erweitert() {
        // -1 als 24-Bit-Wert
        let bytes = [0xFF, 0xFF, 0xFF];
        let samples = decode_pcm(&bytes, SampleFormat::Pcm24).unwrap();
        assert!((samples[0] + 1.0 / PCM24_SCALE).abs() < 1e-9);

        // Halbe Vollaussteuerung positiv
        let bytes = [0x00, 0x00, 0x40];
        let samples = decode_pcm(&bytes, SampleFormat::Pcm24).unwrap();
        assert!((samples[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn alle_formate_behalten_werte() {
        let original = vec![0.0f32, 0.25, -0.25, 0.9, -0.9];
        for format in [
            SampleFormat::Pcm16,
            SampleFormat::Pcm24,
            SampleFormat::Pcm32,
            SampleFormat::Float32,
        ] {
            let bytes = encode_pcm(&original, format);
            assert_eq!(bytes.len(), original.len() * format.bytes_per_sample());
            let decoded = decode_pcm(&bytes, format).unwrap();
            for (a, b) in original.iter().zip(decoded.iter()) {
                assert!((a - b).abs() < 1e-4, "{:?}: {} != {}", format, a, b);
            }
        }
    }

    #[test]
    fn ungerade_byte_laenge_ist_fehler() {
        assert!(decode_pcm(&[0u8; 3], SampleFormat::Pcm16).is_err());
        assert!(decode_pcm(&[0u8; 4], SampleFormat::Pcm24).is_err());
        assert!(decode_pcm(&[0u8; 6], SampleFormat::Float32).is_err());
    }

    #[test]
    fn kodieren_begrenzt_und_ersetzt_nan() {
        let bytes = encode_pcm(&[2.0, -2.0, f32::NAN], SampleFormat::Pcm16);
        let decoded = decode_pcm(&bytes, SampleFormat::Pcm16).unwrap();
        assert!((decoded[0] - 1.0).abs() < 1e-3);
        assert!((decoded[1] + 1.0).abs() < 1e-3);
        assert_eq!(decoded[2], 0.0);
    }

    #[test]
    fn downmix_stereo() {
        let mono = downmix_to_mono(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }
}

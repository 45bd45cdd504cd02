//! Audio-Playback via cpal
//!
//! `write` dekodiert einen PCM-Chunk und schiebt die Samples in einen
//! lock-free Ring-Buffer; der cpal-Callback liest daraus. Fehlen dem
//! Callback waehrend laufender Wiedergabe Samples, zaehlt das als Underrun.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use crossbeam_channel::{bounded, Sender};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{find_device, stream_config, Direction, OPEN_TIMEOUT};
use crate::backend::OutputStream;
use crate::codec::decode_pcm;
use crate::config::AudioConfig;
use crate::error::{AudioError, AudioResult};

/// Ring-Buffer Kapazitaet in Chunks
const RING_CHUNKS: usize = 8;
/// Maximale Wartezeit ohne Fortschritt beim Schreiben oder Leerlaufen
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Zustand, den Callback und Schreiber teilen
#[derive(Default)]
struct PlaybackShared {
    /// Wiedergabe laeuft: fehlende Samples zaehlen als Underrun
    streaming: AtomicBool,
    underruns: AtomicU64,
}

/// Laufender cpal-Playback
pub(crate) struct CpalOutput {
    producer: HeapProd<f32>,
    format: crate::config::SampleFormat,
    shared: Arc<PlaybackShared>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// Oeffnet den Playback-Stream in einem eigenen Halte-Thread
pub(crate) fn open(index: usize, config: AudioConfig) -> AudioResult<CpalOutput> {
    let capacity = (config.chunk_size * config.channels as usize * RING_CHUNKS).max(1);
    let rb = HeapRb::<f32>::new(capacity);
    let (producer, consumer) = rb.split();
    let shared = Arc::new(PlaybackShared::default());

    let (ready_tx, ready_rx) = bounded::<AudioResult<()>>(1);
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let thread_shared = Arc::clone(&shared);

    let handle = std::thread::Builder::new()
        .name("modemvoice-output".to_string())
        .spawn(move || {
            let stream = match build_stream(index, &config, consumer, thread_shared) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::StreamFehler(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
            debug!("Playback-Halte-Thread beendet");
        })
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    match ready_rx.recv_timeout(OPEN_TIMEOUT) {
        Ok(Ok(())) => {
            info!(
                index,
                sample_rate = config.sample_rate,
                channels = config.channels,
                "Playback-Stream geoeffnet"
            );
            Ok(CpalOutput {
                producer,
                format: config.format,
                shared,
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            })
        }
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = stop_tx.send(());
            Err(AudioError::Zeitlimit(
                "Playback-Stream meldet keine Bereitschaft".to_string(),
            ))
        }
    }
}

/// Liest Samples fuer den Callback; fehlende werden mit Stille gefuellt
fn fill(consumer: &mut HeapCons<f32>, out: &mut [f32], shared: &PlaybackShared) {
    let read = consumer.pop_slice(out);
    if read < out.len() {
        out[read..].fill(0.0);
        if shared.streaming.load(Ordering::Relaxed) {
            shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn build_stream(
    index: usize,
    config: &AudioConfig,
    mut consumer: HeapCons<f32>,
    shared: Arc<PlaybackShared>,
) -> AudioResult<Stream> {
    let device = find_device(Direction::Output, index)?;
    let stream_config = stream_config(config);
    let err_fn = |err| error!("Playback-Fehler: {}", err);

    let sample_format = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
                && c.channels() >= config.channels
        })
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _| fill(&mut consumer, data, &shared),
            err_fn,
            None,
        ),
        SampleFormat::I16 => {
            let mut float_buf = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _| {
                    float_buf.resize(data.len(), 0.0);
                    fill(&mut consumer, &mut float_buf, &shared);
                    for (out, s) in data.iter_mut().zip(float_buf.iter()) {
                        *out = (*s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I32 => {
            let mut float_buf = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i32], _| {
                    float_buf.resize(data.len(), 0.0);
                    fill(&mut consumer, &mut float_buf, &shared);
                    for (out, s) in data.iter_mut().zip(float_buf.iter()) {
                        *out = (s.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    Ok(stream)
}

impl CpalOutput {
    fn shutdown(&mut self) -> AudioResult<()> {
        self.shared.streaming.store(false, Ordering::Relaxed);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| AudioError::StreamFehler("Playback-Thread ist abgestuerzt".to_string()))?;
        }
        Ok(())
    }
}

impl OutputStream for CpalOutput {
    fn write(&mut self, chunk: &[u8]) -> AudioResult<()> {
        let samples = decode_pcm(chunk, self.format)?;
        self.shared.streaming.store(true, Ordering::Relaxed);

        let mut rest = samples.as_slice();
        let mut last_progress = Instant::now();
        while !rest.is_empty() {
            let pushed = self.producer.push_slice(rest);
            if pushed > 0 {
                rest = &rest[pushed..];
                last_progress = Instant::now();
            } else if last_progress.elapsed() > STALL_TIMEOUT {
                return Err(AudioError::Zeitlimit(
                    "Ausgabegeraet nimmt keine Samples an".to_string(),
                ));
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(())
    }

    fn close(&mut self) -> AudioResult<()> {
        // Puffer auslaufen lassen
        let start = Instant::now();
        while self.producer.occupied_len() > 0 {
            if start.elapsed() > STALL_TIMEOUT {
                warn!(
                    rest = self.producer.occupied_len(),
                    "Playback-Puffer lief nicht vollstaendig aus"
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        self.shutdown()
    }

    fn take_underruns(&mut self) -> u64 {
        self.shared.underruns.swap(0, Ordering::Relaxed)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

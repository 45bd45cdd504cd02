//! Mikrofon-Capture via cpal
//!
//! Der cpal-Callback liefert Puffer beliebiger Groesse. Der
//! `ChunkAssembler` sammelt sie zu Chunks von genau `chunk_size` Frames
//! und kodiert jeden Chunk im konfigurierten PCM-Format.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use crossbeam_channel::{bounded, Sender};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use super::{find_device, stream_config, Direction, OPEN_TIMEOUT};
use crate::backend::{CaptureCallback, InputStream, StreamControl};
use crate::codec::encode_pcm;
use crate::config::{self, AudioConfig};
use crate::error::{AudioError, AudioResult};

/// Setzt Geraete-Puffer zu festen Chunks zusammen
pub(crate) struct ChunkAssembler {
    pending: Vec<f32>,
    samples_per_chunk: usize,
    format: config::SampleFormat,
    callback: CaptureCallback,
    abort_tx: Sender<()>,
    aborted: bool,
}

impl ChunkAssembler {
    pub(crate) fn new(config: &AudioConfig, callback: CaptureCallback, abort_tx: Sender<()>) -> Self {
        let samples_per_chunk = config.chunk_size * config.channels as usize;
        Self {
            pending: Vec::with_capacity(samples_per_chunk * 2),
            samples_per_chunk,
            format: config.format,
            callback,
            abort_tx,
            aborted: false,
        }
    }

    /// Nimmt normalisierte Samples entgegen und liefert volle Chunks aus
    pub(crate) fn feed<I: IntoIterator<Item = f32>>(&mut self, samples: I) {
        if self.aborted {
            return;
        }
        self.pending.extend(samples);

        while self.pending.len() >= self.samples_per_chunk {
            let bytes = encode_pcm(&self.pending[..self.samples_per_chunk], self.format);
            self.pending.drain(..self.samples_per_chunk);

            if (self.callback)(&bytes) == StreamControl::Abort {
                self.aborted = true;
                self.pending.clear();
                // Halte-Thread beendet den Stream
                let _ = self.abort_tx.try_send(());
                return;
            }
        }
    }
}

/// Laufender cpal-Capture
pub(crate) struct CpalInput {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// Oeffnet den Capture-Stream in einem eigenen Halte-Thread
pub(crate) fn open(index: usize, config: AudioConfig, callback: CaptureCallback) -> AudioResult<CpalInput> {
    let (ready_tx, ready_rx) = bounded::<AudioResult<()>>(1);
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let abort_tx = stop_tx.clone();

    let handle = std::thread::Builder::new()
        .name("modemvoice-capture".to_string())
        .spawn(move || {
            let assembler = ChunkAssembler::new(&config, callback, abort_tx);
            let stream = match build_stream(index, &config, assembler) {
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

            // Blockiert bis stop() oder Abbruch durch den Callback
            let _ = stop_rx.recv();
            drop(stream);
            debug!("Capture-Halte-Thread beendet");
        })
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    match ready_rx.recv_timeout(OPEN_TIMEOUT) {
        Ok(Ok(())) => {
            info!(
                index,
                sample_rate = config.sample_rate,
                channels = config.channels,
                "Capture-Stream geoeffnet"
            );
            Ok(CpalInput {
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
                "Capture-Stream meldet keine Bereitschaft".to_string(),
            ))
        }
    }
}

fn build_stream(index: usize, config: &AudioConfig, mut assembler: ChunkAssembler) -> AudioResult<Stream> {
    let device = find_device(Direction::Input, index)?;
    let stream_config = stream_config(config);
    let err_fn = |err| error!("Capture-Fehler: {}", err);

    // Natives Sample-Format des Geraets bei passender Rate und Kanalzahl
    let sample_format = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
                && c.channels() >= config.channels
        })
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| assembler.feed(data.iter().copied()),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| assembler.feed(data.iter().map(|&s| s as f32 / 32768.0)),
            err_fn,
            None,
        ),
        SampleFormat::I32 => device.build_input_stream(
            &stream_config,
            move |data: &[i32], _| {
                assembler.feed(data.iter().map(|&s| (s as f64 / 2_147_483_648.0) as f32))
            },
            err_fn,
            None,
        ),
        SampleFormat::U8 => device.build_input_stream(
            &stream_config,
            move |data: &[u8], _| assembler.feed(data.iter().map(|&s| (s as f32 - 128.0) / 128.0)),
            err_fn,
            None,
        ),
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

impl InputStream for CpalInput {
    fn stop(&mut self) -> AudioResult<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| AudioError::StreamFehler("Capture-Thread ist abgestuerzt".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

//! Begrenzter Frame-Puffer fuer verarbeitete Audio-Chunks
//!
//! Fester Ring auf Basis von `ringbuf::HeapRb`. Beim Ueberlauf wird der
//! aelteste Buffer verdraengt und an den Aufrufer zurueckgegeben, damit
//! Overruns gezaehlt werden koennen. Zugriff von mehreren Threads erfolgt
//! ueber einen `parking_lot::Mutex` im `AudioInterface`.

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::buffer::AudioBuffer;

/// Ring fester Kapazitaet, aelteste Eintraege zuerst
pub struct FrameRing {
    inner: HeapRb<AudioBuffer>,
}

impl FrameRing {
    /// Erstellt einen Ring mit der gegebenen Kapazitaet (mindestens 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: HeapRb::new(capacity.max(1)),
        }
    }

    /// Fuegt einen Buffer an; gibt den verdraengten aeltesten Buffer zurueck
    pub fn push(&mut self, buffer: AudioBuffer) -> Option<AudioBuffer> {
        self.inner.push_overwrite(buffer)
    }

    /// Der zuletzt eingefuegte Buffer
    pub fn latest(&self) -> Option<AudioBuffer> {
        self.inner.iter().last().cloned()
    }

    /// Kopie aller Buffer, aeltester zuerst
    pub fn snapshot(&self) -> Vec<AudioBuffer> {
        self.inner.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Leert den Ring
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

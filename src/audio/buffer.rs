//! Lock-free ring buffer between a worker and its output stream
//!
//! Single producer (the worker task) and single consumer (the cpal callback).

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Block of interleaved stereo samples ready for playback
#[derive(Debug, Clone)]
pub struct PcmFrame {
    /// Interleaved L/R samples
    pub samples: Vec<i16>,
    /// Frame sequence number
    pub sequence: u32,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>, sequence: u32) -> Self {
        Self { samples, sequence }
    }
}

/// Lock-free ring buffer for PCM frames.
///
/// Played sample vectors go back through a spare queue so the producer can
/// reuse their allocations.
pub struct RingBuffer {
    queue: ArrayQueue<PcmFrame>,
    spare: ArrayQueue<Vec<i16>>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            spare: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame, handing it back if the buffer is full
    pub fn push(&self, frame: PcmFrame) -> Result<(), PcmFrame> {
        self.queue.push(frame).map_err(|frame| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            frame
        })
    }

    pub fn pop(&self) -> Option<PcmFrame> {
        self.queue.pop()
    }

    /// Hand a played sample vector back for reuse; dropped if the pool is full
    pub fn recycle(&self, mut samples: Vec<i16>) {
        samples.clear();
        let _ = self.spare.push(samples);
    }

    /// An empty vector from the pool, or a fresh one
    pub fn take_spare(&self) -> Vec<i16> {
        self.spare.pop().unwrap_or_default()
    }

    fn note_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop everything queued, returning how many frames were discarded
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while let Some(frame) = self.queue.pop() {
            self.recycle(frame.samples);
            dropped += 1;
        }
        dropped
    }

    /// Times a push found the buffer full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Output callbacks that ran dry before their buffer was full
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

/// Read position inside the frame currently being played
#[derive(Default)]
pub struct PlaybackCursor {
    current: Option<PcmFrame>,
    position: usize,
}

impl PlaybackCursor {
    /// Fill an output callback buffer from the ring, padding with silence.
    ///
    /// Returns the number of samples that came from the ring. A callback that
    /// needed padding counts as one underrun.
    pub fn fill(&mut self, buffer: &RingBuffer, data: &mut [f32]) -> usize {
        let mut played = 0;
        for out in data.iter_mut() {
            match self.next_sample(buffer) {
                Some(sample) => {
                    played += 1;
                    *out = sample as f32 / 32768.0;
                }
                None => break,
            }
        }

        if played < data.len() {
            data[played..].fill(0.0);
            buffer.note_underrun();
        }
        played
    }

    fn next_sample(&mut self, buffer: &RingBuffer) -> Option<i16> {
        loop {
            if let Some(frame) = &self.current {
                if let Some(&sample) = frame.samples.get(self.position) {
                    self.position += 1;
                    return Some(sample);
                }
            }
            let next = buffer.pop()?;
            if let Some(done) = self.current.replace(next) {
                buffer.recycle(done.samples);
            }
            self.position = 0;
        }
    }
}

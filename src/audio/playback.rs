//! Playback to an output device
//!
//! The cpal stream lives on a dedicated thread per worker; frames reach it
//! through a lock-free ring buffer.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, PcmFrame, PlaybackCursor, SharedRingBuffer};
use crate::audio::device::{get_output_device, supports_output_rate};
use crate::audio::{AudioSink, OutputFormat};
use crate::constants::RING_BUFFER_CAPACITY;
use crate::error::AudioError;

/// How long to wait for the stream thread to report that playback started
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while the ring buffer is full
const BACKPRESSURE_POLL: Duration = Duration::from_millis(1);

/// Output line backed by a cpal stream
pub struct CpalOutput {
    /// Channel this output plays
    channel_id: u32,

    /// Whether the stream thread should keep running
    running: Arc<AtomicBool>,

    /// Frames waiting for the device
    buffer: SharedRingBuffer,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Receiver<AudioError>,

    /// Frames written so far
    sequence: u32,
}

impl CpalOutput {
    /// Open the named (or default) output device and start a stereo stream
    pub fn open(
        channel_id: u32,
        format: OutputFormat,
        device_name: Option<&str>,
    ) -> Result<Self, AudioError> {
        let device = get_output_device(device_name)?;
        if !supports_output_rate(&device, format.sample_rate, format.channels) {
            return Err(AudioError::DeviceUnavailable(format!(
                "Device does not play {} channels at {} Hz",
                format.channels, format.sample_rate
            )));
        }

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let buffer = create_shared_buffer(RING_BUFFER_CAPACITY);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let buffer_for_stream = buffer.clone();

        let handle = thread::Builder::new()
            .name(format!("playback-channel-{}", channel_id))
            .spawn(move || {
                let mut cursor = PlaybackCursor::default();
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        cursor.fill(&buffer_for_stream, data);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::DeviceUnavailable(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until closed
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping playback
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv_timeout(OPEN_TIMEOUT)
            .unwrap_or_else(|_| Err(AudioError::DeviceUnavailable("Stream did not start".into())));
        if let Err(e) = ready {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        tracing::debug!(
            "Opened output for channel {} at {} Hz",
            channel_id,
            format.sample_rate
        );

        Ok(Self {
            channel_id,
            running,
            buffer,
            thread_handle: Some(handle),
            error_rx,
            sequence: 0,
        })
    }

    /// Check for errors reported by the stream
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

}

#[async_trait]
impl AudioSink for CpalOutput {
    async fn write(&mut self, frames: &[i16]) -> Result<(), AudioError> {
        if let Some(err) = self.check_errors() {
            return Err(err);
        }

        let mut samples = self.buffer.take_spare();
        samples.extend_from_slice(frames);
        let mut frame = PcmFrame::new(samples, self.sequence);
        loop {
            if !self.is_running() {
                return Err(AudioError::Closed);
            }
            match self.buffer.push(frame) {
                Ok(()) => break,
                Err(rejected) => {
                    frame = rejected;
                    tokio::time::sleep(BACKPRESSURE_POLL).await;
                }
            }
        }

        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    fn underruns(&self) -> usize {
        self.buffer.underrun_count()
    }

    fn flush(&mut self) {
        let dropped = self.buffer.clear();
        if dropped > 0 {
            tracing::debug!("Channel {} output flushed {} frames", self.channel_id, dropped);
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!(
                "Channel {} output closed: {} overflows, {} underruns",
                self.channel_id,
                self.buffer.overflow_count(),
                self.buffer.underrun_count()
            );
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

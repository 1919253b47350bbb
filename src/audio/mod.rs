//! Audio subsystem module

pub mod buffer;
pub mod device;
pub mod pcm;
pub mod playback;

use async_trait::async_trait;

use crate::constants::OUTPUT_CHANNELS;
use crate::error::AudioError;

pub use buffer::{PcmFrame, RingBuffer};
pub use device::{get_output_device, list_output_devices, AudioDeviceInfo};
pub use playback::CpalOutput;

/// Format of the samples handed to an [`AudioSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    /// Always stereo: mono samples are duplicated to both speakers
    pub channels: u16,
}

impl OutputFormat {
    /// Signed 16-bit interleaved stereo
    pub fn stereo_i16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: OUTPUT_CHANNELS,
        }
    }
}

/// A PCM output line owned by one worker
#[async_trait]
pub trait AudioSink: Send {
    /// Queue interleaved L/R samples, waiting while the device is behind
    async fn write(&mut self, frames: &[i16]) -> Result<(), AudioError>;

    /// Output callbacks that ran out of samples so far
    fn underruns(&self) -> usize {
        0
    }

    /// Discard anything queued but not yet played
    fn flush(&mut self);

    /// Release the device; further writes fail
    fn close(&mut self);
}

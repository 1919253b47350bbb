//! Resource acquisition for new workers

use crate::audio::{AudioSink, CpalOutput, OutputFormat};
use crate::error::{AudioError, NetworkError};
use crate::network::{MulticastSource, PacketSource};
use crate::protocol::NetworkConfig;

/// Opens the audio line and joins the multicast group for a worker
pub trait WorkerBackend: Send + Sync {
    fn open_output(
        &self,
        channel_id: u32,
        format: OutputFormat,
    ) -> Result<Box<dyn AudioSink>, AudioError>;

    /// Called inside the worker runtime's context
    fn join_multicast(
        &self,
        channel_id: u32,
        config: &NetworkConfig,
    ) -> Result<Box<dyn PacketSource>, NetworkError>;
}

/// Real devices: cpal output and a multicast socket
#[derive(Debug, Clone, Default)]
pub struct SystemBackend {
    /// Output device name; the host default when `None`
    pub output_device: Option<String>,
}

impl SystemBackend {
    pub fn new(output_device: Option<String>) -> Self {
        Self { output_device }
    }
}

impl WorkerBackend for SystemBackend {
    fn open_output(
        &self,
        channel_id: u32,
        format: OutputFormat,
    ) -> Result<Box<dyn AudioSink>, AudioError> {
        let output = CpalOutput::open(channel_id, format, self.output_device.as_deref())?;
        Ok(Box::new(output))
    }

    fn join_multicast(
        &self,
        _channel_id: u32,
        config: &NetworkConfig,
    ) -> Result<Box<dyn PacketSource>, NetworkError> {
        Ok(Box::new(MulticastSource::join(config)?))
    }
}

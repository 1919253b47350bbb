//! Wire format of the multicast feed
//!
//! Every datagram is a fixed-size PLANAR frame:
//!
//! ```text
//! | block 0: chunk_size x i16 | block 1: chunk_size x i16 | ... | block N-1 |
//! ```
//!
//! There is no header. A channel owns exactly one block, picked by
//! [`FrameLayout::block_for`], and the frame size is derived from the
//! configured chunk size and channel count.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{ConfigProvider, LayoutConfig};
use crate::constants::{BYTES_PER_SAMPLE, MAX_DATAGRAM_SIZE};
use crate::error::ConfigError;

/// Byte order of 16-bit samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Network order
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    #[inline]
    pub fn read_i16(self, bytes: [u8; 2]) -> i16 {
        match self {
            ByteOrder::Big => i16::from_be_bytes(bytes),
            ByteOrder::Little => i16::from_le_bytes(bytes),
        }
    }

    #[inline]
    pub fn write_i16(self, sample: i16) -> [u8; 2] {
        match self {
            ByteOrder::Big => sample.to_be_bytes(),
            ByteOrder::Little => sample.to_le_bytes(),
        }
    }
}

/// Frame geometry shared by every worker reading the same feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    /// Samples per channel per datagram
    pub chunk_size: usize,
    /// Number of planar blocks per datagram
    pub channel_count: usize,
    pub byte_order: ByteOrder,
    pub mapping: LayoutConfig,
}

impl FrameLayout {
    /// Size of one block in bytes
    pub fn block_len(&self) -> usize {
        self.chunk_size * BYTES_PER_SAMPLE
    }

    /// Size of a whole datagram in bytes
    pub fn frame_len(&self) -> usize {
        self.block_len() * self.channel_count
    }

    /// Datagram size, or `None` if it does not fit in `usize`
    pub fn checked_frame_len(&self) -> Option<usize> {
        self.chunk_size
            .checked_mul(BYTES_PER_SAMPLE)?
            .checked_mul(self.channel_count)
    }

    /// Block index carrying the given channel
    pub fn block_for(&self, channel_id: u32) -> Result<usize, ConfigError> {
        let block = match self.mapping.block_override(channel_id) {
            Some(block) => block,
            None => channel_id
                .checked_sub(self.mapping.block_base)
                .map(|b| b as usize)
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "layout.block_base",
                        self.mapping.block_base.to_string(),
                        format!("channel {} precedes the first block", channel_id),
                    )
                })?,
        };

        if block >= self.channel_count {
            return Err(ConfigError::invalid(
                "channel_numbers",
                self.channel_count.to_string(),
                format!("channel {} maps to block {} which is outside the frame", channel_id, block),
            ));
        }
        Ok(block)
    }

    /// Byte offset of the channel's block inside a datagram
    pub fn byte_offset(&self, channel_id: u32) -> Result<usize, ConfigError> {
        Ok(self.block_for(channel_id)? * self.block_len())
    }
}

/// Parsed and validated network/audio parameters, read once per worker
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub server_address: String,
    pub server_port: u16,
    /// Group address as configured; validated when joining
    pub multicast_address: String,
    pub multicast_port: u16,
    pub interface: String,
    pub timeout: Duration,
    pub sample_rate_hz: u32,
    pub layout: FrameLayout,
}

impl NetworkConfig {
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let server_port = parse_port("port", &provider.server_port())?;
        let multicast_port = parse_port("multicast_port", &provider.multicast_port())?;
        let chunk_text = provider.chunk_size();
        let chunk_size = usize::try_from(parse_positive("chunk_size", &chunk_text)?)
            .map_err(|_| ConfigError::invalid("chunk_size", &chunk_text, "too large"))?;
        let timeout_ms = parse_positive("timeout", &provider.timeout())?;

        let channel_count = provider.channel_numbers() as usize;
        if channel_count == 0 {
            return Err(ConfigError::invalid("channel_numbers", "0", "must be at least 1"));
        }

        let sample_rate_hz = provider.frequency();
        if !(8_000..=192_000).contains(&sample_rate_hz) {
            return Err(ConfigError::invalid(
                "frequency",
                sample_rate_hz.to_string(),
                "must be between 8000 and 192000 Hz",
            ));
        }

        let mapping = provider.layout();
        let layout = FrameLayout {
            chunk_size,
            channel_count,
            byte_order: mapping.byte_order,
            mapping,
        };
        match layout.checked_frame_len() {
            Some(len) if len <= MAX_DATAGRAM_SIZE => {}
            _ => {
                return Err(ConfigError::invalid(
                    "chunk_size",
                    chunk_size.to_string(),
                    format!(
                        "{} channels of {} samples do not fit in a UDP datagram ({} bytes max)",
                        channel_count, chunk_size, MAX_DATAGRAM_SIZE
                    ),
                ));
            }
        }

        Ok(Self {
            server_address: provider.server(),
            server_port,
            multicast_address: provider.multicast_address().trim().to_string(),
            multicast_port,
            interface: provider.interface().trim().to_string(),
            timeout: Duration::from_millis(timeout_ms),
            sample_rate_hz,
            layout,
        })
    }
}

fn parse_port(field: &'static str, value: &str) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::invalid(field, value, "must be a port between 1 and 65535")),
    }
}

fn parse_positive(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::invalid(field, value, "must be a positive integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn layout(chunk_size: usize, channel_count: usize) -> FrameLayout {
        FrameLayout {
            chunk_size,
            channel_count,
            byte_order: ByteOrder::Big,
            mapping: LayoutConfig::default(),
        }
    }

    #[test]
    fn test_block_offsets() {
        let layout = layout(64, 4);
        assert_eq!(layout.frame_len(), 512);
        assert_eq!(layout.byte_offset(1).unwrap(), 0);
        assert_eq!(layout.byte_offset(3).unwrap(), 256);
        assert!(layout.byte_offset(5).is_err());
        assert!(layout.byte_offset(0).is_err());
    }

    #[test]
    fn test_block_override_wins() {
        let mut layout = layout(16, 8);
        layout.mapping.blocks.insert("12".into(), 6);
        assert_eq!(layout.block_for(12).unwrap(), 6);
        assert_eq!(layout.block_for(2).unwrap(), 1);
    }

    #[test]
    fn test_byte_order() {
        assert_eq!(ByteOrder::Big.read_i16([0x01, 0x02]), 0x0102);
        assert_eq!(ByteOrder::Little.read_i16([0x01, 0x02]), 0x0201);
        assert_eq!(ByteOrder::Big.write_i16(-2), [0xff, 0xfe]);
    }

    #[test]
    fn test_network_config_from_defaults() {
        let config = NetworkConfig::from_provider(&AppConfig::default()).unwrap();
        assert_eq!(config.multicast_port, 5000);
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert_eq!(config.layout.chunk_size, 64);
        assert_eq!(config.layout.frame_len(), 64 * 64 * 2);
    }

    #[test]
    fn test_network_config_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.network.multicast_port = "70000".into();
        assert!(NetworkConfig::from_provider(&config).is_err());

        let mut config = AppConfig::default();
        config.network.chunk_size = "abc".into();
        assert!(NetworkConfig::from_provider(&config).is_err());

        let mut config = AppConfig::default();
        config.network.chunk_size = "1024".into();
        let err = NetworkConfig::from_provider(&config).unwrap_err();
        assert!(err.to_string().contains("chunk_size"));

        let mut config = AppConfig::default();
        config.network.frequency = 100;
        assert!(NetworkConfig::from_provider(&config).is_err());
    }

    #[test]
    fn test_oversized_chunk_is_rejected_not_overflowed() {
        let mut config = AppConfig::default();
        config.network.chunk_size = u64::MAX.to_string();
        let err = NetworkConfig::from_provider(&config).unwrap_err();
        assert_eq!(err.kind(), "INVALID_CONFIG_VALUE");

        let mut config = AppConfig::default();
        config.network.chunk_size = (usize::MAX / 2 + 1).to_string();
        config.network.channel_numbers = 1;
        assert!(NetworkConfig::from_provider(&config).is_err());

        assert_eq!(layout(usize::MAX / 2, 3).checked_frame_len(), None);
        assert_eq!(layout(64, 4).checked_frame_len(), Some(512));
    }
}

//! # Dante Receiver
//!
//! Demultiplexes a planar multi-channel PCM multicast feed into per-channel
//! playback workers with live gain control.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!                 │  Multicast group (planar 16-bit PCM frames)  │
//!                 │  [block 0][block 1][block 2] ... [block N-1] │
//!                 └──────────────────────┬───────────────────────┘
//!                                        │ one socket per worker
//!            ┌───────────────────────────┼───────────────────────────┐
//!            ▼                           ▼                           ▼
//!  ┌───────────────────┐       ┌───────────────────┐       ┌───────────────────┐
//!  │ ChannelWorker 1   │       │ ChannelWorker 3   │       │ ChannelWorker N   │
//!  │  recv (timeout)   │       │  recv (timeout)   │       │  recv (timeout)   │
//!  │  demux block      │       │  demux block      │       │  demux block      │
//!  │  gain (volume)    │       │  gain (volume)    │       │  gain (volume)    │
//!  │  mono -> L/R      │       │  mono -> L/R      │       │  mono -> L/R      │
//!  └─────────┬─────────┘       └─────────┬─────────┘       └─────────┬─────────┘
//!            ▼                           ▼                           ▼
//!  ┌───────────────────┐       ┌───────────────────┐       ┌───────────────────┐
//!  │ cpal output       │       │ cpal output       │       │ cpal output       │
//!  └───────────────────┘       └───────────────────┘       └───────────────────┘
//!
//!  WorkerRegistry (workers::registry)         VolumeStore (volume)
//!   - start / stop / stop_all                  - per-channel gain 0..=100
//!   - max concurrent workers                   - solo: mute_all_except /
//!   - event relay -> NotificationSink            unmute_channels
//! ```
//!
//! Each worker runs as one task on a tokio runtime. Workers report lifecycle
//! changes over a single event queue; the registry relays them to the
//! [`workers::NotificationSink`] and reaps workers that have ended.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod volume;
pub mod workers;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate of the feed
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default number of planar blocks per datagram
    pub const DEFAULT_CHANNEL_COUNT: u32 = 64;

    /// Default samples per channel per datagram
    pub const DEFAULT_CHUNK_SIZE: usize = 64;

    /// Default receive timeout in milliseconds
    pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

    /// Default multicast port
    pub const DEFAULT_MULTICAST_PORT: u16 = 5000;

    /// Output is always mono duplicated to both speakers
    pub const OUTPUT_CHANNELS: u16 = 2;

    /// Width of a PCM sample on the wire
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Largest UDP payload over IPv4
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;

    /// Maximum number of concurrent channel workers
    pub const MAX_WORKERS: usize = 20;

    /// Default size of the worker runtime
    pub const DEFAULT_POOL_THREADS: usize = 10;

    /// Bounded wait for workers to drain on shutdown
    pub const SHUTDOWN_GRACE_MS: u64 = 5000;

    /// Highest volume level
    pub const MAX_VOLUME: u8 = 100;

    /// Playback ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    /// Configuration file name
    pub const CONFIG_FILE_NAME: &str = "dante-receiver.toml";
}

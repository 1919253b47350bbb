//! Error types for the multicast receiver

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Stable machine-readable kind, forwarded from the wrapped error
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Audio(e) => e.kind(),
            Error::Network(e) => e.kind(),
            Error::Worker(e) => e.kind(),
            Error::Config(e) => e.kind(),
        }
    }
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Audio output is closed")]
    Closed,
}

impl AudioError {
    pub fn kind(&self) -> &'static str {
        match self {
            AudioError::DeviceUnavailable(_) => "AUDIO_DEVICE_UNAVAILABLE",
            AudioError::StreamError(_) => "AUDIO_STREAM_ERROR",
            AudioError::Closed => "AUDIO_CLOSED",
        }
    }
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Multicast join failed for {address}: {reason}")]
    MulticastJoin { address: String, reason: String },

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Socket is closed")]
    Closed,
}

impl NetworkError {
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkError::MulticastJoin { .. } => "MULTICAST_JOIN_ERROR",
            NetworkError::ReceiveFailed(_) => "RECEIVE_FAILED",
            NetworkError::Closed => "SOCKET_CLOSED",
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigError::InvalidValue { .. } => "INVALID_CONFIG_VALUE",
            ConfigError::Read { .. } => "CONFIG_READ_FAILED",
            ConfigError::Write { .. } => "CONFIG_WRITE_FAILED",
            ConfigError::Parse(_) => "CONFIG_PARSE_FAILED",
            ConfigError::Serialize(_) => "CONFIG_SERIALIZE_FAILED",
            ConfigError::NoConfigDir => "CONFIG_DIR_UNAVAILABLE",
        }
    }

    pub(crate) fn invalid(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Worker lifecycle and volume control errors
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("A worker for channel {0} is already running")]
    AlreadyExists(u32),

    #[error("Failed to create worker for channel {channel_id}: {source}")]
    CreationFailed {
        channel_id: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Channel {0} not found in configuration")]
    ChannelNotFound(u32),

    #[error("Channel {0} is disabled")]
    ChannelDisabled(u32),

    #[error("No worker found for channel {0}")]
    NotFound(u32),

    #[error("Worker for channel {channel_id} is not running (status {status})")]
    InvalidState { channel_id: u32, status: String },

    #[error("Invalid network configuration: {0}")]
    InvalidConfiguration(#[source] ConfigError),

    #[error("Worker limit reached: {0}")]
    LimitExceeded(usize),

    #[error("Volume must be between 0 and 100, got {0}")]
    InvalidVolume(i32),
}

impl WorkerError {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::AlreadyExists(_) => "WORKER_ALREADY_EXISTS",
            WorkerError::CreationFailed { .. } => "WORKER_CREATION_FAILED",
            WorkerError::ChannelNotFound(_) => "CHANNEL_NOT_FOUND",
            WorkerError::ChannelDisabled(_) => "CHANNEL_DISABLED",
            WorkerError::NotFound(_) => "WORKER_NOT_FOUND",
            WorkerError::InvalidState { .. } => "INVALID_WORKER_STATE",
            WorkerError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            WorkerError::LimitExceeded(_) => "WORKER_LIMIT_EXCEEDED",
            WorkerError::InvalidVolume(_) => "INVALID_VOLUME",
        }
    }

    /// Numeric code kept stable for clients of the control API
    pub fn code(&self) -> u16 {
        match self {
            WorkerError::AlreadyExists(_) => 1,
            WorkerError::CreationFailed { .. } => 2,
            WorkerError::ChannelNotFound(_) => 3,
            WorkerError::ChannelDisabled(_) => 4,
            WorkerError::NotFound(_) => 5,
            WorkerError::InvalidState { .. } => 8,
            WorkerError::InvalidConfiguration(_) => 9,
            WorkerError::LimitExceeded(_) => 10,
            WorkerError::InvalidVolume(_) => 11,
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_failure_keeps_cause_kind() {
        let err = WorkerError::CreationFailed {
            channel_id: 4,
            source: Box::new(AudioError::DeviceUnavailable("no line".into()).into()),
        };
        assert_eq!(err.kind(), "WORKER_CREATION_FAILED");
        assert_eq!(err.code(), 2);

        match &err {
            WorkerError::CreationFailed { source, .. } => {
                assert_eq!(source.kind(), "AUDIO_DEVICE_UNAVAILABLE")
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_top_level_kind_forwards() {
        let err: Error = WorkerError::LimitExceeded(20).into();
        assert_eq!(err.kind(), "WORKER_LIMIT_EXCEEDED");
        assert!(err.to_string().contains("20"));
    }
}

//! Per-channel playback workers and their supervision

pub mod backend;
pub mod events;
pub mod registry;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{SystemBackend, WorkerBackend};
pub use events::{
    FinishReason, LoggingSink, NoopSink, NotificationSink, WorkerEvent, WorkerEventKind,
};
pub use registry::{RegistrySettings, WorkerRegistry};
pub use worker::{ChannelWorker, WorkerInfo, WorkerStats, WorkerStatus};

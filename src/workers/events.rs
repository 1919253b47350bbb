//! Worker lifecycle events and their consumers

use std::fmt;
use uuid::Uuid;

use crate::workers::worker::WorkerStatus;

/// Why a worker finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The run loop ended on its own after the running flag was cleared
    NormalCompletion,
    /// The run task was cancelled before the loop could end
    Interrupted,
    /// Stopped through the registry
    ManualStop,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FinishReason::NormalCompletion => "normal completion",
            FinishReason::Interrupted => "interrupted",
            FinishReason::ManualStop => "manual stop",
        })
    }
}

/// What happened to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEventKind {
    Started,
    Finished(FinishReason),
    Exception {
        kind: String,
        message: String,
        /// The worker is gone and its registry entry should be reaped
        terminal: bool,
    },
    StatusChanged {
        old: WorkerStatus,
        new: WorkerStatus,
    },
}

/// Event sent from a worker (or the registry on its behalf) to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEvent {
    /// Instance that produced the event; `None` for failed starts
    pub worker: Option<Uuid>,
    pub channel_id: u32,
    pub channel_name: String,
    pub kind: WorkerEventKind,
}

impl WorkerEvent {
    /// Whether the event ends the producing worker's life
    pub fn ends_worker(&self) -> bool {
        match &self.kind {
            WorkerEventKind::Finished(_) => true,
            WorkerEventKind::Exception { terminal, .. } => *terminal,
            _ => false,
        }
    }

    /// Hand the event to a sink
    pub fn deliver(&self, sink: &dyn NotificationSink) {
        let (id, name) = (self.channel_id, self.channel_name.as_str());
        match &self.kind {
            WorkerEventKind::Started => sink.on_started(id, name),
            WorkerEventKind::Finished(reason) => sink.on_finished(id, name, *reason),
            WorkerEventKind::Exception { kind, message, .. } => {
                sink.on_exception(id, name, kind, message)
            }
            WorkerEventKind::StatusChanged { old, new } => {
                sink.on_status_changed(id, name, *old, *new)
            }
        }
    }
}

/// Consumer of worker lifecycle notifications.
///
/// Calls are fire-and-forget: nothing is awaited or retried.
pub trait NotificationSink: Send + Sync {
    fn on_started(&self, channel_id: u32, channel_name: &str);
    fn on_finished(&self, channel_id: u32, channel_name: &str, reason: FinishReason);
    fn on_exception(&self, channel_id: u32, channel_name: &str, kind: &str, message: &str);
    fn on_status_changed(
        &self,
        channel_id: u32,
        channel_name: &str,
        old: WorkerStatus,
        new: WorkerStatus,
    );
}

/// Sink that discards everything
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn on_started(&self, _: u32, _: &str) {}
    fn on_finished(&self, _: u32, _: &str, _: FinishReason) {}
    fn on_exception(&self, _: u32, _: &str, _: &str, _: &str) {}
    fn on_status_changed(&self, _: u32, _: &str, _: WorkerStatus, _: WorkerStatus) {}
}

/// Sink that writes every event to the log
pub struct LoggingSink;

impl NotificationSink for LoggingSink {
    fn on_started(&self, channel_id: u32, channel_name: &str) {
        tracing::info!("Worker started for channel {} ({})", channel_id, channel_name);
    }

    fn on_finished(&self, channel_id: u32, channel_name: &str, reason: FinishReason) {
        tracing::info!(
            "Worker finished for channel {} ({}): {}",
            channel_id,
            channel_name,
            reason
        );
    }

    fn on_exception(&self, channel_id: u32, channel_name: &str, kind: &str, message: &str) {
        tracing::error!(
            "Worker error on channel {} ({}): {} - {}",
            channel_id,
            channel_name,
            kind,
            message
        );
    }

    fn on_status_changed(
        &self,
        channel_id: u32,
        channel_name: &str,
        old: WorkerStatus,
        new: WorkerStatus,
    ) {
        tracing::debug!(
            "Channel {} ({}) status {} -> {}",
            channel_id,
            channel_name,
            old,
            new
        );
    }
}

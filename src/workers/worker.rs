//! Channel worker
//!
//! A worker owns one multicast socket, one output line and one
//! receive -> demux -> gain -> play loop for a single channel. It is created
//! by the registry, runs as one task on the worker runtime and never restarts
//! itself: a restart is a new worker with a fresh start time.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::pcm::{scale_to_stereo, ChannelSlice};
use crate::audio::{AudioSink, OutputFormat};
use crate::config::Channel;
use crate::error::{AudioError, Error, NetworkError, WorkerError};
use crate::network::PacketSource;
use crate::protocol::NetworkConfig;
use crate::volume::validate_volume;
use crate::workers::backend::WorkerBackend;
use crate::workers::events::{FinishReason, WorkerEvent, WorkerEventKind};

/// Lifecycle of a worker. Transitions only move forward in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum WorkerStatus {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
    Finished = 3,
    Interrupted = 4,
    Error = 5,
}

impl WorkerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Running,
            1 => WorkerStatus::Stopping,
            2 => WorkerStatus::Stopped,
            3 => WorkerStatus::Finished,
            4 => WorkerStatus::Interrupted,
            _ => WorkerStatus::Error,
        }
    }

    /// The run loop has ended; no further transitions
    pub fn is_final(self) -> bool {
        matches!(
            self,
            WorkerStatus::Finished | WorkerStatus::Interrupted | WorkerStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Running => "RUNNING",
            WorkerStatus::Stopping => "STOPPING",
            WorkerStatus::Stopped => "STOPPED",
            WorkerStatus::Finished => "FINISHED",
            WorkerStatus::Interrupted => "INTERRUPTED",
            WorkerStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loop counters
#[derive(Debug, Default)]
pub struct WorkerStats {
    datagrams: AtomicU64,
    short_datagrams: AtomicU64,
    timeouts: AtomicU64,
    frames_written: AtomicU64,
    underruns: AtomicU64,
}

impl WorkerStats {
    pub fn datagrams(&self) -> u64 {
        self.datagrams.load(Ordering::Relaxed)
    }

    /// Datagrams too short to hold this channel's block
    pub fn short_datagrams(&self) -> u64 {
        self.short_datagrams.load(Ordering::Relaxed)
    }

    /// Receive waits that ran out without data
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Device callbacks that ran out of samples, as last reported by the output
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Serializable view of a worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub channel_id: u32,
    pub channel_name: String,
    pub status: WorkerStatus,
    pub current_task: String,
    pub volume: u8,
    pub start_time: DateTime<Local>,
    pub running: bool,
    pub datagrams: u64,
    pub short_datagrams: u64,
    pub timeouts: u64,
    pub frames_written: u64,
    pub underruns: u64,
}

/// Shared handle to a running channel pipeline
pub struct ChannelWorker {
    id: Uuid,
    channel_id: u32,
    channel_name: String,
    start_time: DateTime<Local>,
    status: AtomicU8,
    current_task: Mutex<String>,
    volume: AtomicU8,
    running: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    events: UnboundedSender<WorkerEvent>,
    stats: WorkerStats,
}

impl ChannelWorker {
    /// Acquire the worker's resources.
    ///
    /// Opens the output line, joins the multicast group and sizes the scratch
    /// buffers. Nothing is scheduled; on error everything acquired so far is
    /// released.
    pub(crate) fn create(
        channel: &Channel,
        config: &NetworkConfig,
        backend: &dyn WorkerBackend,
        initial_volume: u8,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<(Arc<Self>, Pipeline), Error> {
        let layout = &config.layout;
        let slice = ChannelSlice {
            offset: layout.byte_offset(channel.id)?,
            chunk_size: layout.chunk_size,
            byte_order: layout.byte_order,
        };

        let format = OutputFormat::stereo_i16(config.sample_rate_hz);
        let mut output = backend.open_output(channel.id, format)?;

        let source = match backend.join_multicast(channel.id, config) {
            Ok(source) => source,
            Err(e) => {
                output.close();
                return Err(e.into());
            }
        };

        let worker = Arc::new(Self {
            id: Uuid::new_v4(),
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            start_time: Local::now(),
            status: AtomicU8::new(WorkerStatus::Running as u8),
            current_task: Mutex::new("Initializing".to_string()),
            volume: AtomicU8::new(initial_volume),
            running: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            events,
            stats: WorkerStats::default(),
        });

        let pipeline = Pipeline {
            source: Some(source),
            output: Some(output),
            slice,
            timeout: config.timeout,
            raw: vec![0u8; layout.frame_len()],
            planar: vec![0i16; layout.chunk_size],
            out: Vec::with_capacity(layout.chunk_size * 2),
        };

        Ok((worker, pipeline))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn current_task(&self) -> String {
        self.current_task.lock().clone()
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Loop has not been asked to stop and has not ended
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.status() == WorkerStatus::Running
    }

    /// Replace the gain used from the next frame on
    pub fn set_volume(&self, level: i32) -> Result<(), WorkerError> {
        let level = validate_volume(level)?;
        self.store_volume(level);
        Ok(())
    }

    /// Apply an already validated level
    pub(crate) fn store_volume(&self, level: u8) {
        let old = self.volume.swap(level, Ordering::Relaxed);
        self.set_current_task(format!("Volume set to {}%", level));
        tracing::debug!(
            "Channel {} volume changed from {} to {}",
            self.channel_id,
            old,
            level
        );
    }

    /// Ask the loop to end and abort any pending receive.
    ///
    /// Returns false if the worker had already been stopped.
    pub fn stop(&self) -> bool {
        let first = self.running.swap(false, Ordering::AcqRel);
        if !first {
            return false;
        }
        self.advance(WorkerStatus::Stopping);
        self.set_current_task("Stopping worker");

        self.cancel.cancel();

        self.advance(WorkerStatus::Stopped);
        self.set_current_task("Worker stopped");
        true
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            channel_id: self.channel_id,
            channel_name: self.channel_name.clone(),
            status: self.status(),
            current_task: self.current_task(),
            volume: self.volume(),
            start_time: self.start_time,
            running: self.is_running(),
            datagrams: self.stats.datagrams(),
            short_datagrams: self.stats.short_datagrams(),
            timeouts: self.stats.timeouts(),
            frames_written: self.stats.frames_written(),
            underruns: self.stats.underruns(),
        }
    }

    /// One-line summary for logs
    pub fn describe(&self) -> String {
        format!(
            "Worker channel {} ({}) - status: {} - task: {} - volume: {} - started: {}",
            self.channel_id,
            self.channel_name,
            self.status(),
            self.current_task(),
            self.volume(),
            self.start_time.format("%Y-%m-%d %H:%M:%S")
        )
    }

    pub(crate) fn attach(&self, handle: JoinHandle<()>) {
        *self.task.lock() = Some(handle);
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().take()
    }

    pub(crate) fn set_current_task(&self, task: impl Into<String>) {
        *self.current_task.lock() = task.into();
    }

    /// Move forward to `to`, emitting a status change. Returns false if the
    /// worker is already at or past `to`, or has ended.
    fn advance(&self, to: WorkerStatus) -> bool {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let from = WorkerStatus::from_u8(current);
            if from.is_final() || from >= to {
                return false;
            }
            match self.status.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.emit(WorkerEventKind::StatusChanged { old: from, new: to });
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn emit(&self, kind: WorkerEventKind) {
        // The relay may already be gone during shutdown
        let _ = self.events.send(WorkerEvent {
            worker: Some(self.id),
            channel_id: self.channel_id,
            channel_name: self.channel_name.clone(),
            kind,
        });
    }

    /// Run loop. Teardown happens exactly once, on every exit path,
    /// including cancellation of the task itself.
    pub(crate) async fn run(self: Arc<Self>, pipeline: Pipeline) {
        let mut guard = RunGuard {
            worker: self.clone(),
            pipeline,
            completed: false,
        };

        tracing::info!(
            "Worker loop started for channel {} ({})",
            self.channel_id,
            self.channel_name
        );
        self.set_current_task("Receiving audio");

        let outcome = guard.pipeline.pump(&self).await;
        guard.completed = true;
        drop(guard);

        match outcome {
            Ok(()) => {
                self.advance(WorkerStatus::Finished);
                self.set_current_task("Loop finished");
                tracing::info!("Worker loop finished for channel {}", self.channel_id);
                self.emit(WorkerEventKind::Finished(FinishReason::NormalCompletion));
            }
            Err(e) => {
                self.advance(WorkerStatus::Error);
                self.set_current_task(format!("Error: {}", e));
                tracing::error!("Worker for channel {} failed: {}", self.channel_id, e);
                self.emit(WorkerEventKind::Exception {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                    terminal: true,
                });
            }
        }
    }
}

impl fmt::Debug for ChannelWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelWorker")
            .field("id", &self.id)
            .field("channel_id", &self.channel_id)
            .field("channel_name", &self.channel_name)
            .field("status", &self.status())
            .field("volume", &self.volume())
            .field("start_time", &self.start_time)
            .finish()
    }
}

/// Resources and scratch buffers owned by one run loop
pub(crate) struct Pipeline {
    source: Option<Box<dyn PacketSource>>,
    output: Option<Box<dyn AudioSink>>,
    slice: ChannelSlice,
    timeout: Duration,
    /// Whole datagram
    raw: Vec<u8>,
    /// This channel's samples in host order
    planar: Vec<i16>,
    /// Interleaved stereo samples for the output
    out: Vec<i16>,
}

impl Pipeline {
    async fn pump(&mut self, worker: &ChannelWorker) -> Result<(), Error> {
        while worker.running.load(Ordering::Acquire) {
            let Some(source) = self.source.as_mut() else {
                return Err(NetworkError::Closed.into());
            };

            let received = tokio::select! {
                biased;
                _ = worker.cancel.cancelled() => break,
                r = tokio::time::timeout(self.timeout, source.recv(&mut self.raw)) => r,
            };
            let len = match received {
                Ok(result) => result?,
                Err(_elapsed) => {
                    // no data is not an error
                    worker.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            worker.stats.datagrams.fetch_add(1, Ordering::Relaxed);

            if !self.slice.demux(&self.raw[..len], &mut self.planar) {
                worker.stats.short_datagrams.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Channel {}: skipped {} byte datagram, need {}",
                    worker.channel_id,
                    len,
                    self.slice.required_len()
                );
                continue;
            }

            scale_to_stereo(&self.planar, worker.volume(), &mut self.out);

            let Some(output) = self.output.as_mut() else {
                return Err(AudioError::Closed.into());
            };
            tokio::select! {
                biased;
                _ = worker.cancel.cancelled() => break,
                r = output.write(&self.out) => r?,
            }
            worker.stats.frames_written.fetch_add(1, Ordering::Relaxed);
            worker
                .stats
                .underruns
                .store(output.underruns() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.flush();
            output.close();
        }
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

/// Runs teardown when the loop ends or the task is dropped mid-flight
struct RunGuard {
    worker: Arc<ChannelWorker>,
    pipeline: Pipeline,
    completed: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.pipeline.teardown();

        if !self.completed {
            self.worker.advance(WorkerStatus::Interrupted);
            self.worker.set_current_task("Worker interrupted");
            tracing::warn!("Worker for channel {} interrupted", self.worker.channel_id);
            self.worker
                .emit(WorkerEventKind::Finished(FinishReason::Interrupted));
        }
    }
}

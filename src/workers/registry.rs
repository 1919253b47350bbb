//! Worker registry
//!
//! Supervises the set of channel workers: starts and stops them from
//! concurrent callers, enforces the worker limit, relays worker events to the
//! notification sink and reaps workers that ended on their own.

use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::config::{Channel, ConfigProvider, WorkerSection};
use crate::constants::{MAX_WORKERS, SHUTDOWN_GRACE_MS};
use crate::error::{Error, WorkerError};
use crate::protocol::NetworkConfig;
use crate::volume::{VolumeStore, WorkerDirectory};
use crate::workers::backend::WorkerBackend;
use crate::workers::events::{FinishReason, NotificationSink, WorkerEvent, WorkerEventKind};
use crate::workers::worker::{ChannelWorker, Pipeline, WorkerInfo};

/// Limits applied by the registry
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    pub max_workers: usize,
    /// How long shutdown waits for loops to end before aborting them
    pub shutdown_grace: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_workers: MAX_WORKERS,
            shutdown_grace: Duration::from_millis(SHUTDOWN_GRACE_MS),
        }
    }
}

impl From<&WorkerSection> for RegistrySettings {
    fn from(section: &WorkerSection) -> Self {
        Self {
            max_workers: section.max_workers,
            shutdown_grace: section.shutdown_grace(),
        }
    }
}

type WorkerMap = Arc<DashMap<u32, Arc<ChannelWorker>>>;

/// Concurrency-safe set of channel workers
pub struct WorkerRegistry {
    config: Arc<dyn ConfigProvider>,
    volumes: Arc<VolumeStore>,
    backend: Arc<dyn WorkerBackend>,
    settings: RegistrySettings,
    runtime: Handle,
    workers: WorkerMap,
    /// Serializes start so the checks and the insert are one step
    start_lock: Mutex<()>,
    /// Held while a volume change reaches the store and the live worker, and
    /// while start publishes a worker, so neither can miss the other
    volume_lock: Mutex<()>,
    /// Tasks of stopped workers that have not been joined yet
    draining: Mutex<Vec<JoinHandle<()>>>,
    events: Mutex<Option<UnboundedSender<WorkerEvent>>>,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerRegistry {
    /// Create a registry whose workers and event relay run on `runtime`
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        volumes: Arc<VolumeStore>,
        backend: Arc<dyn WorkerBackend>,
        sink: Arc<dyn NotificationSink>,
        settings: RegistrySettings,
        runtime: Handle,
    ) -> Self {
        let workers: WorkerMap = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = runtime.spawn(relay_events(rx, workers.clone(), sink));

        tracing::info!(
            "Worker registry ready (max {} workers)",
            settings.max_workers
        );

        Self {
            config,
            volumes,
            backend,
            settings,
            runtime,
            workers,
            start_lock: Mutex::new(()),
            volume_lock: Mutex::new(()),
            draining: Mutex::new(Vec::new()),
            events: Mutex::new(Some(tx)),
            relay: Mutex::new(Some(relay)),
        }
    }

    pub fn volumes(&self) -> &Arc<VolumeStore> {
        &self.volumes
    }

    pub fn settings(&self) -> RegistrySettings {
        self.settings
    }

    /// Start a worker for `channel_id`
    pub fn start(&self, channel_id: u32) -> Result<Arc<ChannelWorker>, WorkerError> {
        let _guard = self.start_lock.lock();

        let result = self.try_start(channel_id);
        if let Err(e) = &result {
            tracing::warn!("Could not start worker for channel {}: {}", channel_id, e);
            let channel_name = self
                .config
                .channel_by_id(channel_id)
                .map(|c| c.name)
                .unwrap_or_default();
            self.emit(WorkerEvent {
                worker: None,
                channel_id,
                channel_name,
                kind: WorkerEventKind::Exception {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                    terminal: false,
                },
            });
        }
        result
    }

    fn try_start(&self, channel_id: u32) -> Result<Arc<ChannelWorker>, WorkerError> {
        let channel = self
            .config
            .channel_by_id(channel_id)
            .ok_or(WorkerError::ChannelNotFound(channel_id))?;

        if let Some(existing) = self.get(channel_id) {
            if existing.is_running() {
                return Err(WorkerError::AlreadyExists(channel_id));
            }
            // Ended or stopping but not reaped yet
            self.discard(&existing);
        }

        if !channel.enabled {
            return Err(WorkerError::ChannelDisabled(channel_id));
        }

        if self.workers.len() >= self.settings.max_workers {
            return Err(WorkerError::LimitExceeded(self.settings.max_workers));
        }

        let network = NetworkConfig::from_provider(self.config.as_ref())
            .map_err(WorkerError::InvalidConfiguration)?;

        let events = self
            .events
            .lock()
            .clone()
            .ok_or_else(|| WorkerError::InvalidState {
                channel_id,
                status: "registry shut down".to_string(),
            })?;

        if !self.volumes.has_channel(channel_id) {
            self.volumes.add_channel(&channel);
        }
        let volume = self.volumes.get_volume(channel_id);

        let (worker, pipeline) = self
            .create_worker(&channel, &network, volume, events)
            .map_err(|e| match e {
                Error::Config(e) => WorkerError::InvalidConfiguration(e),
                other => WorkerError::CreationFailed {
                    channel_id,
                    source: Box::new(other),
                },
            })?;

        let volume = {
            let _volumes = self.volume_lock.lock();
            self.workers.insert(channel_id, worker.clone());
            // the store may have changed while the device was opening
            let current = self.volumes.get_volume(channel_id);
            if current != worker.volume() {
                worker.store_volume(current);
            }
            current
        };
        self.emit(WorkerEvent {
            worker: Some(worker.id()),
            channel_id,
            channel_name: channel.name.clone(),
            kind: WorkerEventKind::Started,
        });

        let handle = self.runtime.spawn(worker.clone().run(pipeline));
        worker.attach(handle);

        tracing::info!(
            "Started worker for channel {} ({}) at volume {}",
            channel_id,
            channel.name,
            volume
        );
        Ok(worker)
    }

    fn create_worker(
        &self,
        channel: &Channel,
        network: &NetworkConfig,
        volume: u8,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<(Arc<ChannelWorker>, Pipeline), Error> {
        // Sockets register with the worker runtime's reactor
        let _rt = self.runtime.enter();
        ChannelWorker::create(channel, network, self.backend.as_ref(), volume, events)
    }

    /// Start every enabled channel, reporting each outcome
    pub fn start_enabled(&self) -> Vec<(u32, Result<Arc<ChannelWorker>, WorkerError>)> {
        self.config
            .enabled_channels()
            .into_iter()
            .map(|channel| (channel.id, self.start(channel.id)))
            .collect()
    }

    /// Stop the worker for `channel_id` and remove it
    pub fn stop(&self, channel_id: u32) -> Result<(), WorkerError> {
        let worker = self
            .get(channel_id)
            .ok_or(WorkerError::NotFound(channel_id))?;

        if !worker.is_running() || !worker.stop() {
            return Err(WorkerError::InvalidState {
                channel_id,
                status: worker.status().to_string(),
            });
        }

        self.discard(&worker);
        self.emit_manual_stop(&worker);
        tracing::info!("Stopped worker for channel {}", channel_id);
        Ok(())
    }

    /// Stop every worker and clear the map. Returns how many were running.
    pub fn stop_all(&self) -> usize {
        let workers: Vec<Arc<ChannelWorker>> = self
            .workers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stopped = 0;
        for worker in workers {
            if worker.stop() {
                stopped += 1;
                self.emit_manual_stop(&worker);
            }
            self.discard(&worker);
        }

        tracing::info!("Stopped {} workers", stopped);
        stopped
    }

    pub fn get(&self, channel_id: u32) -> Option<Arc<ChannelWorker>> {
        self.workers
            .get(&channel_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Running workers, ordered by channel
    pub fn list_active(&self) -> Vec<Arc<ChannelWorker>> {
        let mut active: Vec<Arc<ChannelWorker>> = self
            .workers
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        active.sort_by_key(|w| w.channel_id());
        active
    }

    /// Present and reporting itself running
    pub fn is_active(&self, channel_id: u32) -> bool {
        self.workers
            .get(&channel_id)
            .map(|entry| entry.value().is_running())
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// Serializable view of every registered worker
    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        let mut rows: Vec<WorkerInfo> = self
            .workers
            .iter()
            .map(|entry| entry.value().info())
            .collect();
        rows.sort_by_key(|row| row.channel_id);
        rows
    }

    /// Store a channel's volume and apply it to the live worker
    pub fn set_volume(&self, channel_id: u32, level: i32) -> Result<u8, WorkerError> {
        let _volumes = self.volume_lock.lock();
        let level = self.volumes.set_volume(channel_id, level)?;
        self.push_volume(channel_id, level);
        Ok(level)
    }

    pub fn get_volume(&self, channel_id: u32) -> u8 {
        self.volumes.get_volume(channel_id)
    }

    /// Solo `channel_id`; see [`VolumeStore::mute_all_except`]
    pub fn mute_all_except(&self, channel_id: u32) -> bool {
        let _volumes = self.volume_lock.lock();
        self.volumes.mute_all_except(channel_id, self)
    }

    /// Undo the last solo; see [`VolumeStore::unmute_channels`]
    pub fn unmute_channels(&self) -> bool {
        let _volumes = self.volume_lock.lock();
        self.volumes.unmute_channels(self)
    }

    /// Stop everything, wait up to the grace period for loops to end, then
    /// abort what is left and close the event relay.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down worker registry");
        self.stop_all();

        let mut handles = std::mem::take(&mut *self.draining.lock());
        let grace = self.settings.shutdown_grace;

        if tokio::time::timeout(grace, join_all(handles.iter_mut()))
            .await
            .is_err()
        {
            let outstanding: Vec<JoinHandle<()>> =
                handles.into_iter().filter(|h| !h.is_finished()).collect();
            tracing::warn!(
                "{} workers still running after {:?}, cancelling",
                outstanding.len(),
                grace
            );
            for handle in &outstanding {
                handle.abort();
            }
            join_all(outstanding).await;
        }

        // Workers hold their own senders; the relay ends once they are gone
        self.events.lock().take();
        let relay = self.relay.lock().take();
        if let Some(mut relay) = relay {
            if tokio::time::timeout(grace, &mut relay).await.is_err() {
                tracing::warn!("Event relay did not drain, cancelling");
                relay.abort();
            }
        }

        tracing::info!("Worker registry shut down");
    }

    /// Drop the map entry if it still belongs to `worker` and keep its task
    /// for shutdown to join
    fn discard(&self, worker: &ChannelWorker) {
        let id = worker.id();
        self.workers
            .remove_if(&worker.channel_id(), |_, w| w.id() == id);
        if let Some(handle) = worker.take_task() {
            let mut draining = self.draining.lock();
            draining.retain(|h| !h.is_finished());
            draining.push(handle);
        }
    }

    fn emit_manual_stop(&self, worker: &ChannelWorker) {
        self.emit(WorkerEvent {
            worker: Some(worker.id()),
            channel_id: worker.channel_id(),
            channel_name: worker.channel_name().to_string(),
            kind: WorkerEventKind::Finished(FinishReason::ManualStop),
        });
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl WorkerDirectory for WorkerRegistry {
    fn is_active(&self, channel_id: u32) -> bool {
        WorkerRegistry::is_active(self, channel_id)
    }

    fn push_volume(&self, channel_id: u32, level: u8) {
        if let Some(worker) = self.get(channel_id) {
            worker.store_volume(level);
        }
    }
}

/// Forward events to the sink, reaping workers whose life they end
async fn relay_events(
    mut rx: UnboundedReceiver<WorkerEvent>,
    workers: WorkerMap,
    sink: Arc<dyn NotificationSink>,
) {
    while let Some(event) = rx.recv().await {
        if event.ends_worker() {
            if let Some(id) = event.worker {
                if workers
                    .remove_if(&event.channel_id, |_, w| w.id() == id)
                    .is_some()
                {
                    tracing::debug!("Reaped worker for channel {}", event.channel_id);
                }
            }
        }
        event.deliver(sink.as_ref());
    }
    tracing::debug!("Event relay closed");
}

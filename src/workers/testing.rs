//! In-memory backend and sinks for worker and registry tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::{AudioSink, OutputFormat};
use crate::error::{AudioError, NetworkError};
use crate::network::PacketSource;
use crate::protocol::{ByteOrder, NetworkConfig};
use crate::workers::backend::WorkerBackend;
use crate::workers::events::{FinishReason, NotificationSink};
use crate::workers::worker::WorkerStatus;

/// Build a planar datagram from one block per channel
pub(crate) fn planar_datagram(blocks: &[Vec<i16>], order: ByteOrder) -> Vec<u8> {
    blocks
        .iter()
        .flatten()
        .flat_map(|s| order.write_i16(*s))
        .collect()
}

/// Poll `cond` until it holds, failing the test after two seconds
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// What a fake output line saw
#[derive(Default)]
pub(crate) struct SinkRecord {
    samples: Mutex<Vec<i16>>,
    format: Mutex<Option<OutputFormat>>,
    flushes: AtomicUsize,
    closes: AtomicUsize,
    underruns: AtomicUsize,
}

impl SinkRecord {
    /// Interleaved samples written so far
    pub fn samples(&self) -> Vec<i16> {
        self.samples.lock().clone()
    }

    pub fn format(&self) -> Option<OutputFormat> {
        *self.format.lock()
    }

    /// Underrun count the sink reports from now on
    pub fn set_underruns(&self, count: usize) {
        self.underruns.store(count, Ordering::SeqCst);
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Undo the interleaving: (left, right)
    pub fn stereo_samples(&self) -> (Vec<i16>, Vec<i16>) {
        let samples = self.samples();
        let left = samples.iter().step_by(2).copied().collect();
        let right = samples.iter().skip(1).step_by(2).copied().collect();
        (left, right)
    }
}

struct RecordingSink {
    record: Arc<SinkRecord>,
    closed: bool,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn write(&mut self, frames: &[i16]) -> Result<(), AudioError> {
        if self.closed {
            return Err(AudioError::Closed);
        }
        self.record.samples.lock().extend_from_slice(frames);
        Ok(())
    }

    fn underruns(&self) -> usize {
        self.record.underruns.load(Ordering::SeqCst)
    }

    fn flush(&mut self) {
        self.record.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.record.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

type Packet = Result<Vec<u8>, String>;

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Packet>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl PacketSource for ChannelSource {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed);
        }
        match self.rx.recv().await {
            Some(Ok(data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Some(Err(message)) => Err(NetworkError::ReceiveFailed(message)),
            None => std::future::pending().await,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct BackendState {
    feeds: HashMap<u32, mpsc::UnboundedSender<Packet>>,
    sinks: HashMap<u32, Arc<SinkRecord>>,
    source_closes: HashMap<u32, Arc<AtomicUsize>>,
}

/// Backend whose packets are fed by the test and whose output is recorded
#[derive(Clone, Default)]
pub(crate) struct TestBackend {
    state: Arc<Mutex<BackendState>>,
    refuse_join: Arc<AtomicBool>,
    refuse_output: Arc<AtomicBool>,
    output_delay: Arc<Mutex<Option<Duration>>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self, channel_id: u32, datagram: Vec<u8>) {
        if let Some(tx) = self.state.lock().feeds.get(&channel_id) {
            let _ = tx.send(Ok(datagram));
        }
    }

    /// Make the channel's next receive fail
    pub fn fail_receive(&self, channel_id: u32, message: &str) {
        if let Some(tx) = self.state.lock().feeds.get(&channel_id) {
            let _ = tx.send(Err(message.to_string()));
        }
    }

    pub fn sink(&self, channel_id: u32) -> Arc<SinkRecord> {
        self.state
            .lock()
            .sinks
            .entry(channel_id)
            .or_default()
            .clone()
    }

    pub fn source_closes(&self, channel_id: u32) -> usize {
        self.state
            .lock()
            .source_closes
            .get(&channel_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn refuse_join(&self) {
        self.refuse_join.store(true, Ordering::SeqCst);
    }

    pub fn refuse_output(&self) {
        self.refuse_output.store(true, Ordering::SeqCst);
    }

    /// Make every `open_output` block for `delay`, like a slow device
    pub fn slow_output(&self, delay: Duration) {
        *self.output_delay.lock() = Some(delay);
    }

    fn open_source(&self, channel_id: u32) -> Result<Box<dyn PacketSource>, NetworkError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut state = self.state.lock();
        state.feeds.insert(channel_id, tx);
        state.source_closes.insert(channel_id, closes.clone());
        Ok(Box::new(ChannelSource {
            rx,
            closes,
            closed: false,
        }))
    }
}

impl WorkerBackend for TestBackend {
    fn open_output(
        &self,
        channel_id: u32,
        format: OutputFormat,
    ) -> Result<Box<dyn AudioSink>, AudioError> {
        let delay = *self.output_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.refuse_output.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable("no test device".into()));
        }
        let record = self.sink(channel_id);
        *record.format.lock() = Some(format);
        Ok(Box::new(RecordingSink {
            record,
            closed: false,
        }))
    }

    fn join_multicast(
        &self,
        channel_id: u32,
        config: &NetworkConfig,
    ) -> Result<Box<dyn PacketSource>, NetworkError> {
        if self.refuse_join.load(Ordering::SeqCst) {
            return Err(NetworkError::MulticastJoin {
                address: config.multicast_address.clone(),
                reason: "refused by test backend".into(),
            });
        }
        self.open_source(channel_id)
    }
}

/// Notification sink that keeps a readable log of every call
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    log: Mutex<Vec<(u32, String)>>,
}

impl RecordingNotifier {
    pub fn entries(&self) -> Vec<(u32, String)> {
        self.log.lock().clone()
    }

    pub fn contains(&self, channel_id: u32, entry: &str) -> bool {
        self.log
            .lock()
            .iter()
            .any(|(id, e)| *id == channel_id && e == entry)
    }
}

impl NotificationSink for RecordingNotifier {
    fn on_started(&self, channel_id: u32, _channel_name: &str) {
        self.log.lock().push((channel_id, "started".into()));
    }

    fn on_finished(&self, channel_id: u32, _channel_name: &str, reason: FinishReason) {
        self.log
            .lock()
            .push((channel_id, format!("finished: {}", reason)));
    }

    fn on_exception(&self, channel_id: u32, _channel_name: &str, kind: &str, _message: &str) {
        self.log
            .lock()
            .push((channel_id, format!("exception: {}", kind)));
    }

    fn on_status_changed(
        &self,
        channel_id: u32,
        _channel_name: &str,
        old: WorkerStatus,
        new: WorkerStatus,
    ) {
        self.log
            .lock()
            .push((channel_id, format!("status: {} -> {}", old, new)));
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioFrame};
use super::level::LevelMeter;
use crate::config::AudioConfig;
use crate::error::{AudioError, PermissionError};

/// Microphone permission as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    /// Never requested
    Unknown,
    Granted,
    /// Recoverable through [`CapturePipeline::retry_permission`]
    Denied,
}

/// One encoded unit of captured audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Position in the current recording span, starting at 0
    pub sequence: u64,
    /// Opaque encoded bytes
    pub data: Vec<u8>,
    /// Timestamp of the first frame in the chunk, ms since device open
    pub start_ms: u64,
    pub duration_ms: u64,
}

impl AudioChunk {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Receives chunks as they are produced. Called on the pipeline's task, so it
/// must hand work off rather than block.
pub type ChunkSink = Arc<dyn Fn(AudioChunk) + Send + Sync>;

/// State shared between the pipeline handle and its pump task
struct Shared {
    sink: Mutex<Option<ChunkSink>>,
    streaming: AtomicBool,
    /// Cleared by the pump when the device stops delivering frames
    device_alive: AtomicBool,
    /// Bumped on every start/stop so the pump drops any partial chunk
    span: AtomicU64,
    level: watch::Sender<f32>,
    recording: watch::Sender<bool>,
    fault: watch::Sender<Option<AudioError>>,
}

struct Pump {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    backend: Box<dyn AudioBackend>,
    pump: Option<Pump>,
}

impl Inner {
    fn device_held(&self, shared: &Shared) -> bool {
        self.pump
            .as_ref()
            .map(|pump| !pump.task.is_finished() && shared.device_alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Continuous microphone capture feeding a chunk sink.
///
/// The device is acquired once (on first start or permission request) and
/// held for the pipeline's lifetime; `start`/`stop` only gate chunk emission.
/// The level meter runs whenever the device is held, recording or not.
pub struct CapturePipeline {
    config: AudioConfig,
    inner: tokio::sync::Mutex<Inner>,
    shared: Arc<Shared>,
    permission: watch::Sender<PermissionState>,
}

impl CapturePipeline {
    pub fn new(backend: Box<dyn AudioBackend>, config: AudioConfig) -> Self {
        info!(
            "Capture pipeline using {} ({}Hz, {} channels, {}ms chunks)",
            backend.name(),
            config.sample_rate,
            config.channels,
            config.chunk_duration_ms
        );

        let (level, _) = watch::channel(0.0);
        let (recording, _) = watch::channel(false);
        let (fault, _) = watch::channel(None);
        let (permission, _) = watch::channel(PermissionState::Unknown);

        Self {
            config,
            inner: tokio::sync::Mutex::new(Inner {
                backend,
                pump: None,
            }),
            shared: Arc::new(Shared {
                sink: Mutex::new(None),
                streaming: AtomicBool::new(false),
                device_alive: AtomicBool::new(false),
                span: AtomicU64::new(0),
                level,
                recording,
                fault,
            }),
            permission,
        }
    }

    pub fn permission(&self) -> PermissionState {
        *self.permission.borrow()
    }

    pub fn subscribe_permission(&self) -> watch::Receiver<PermissionState> {
        self.permission.subscribe()
    }

    /// Current normalized input level in [0, 1]
    pub fn level(&self) -> f32 {
        *self.shared.level.borrow()
    }

    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.shared.level.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        *self.shared.recording.borrow()
    }

    pub fn subscribe_recording(&self) -> watch::Receiver<bool> {
        self.shared.recording.subscribe()
    }

    /// Last device fault observed after acquisition (stream lost, encode failure)
    pub fn subscribe_fault(&self) -> watch::Receiver<Option<AudioError>> {
        self.shared.fault.subscribe()
    }

    /// Acquire the device, which is what asks for microphone permission.
    pub async fn request_permission(&self) -> Result<(), AudioError> {
        let mut inner = self.inner.lock().await;
        self.acquire(&mut inner).await
    }

    /// Re-request access after a denial
    pub async fn retry_permission(&self) -> Result<(), AudioError> {
        info!("Retrying microphone permission");
        self.request_permission().await
    }

    /// Begin emitting chunks to `sink` at the configured cadence.
    ///
    /// Acquires the device first if it is not yet held. A prior denial is not
    /// retried implicitly.
    pub async fn start(&self, sink: ChunkSink) -> Result<(), AudioError> {
        let mut inner = self.inner.lock().await;

        if !inner.device_held(&self.shared) {
            if self.permission() == PermissionState::Denied {
                return Err(PermissionError::Denied(
                    "microphone access previously denied".to_string(),
                )
                .into());
            }
            self.acquire(&mut inner).await?;
        }

        if let Ok(mut slot) = self.shared.sink.lock() {
            *slot = Some(sink);
        }
        self.shared.span.fetch_add(1, Ordering::SeqCst);
        self.shared.streaming.store(true, Ordering::SeqCst);
        self.shared.recording.send_replace(true);

        info!("Recording started");
        Ok(())
    }

    /// Halt chunk emission. The device stays held for a fast restart.
    pub async fn stop(&self) {
        let _inner = self.inner.lock().await;
        self.halt();
    }

    /// Stop and release the device. The pipeline can be started again later.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.halt();

        if let Some(pump) = inner.pump.take() {
            pump.cancel.cancel();
            if let Err(e) = pump.task.await {
                error!("Capture pump task panicked: {}", e);
            }
        }

        if let Err(e) = inner.backend.close().await {
            warn!("Failed to release audio device: {}", e);
        }
        self.shared.device_alive.store(false, Ordering::SeqCst);
        self.shared.level.send_replace(0.0);
        info!("Capture pipeline shut down");
    }

    fn halt(&self) {
        let was_streaming = self.shared.streaming.swap(false, Ordering::SeqCst);
        self.shared.span.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared.sink.lock() {
            *slot = None;
        }
        self.shared.recording.send_replace(false);
        if was_streaming {
            info!("Recording stopped");
        }
    }

    async fn acquire(&self, inner: &mut Inner) -> Result<(), AudioError> {
        if inner.device_held(&self.shared) {
            return Ok(());
        }
        if let Some(stale) = inner.pump.take() {
            // The previous stream died; release before reopening
            stale.cancel.cancel();
            if let Err(e) = inner.backend.close().await {
                warn!("Failed to release stale audio device: {}", e);
            }
        }

        info!("Requesting microphone access ({})", inner.backend.name());
        match inner.backend.open().await {
            Ok(frames) => {
                self.permission.send_replace(PermissionState::Granted);
                self.shared.fault.send_replace(None);
                self.shared.device_alive.store(true, Ordering::SeqCst);

                let cancel = CancellationToken::new();
                let task = tokio::spawn(pump(
                    Arc::clone(&self.shared),
                    frames,
                    cancel.clone(),
                    self.config.clone(),
                ));
                inner.pump = Some(Pump { cancel, task });
                info!("Microphone access granted");
                Ok(())
            }
            Err(e) if e.is_permission() => {
                warn!("Microphone access denied: {}", e);
                self.permission.send_replace(PermissionState::Denied);
                Err(e)
            }
            Err(e) => {
                error!("Failed to open audio device: {}", e);
                Err(e)
            }
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(pump) = inner.pump.take() {
                pump.cancel.cancel();
            }
        }
    }
}

/// Accumulates frames into fixed-size chunks; holds at most one partial chunk
struct Chunker {
    samples_per_chunk: usize,
    buffer: Vec<i16>,
    start_ms: Option<u64>,
    sequence: u64,
}

impl Chunker {
    fn new(samples_per_chunk: usize) -> Self {
        Self {
            samples_per_chunk,
            buffer: Vec::with_capacity(samples_per_chunk),
            start_ms: None,
            sequence: 0,
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.start_ms = None;
        self.sequence = 0;
    }

    /// Returns (sequence, start_ms, samples) for every chunk completed by `frame`
    fn push(&mut self, frame: &AudioFrame) -> Vec<(u64, u64, Vec<i16>)> {
        let mut done = Vec::new();
        let mut remaining = frame.samples.as_slice();

        while !remaining.is_empty() {
            if self.start_ms.is_none() {
                self.start_ms = Some(frame.timestamp_ms);
            }
            let room = self.samples_per_chunk - self.buffer.len();
            let take = room.min(remaining.len());
            self.buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.buffer.len() == self.samples_per_chunk {
                let samples = std::mem::replace(
                    &mut self.buffer,
                    Vec::with_capacity(self.samples_per_chunk),
                );
                done.push((self.sequence, self.start_ms.take().unwrap_or(0), samples));
                self.sequence += 1;
            }
        }

        done
    }
}

async fn pump(
    shared: Arc<Shared>,
    mut frames: mpsc::Receiver<AudioFrame>,
    cancel: CancellationToken,
    config: AudioConfig,
) {
    let mut meter = LevelMeter::default();
    let mut chunker = Chunker::new(config.samples_per_chunk());
    let mut span = shared.span.load(Ordering::SeqCst);

    debug!("Capture pump started");

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };

        let Some(frame) = frame else {
            warn!("Audio device stopped delivering frames");
            shared.device_alive.store(false, Ordering::SeqCst);
            shared.streaming.store(false, Ordering::SeqCst);
            shared.recording.send_replace(false);
            shared
                .fault
                .send_replace(Some(AudioError::Stream("input stream ended".to_string())));
            break;
        };

        shared.level.send_replace(meter.update(&frame.samples));

        let current = shared.span.load(Ordering::SeqCst);
        if current != span {
            chunker.reset();
            span = current;
        }

        if !shared.streaming.load(Ordering::SeqCst) {
            continue;
        }

        for (sequence, start_ms, samples) in chunker.push(&frame) {
            let data = match config
                .encoding
                .encode(&samples, config.sample_rate, config.channels)
            {
                Ok(data) => data,
                Err(e) => {
                    warn!("Dropping chunk {}: {}", sequence, e);
                    shared.fault.send_replace(Some(e));
                    continue;
                }
            };

            let sink = shared.sink.lock().ok().and_then(|slot| slot.clone());
            if let Some(sink) = sink {
                debug!("Emitting chunk {} ({} bytes)", sequence, data.len());
                sink(AudioChunk {
                    sequence,
                    data,
                    start_ms,
                    duration_ms: config.chunk_duration_ms,
                });
            }
        }
    }

    shared.level.send_replace(0.0);
    debug!("Capture pump stopped");
}

// Microphone backend using cpal
//
// cpal streams are !Send on some platforms, so each opened stream lives on a
// dedicated thread that parks until the backend is closed or dropped.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert;
use crate::error::{AudioError, PermissionError};

struct Worker {
    stop_tx: std_mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    device_name: Option<String>,
    worker: Option<Worker>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig, device_name: Option<String>) -> Self {
        Self {
            config,
            device_name,
            worker: None,
        }
    }

    /// List available input devices
    pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }

        Ok(names)
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn open(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError> {
        if self.worker.is_some() {
            return Err(AudioError::Device("Microphone already open".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_buffer);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();
        let device_name = self.device_name.clone();

        let thread = thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), &config, frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Hold the stream until close() or drop
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Microphone stream released");
            })
            .map_err(|e| AudioError::Device(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| AudioError::Device("Microphone thread exited".to_string()))??;

        self.worker = Some(Worker { stop_tx, thread });
        info!("Microphone open");

        Ok(frame_rx)
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        info!("Releasing microphone");
        let _ = worker.stop_tx.send(());
        tokio::task::spawn_blocking(move || worker.thread.join())
            .await
            .map_err(|e| AudioError::Device(e.to_string()))?
            .map_err(|_| AudioError::Device("Microphone thread panicked".to_string()))?;

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or("default microphone")
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
        }
    }
}

fn find_device(name: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();
    let device = match name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false)),
        None => host.default_input_device(),
    };
    device.ok_or_else(|| PermissionError::NoDevice.into())
}

fn build_stream(
    device_name: Option<&str>,
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<Stream, AudioError> {
    let device = find_device(device_name)?;
    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device.default_input_config()?;
    let format = supported.sample_format();
    let stream_config = supported.config();
    let in_rate = stream_config.sample_rate.0;
    let in_channels = stream_config.channels;

    info!(
        "Device config: {}Hz, {} channels, {:?} -> {}Hz, {} channels",
        in_rate, in_channels, format, config.target_sample_rate, config.target_channels
    );

    let mut delivery = Delivery {
        tx: frame_tx,
        started: Instant::now(),
        in_rate,
        in_channels,
        out_rate: config.target_sample_rate,
        out_channels: config.target_channels,
    };

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| delivery.push(data),
            on_stream_error,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let normalized: Vec<f32> = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                delivery.push(&normalized)
            },
            on_stream_error,
            None,
        )?,
        other => {
            return Err(AudioError::Device(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    Ok(stream)
}

fn on_stream_error(err: cpal::StreamError) {
    warn!("Microphone stream error: {}", err);
}

/// Runs inside the device callback; must never block
struct Delivery {
    tx: mpsc::Sender<AudioFrame>,
    started: Instant,
    in_rate: u32,
    in_channels: u16,
    out_rate: u32,
    out_channels: u16,
}

impl Delivery {
    fn push(&mut self, data: &[f32]) {
        let samples = convert::to_target(
            data,
            self.in_channels,
            self.in_rate,
            self.out_channels,
            self.out_rate,
        );
        if samples.is_empty() {
            return;
        }

        let frame = AudioFrame {
            samples,
            sample_rate: self.out_rate,
            channels: self.out_channels,
            timestamp_ms: self.started.elapsed().as_millis() as u64,
        };

        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(frame) {
            debug!("Frame queue full; dropping microphone frame");
        }
    }
}

//! Audio capture (microphone)

use crate::error::{Error, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, DefaultStreamConfigError, SampleFormat, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Capture blocks queued before the device callback starts dropping
const BLOCK_QUEUE: usize = 100;

/// Stops a running capture
pub trait CaptureHandle: Send {
    /// Close the device; calling twice is harmless
    fn stop(&mut self);
}

/// An open capture device
pub struct CaptureStream {
    /// Device sample rate (Hz)
    pub sample_rate: u32,
    /// Mono `f32` blocks at the device rate
    pub blocks: mpsc::Receiver<Vec<f32>>,
    /// Closes the device
    pub handle: Box<dyn CaptureHandle>,
}

impl std::fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStream")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

/// Source of microphone audio
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Open the device and start delivering blocks
    async fn open(&self) -> Result<CaptureStream>;
}

/// Default input device through cpal
///
/// cpal streams are not `Send`, so each capture lives on its own thread and
/// is torn down when the handle signals it.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

impl CpalCapture {
    /// Create a capture for the host's default input device
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioCapture for CpalCapture {
    async fn open(&self) -> Result<CaptureStream> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (block_tx, block_rx) = mpsc::channel::<Vec<f32>>(BLOCK_QUEUE);

        thread::Builder::new()
            .name("deyu-capture".to_string())
            .spawn(move || run_capture(block_tx, ready_tx, stop_rx))?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| Error::AudioDevice("capture thread exited".to_string()))??;

        Ok(CaptureStream {
            sample_rate,
            blocks: block_rx,
            handle: Box::new(CpalHandle {
                stop: Some(stop_tx),
            }),
        })
    }
}

struct CpalHandle {
    stop: Option<std_mpsc::Sender<()>>,
}

impl CaptureHandle for CpalHandle {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture(
    tx: mpsc::Sender<Vec<f32>>,
    ready: oneshot::Sender<Result<u32>>,
    stop: std_mpsc::Receiver<()>,
) {
    let (stream, sample_rate) = match build_stream(tx) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(sample_rate)).is_err() {
        return;
    }

    // Blocks until stop() or the handle is dropped.
    let _ = stop.recv();
    drop(stream);
    info!("Audio capture stopped");
}

fn build_stream(tx: mpsc::Sender<Vec<f32>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceNotFound("No input device found".to_string()))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using input device: {}", device_name);

    let supported = device
        .default_input_config()
        .map_err(classify_config_error)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = usize::from(config.channels);
    let sample_rate = config.sample_rate.0;

    debug!(
        "Audio config: {} channels, {}Hz, {:?}",
        channels, sample_rate, sample_format
    );

    let on_error = |err: cpal::StreamError| error!("Audio input error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.try_send(mix_to_mono(data, channels));
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let data: Vec<f32> = data.iter().map(|&s| f32::from(s) / i16::MAX as f32).collect();
                let _ = tx.try_send(mix_to_mono(&data, channels));
            },
            on_error,
            None,
        ),
        other => {
            return Err(Error::AudioDevice(format!(
                "Unsupported sample format: {other:?}"
            )))
        }
    }
    .map_err(classify_build_error)?;

    stream
        .play()
        .map_err(|e| Error::AudioStream(format!("Failed to start stream: {}", e)))?;

    info!("Audio capture started");
    Ok((stream, sample_rate))
}

/// Average interleaved channels into one
fn mix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

fn classify_config_error(err: DefaultStreamConfigError) -> Error {
    match err {
        DefaultStreamConfigError::DeviceNotAvailable => {
            Error::DeviceNotFound("Input device not available".to_string())
        }
        other => classify_backend(format!("Failed to get config: {other}")),
    }
}

fn classify_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            Error::DeviceNotFound("Input device not available".to_string())
        }
        other => classify_backend(format!("Failed to build stream: {other}")),
    }
}

/// Backends only report access refusal as text
fn classify_backend(message: String) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        warn!("Microphone access refused: {}", message);
        Error::PermissionDenied(message)
    } else {
        Error::AudioDevice(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_to_mono() {
        assert_eq!(mix_to_mono(&[0.5, -0.5, 1.0, 0.0], 2), vec![0.0, 0.5]);
        assert_eq!(mix_to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn test_classify_backend() {
        assert!(matches!(
            classify_backend("Permission denied (os error 13)".to_string()),
            Error::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_backend("device busy".to_string()),
            Error::AudioDevice(_)
        ));
        assert!(matches!(
            classify_build_error(BuildStreamError::DeviceNotAvailable),
            Error::DeviceNotFound(_)
        ));
    }
}

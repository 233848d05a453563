//! Audio devices that drive the playback callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use oeaudio_core::{Error, Result};
use tracing::{debug, error, info, warn};

use crate::callback::{CallbackOutcome, PlaybackCallback, StreamStatus};

/// Stream format requested from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per callback cycle.
    pub block_size: usize,
}

impl StreamParams {
    /// Wall-clock length of one callback cycle.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / f64::from(self.sample_rate))
    }
}

/// How a stream ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// The end marker was played.
    Completed,
    /// The callback aborted the stream.
    Aborted(Error),
}

/// Something that can play a [`PlaybackCallback`].
pub trait AudioDevice {
    /// Open and start a stream. Playback begins before this returns.
    fn start(&mut self, params: StreamParams, callback: PlaybackCallback)
        -> Result<StreamHandle>;
}

/// Keeps a running stream alive until closed.
pub trait ActiveStream {
    fn close(self: Box<Self>);
}

/// Running stream plus its end notification.
pub struct StreamHandle {
    finished: Receiver<StreamEnd>,
    end: Option<StreamEnd>,
    stream: Box<dyn ActiveStream>,
}

impl StreamHandle {
    pub fn new(finished: Receiver<StreamEnd>, stream: Box<dyn ActiveStream>) -> Self {
        Self {
            finished,
            end: None,
            stream,
        }
    }

    fn poll(&mut self) {
        if self.end.is_none() {
            match self.finished.try_recv() {
                Ok(end) => self.end = Some(end),
                Err(TryRecvError::Disconnected) => {
                    self.end = Some(StreamEnd::Aborted(Error::AudioOutput(
                        "Stream stopped without reporting".to_string(),
                    )));
                }
                Err(TryRecvError::Empty) => {}
            }
        }
    }

    /// Whether the stream has ended, without blocking.
    pub fn is_finished(&mut self) -> bool {
        self.poll();
        self.end.is_some()
    }

    /// Wait up to `timeout` for the stream to end and take the result.
    ///
    /// Returns `None` if the stream is still running or the result was
    /// already taken.
    pub fn wait(&mut self, timeout: Duration) -> Option<StreamEnd> {
        self.poll();
        if self.end.is_none() {
            match self.finished.recv_timeout(timeout) {
                Ok(end) => self.end = Some(end),
                Err(RecvTimeoutError::Disconnected) => self.poll(),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        self.end.take()
    }

    /// Stop the stream and release the device.
    pub fn close(self) {
        self.stream.close();
    }
}

/// Evaluates callback outcomes for a device implementation.
///
/// Once the callback stops or aborts, every later cycle is silence and the
/// end is reported exactly once.
pub struct StreamDriver {
    callback: PlaybackCallback,
    finished: Sender<StreamEnd>,
    done: bool,
}

impl StreamDriver {
    pub fn new(callback: PlaybackCallback) -> (Self, Receiver<StreamEnd>) {
        let (tx, rx) = bounded(1);
        (
            Self {
                callback,
                finished: tx,
                done: false,
            },
            rx,
        )
    }

    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Render one cycle of `frames` frames into `out`.
    pub fn render(&mut self, out: &mut [f32], frames: usize, status: StreamStatus) {
        if self.done {
            out.fill(0.0);
            return;
        }
        let end = match self.callback.process(out, frames, status) {
            CallbackOutcome::Continue => return,
            CallbackOutcome::Stop => StreamEnd::Completed,
            CallbackOutcome::Abort(e) => StreamEnd::Aborted(e),
        };
        self.done = true;
        let _ = self.finished.try_send(end);
    }
}

/// An output device as listed by [`list_output_devices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// List the output devices of the default host.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_name.as_deref() == Some(name.as_str());
            DeviceInfo {
                index,
                name,
                is_default,
            }
        })
        .collect();

    Ok(devices)
}

/// Hardware output through cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalDevice {
    selector: Option<String>,
}

impl CpalDevice {
    /// Device selected by index or name substring; `None` uses the default.
    pub fn new(selector: Option<String>) -> Self {
        Self { selector }
    }

    fn select(&self) -> Result<Device> {
        let host = cpal::default_host();
        let Some(selector) = self.selector.as_deref() else {
            return host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No output device found".to_string()));
        };

        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?;

        let found = match selector.parse::<usize>() {
            Ok(index) => devices.nth(index),
            Err(_) => {
                let needle = selector.to_lowercase();
                devices.find(|d| {
                    d.name()
                        .is_ok_and(|name| name.to_lowercase().contains(&needle))
                })
            }
        };
        found.ok_or_else(|| Error::AudioOutput(format!("No output device matches '{selector}'")))
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        mut driver: StreamDriver,
        block_size: usize,
    ) -> Result<Stream> {
        let channels = usize::from(config.channels);
        let mut scratch = vec![0.0f32; block_size * channels];

        let fault = Arc::new(AtomicBool::new(false));
        let fault_flag = Arc::clone(&fault);
        let err_fn = move |err| {
            error!("Audio stream error: {err}");
            fault_flag.store(true, Ordering::Relaxed);
        };

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    let status = StreamStatus {
                        output_underflow: fault.swap(false, Ordering::Relaxed),
                    };
                    let len = data.len().min(scratch.len());
                    driver.render(&mut scratch[..len], frames, status);

                    for (i, sample) in data.iter_mut().enumerate() {
                        let value = if driver.is_done() || i >= len {
                            0.0
                        } else {
                            scratch[i]
                        };
                        *sample = T::from_sample(value);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))?;

        Ok(stream)
    }
}

struct CpalStream {
    stream: Stream,
}

impl ActiveStream for CpalStream {
    fn close(self: Box<Self>) {
        if let Err(e) = self.stream.pause() {
            warn!("Failed to pause output stream: {e}");
        }
    }
}

impl AudioDevice for CpalDevice {
    fn start(
        &mut self,
        params: StreamParams,
        callback: PlaybackCallback,
    ) -> Result<StreamHandle> {
        let device = self.select()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let sample_format = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?
            .sample_format();

        let block_frames = u32::try_from(params.block_size)
            .map_err(|_| Error::Config(format!("Block size {} is too large", params.block_size)))?;
        let config = StreamConfig {
            channels: params.channels,
            sample_rate: SampleRate(params.sample_rate),
            buffer_size: BufferSize::Fixed(block_frames),
        };
        debug!(
            "Output config: {}Hz, {} channels, {} frames per block, {sample_format:?}",
            params.sample_rate, params.channels, params.block_size
        );

        let (driver, finished) = StreamDriver::new(callback);
        let stream = match sample_format {
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config, driver, params.block_size)?
            }
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config, driver, params.block_size)?
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config, driver, params.block_size)?
            }
            SampleFormat::I32 => {
                Self::build_stream::<i32>(&device, &config, driver, params.block_size)?
            }
            _ => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

        Ok(StreamHandle::new(finished, Box::new(CpalStream { stream })))
    }
}

//! Output device without hardware.
//!
//! Drives the playback callback from a plain thread, either as fast as
//! possible or paced to the stream's block duration. Used for dry runs and
//! for exercising a whole session in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use oeaudio_core::{Error, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::callback::{PlaybackCallback, StreamStatus};
use crate::output::{ActiveStream, AudioDevice, StreamDriver, StreamHandle, StreamParams};

/// A device that renders into memory.
#[derive(Debug, Clone, Default)]
pub struct OfflineDevice {
    paced: bool,
    capture: Option<Arc<Mutex<Vec<f32>>>>,
}

impl OfflineDevice {
    /// Render cycles back to back.
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one cycle per block duration, like a sound card would.
    pub fn realtime() -> Self {
        Self {
            paced: true,
            capture: None,
        }
    }

    /// Keep every rendered sample that was not starved silence.
    #[must_use]
    pub fn capturing(mut self) -> Self {
        self.capture = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    /// Samples captured so far.
    pub fn captured(&self) -> Vec<f32> {
        self.capture
            .as_ref()
            .map(|capture| capture.lock().clone())
            .unwrap_or_default()
    }
}

struct OfflineStream {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveStream for OfflineStream {
    fn close(mut self: Box<Self>) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Offline render thread panicked");
            }
        }
    }
}

impl AudioDevice for OfflineDevice {
    fn start(
        &mut self,
        params: StreamParams,
        callback: PlaybackCallback,
    ) -> Result<StreamHandle> {
        let stats = callback.stats();
        let (mut driver, finished) = StreamDriver::new(callback);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let capture = self.capture.clone();
        let period = if self.paced {
            params.block_duration()
        } else {
            Duration::ZERO
        };
        let frames = params.block_size;
        let mut buffer = vec![0.0f32; frames * usize::from(params.channels)];

        let thread = std::thread::Builder::new()
            .name("oeaudio-offline".to_string())
            .spawn(move || {
                let mut deadline = Instant::now();
                let mut cycles = 0u64;
                while !stop_flag.load(Ordering::Relaxed) && !driver.is_done() {
                    let starved = stats.starved_cycles();
                    driver.render(&mut buffer, frames, StreamStatus::default());
                    cycles += 1;

                    if let Some(capture) = capture.as_ref() {
                        if stats.starved_cycles() == starved && !driver.is_done() {
                            capture.lock().extend_from_slice(&buffer);
                        }
                    }

                    if period.is_zero() {
                        std::thread::yield_now();
                    } else {
                        deadline += period;
                        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                            std::thread::sleep(wait);
                        }
                    }
                }
                debug!("Offline stream rendered {cycles} cycles");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn render thread: {e}")))?;

        Ok(StreamHandle::new(
            finished,
            Box::new(OfflineStream {
                stop,
                thread: Some(thread),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::output::StreamEnd;
    use crate::queue::{playback_queue, QueueItem};
    use oeaudio_control::RecordingController;

    fn params() -> StreamParams {
        StreamParams {
            sample_rate: 1000,
            channels: 1,
            block_size: 2,
        }
    }

    #[test]
    fn test_plays_until_end() {
        let (producer, consumer) = playback_queue(4);
        let controller = RecordingController::dummy().into_shared();
        let callback = PlaybackCallback::new(consumer, controller, 2, 1);

        producer.try_push(QueueItem::AudioBlock(vec![0.1, 0.2])).unwrap();
        producer.try_push(QueueItem::AudioBlock(vec![0.3])).unwrap();
        producer.try_push(QueueItem::End).unwrap();

        let mut device = OfflineDevice::new().capturing();
        let mut handle = device.start(params(), callback).unwrap();
        assert!(matches!(
            handle.wait(Duration::from_secs(5)),
            Some(StreamEnd::Completed)
        ));
        handle.close();

        assert_eq!(device.captured(), vec![0.1, 0.2, 0.3, 0.0]);
    }

    #[test]
    fn test_close_stops_running_stream() {
        let (_producer, consumer) = playback_queue(4);
        let controller = RecordingController::dummy().into_shared();
        let callback = PlaybackCallback::new(consumer, controller, 2, 1);

        let mut device = OfflineDevice::realtime();
        let mut handle = device.start(params(), callback).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(!handle.is_finished());
        handle.close();
    }
}

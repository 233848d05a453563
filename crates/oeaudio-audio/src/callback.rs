//! Real-time consumer side of the playback queue.
//!
//! [`PlaybackCallback::process`] runs on the audio driver's thread once per
//! hardware block. It never waits on the queue: whatever is available is
//! played, forwarded or acted on, and an empty queue produces silence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use oeaudio_control::SharedController;
use oeaudio_core::Error;
use tracing::{debug, warn};

use crate::queue::{QueueConsumer, QueueItem, TryPopError};

/// What the stream driver should do after a callback cycle.
#[derive(Debug)]
pub enum CallbackOutcome {
    Continue,
    /// The `End` sentinel was played; finish the stream normally.
    Stop,
    /// Stop immediately and report the error.
    Abort(Error),
}

/// Device-reported conditions for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub output_underflow: bool,
}

/// Counters updated by the callback and read by the session.
#[derive(Debug, Default)]
pub struct CallbackStats {
    blocks_played: AtomicU64,
    messages: AtomicU64,
    failed_messages: AtomicU64,
    starved_cycles: AtomicU64,
}

impl CallbackStats {
    pub fn blocks_played(&self) -> u64 {
        self.blocks_played.load(Ordering::Relaxed)
    }

    /// Control messages forwarded to the recording controller.
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Forwarded messages the controller rejected.
    pub fn failed_messages(&self) -> u64 {
        self.failed_messages.load(Ordering::Relaxed)
    }

    /// Cycles that found the queue empty.
    pub fn starved_cycles(&self) -> u64 {
        self.starved_cycles.load(Ordering::Relaxed)
    }
}

/// Drains the playback queue into the device buffer.
pub struct PlaybackCallback {
    consumer: QueueConsumer,
    controller: SharedController,
    block_size: usize,
    channels: usize,
    stats: Arc<CallbackStats>,
}

impl PlaybackCallback {
    pub fn new(
        consumer: QueueConsumer,
        controller: SharedController,
        block_size: usize,
        channels: u16,
    ) -> Self {
        Self {
            consumer,
            controller,
            block_size,
            channels: usize::from(channels),
            stats: Arc::new(CallbackStats::default()),
        }
    }

    /// Shared handle to the counters.
    pub fn stats(&self) -> Arc<CallbackStats> {
        Arc::clone(&self.stats)
    }

    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Fill `out` (`frames` interleaved frames) for one cycle.
    pub fn process(
        &mut self,
        out: &mut [f32],
        frames: usize,
        status: StreamStatus,
    ) -> CallbackOutcome {
        if frames != self.block_size || out.len() != frames * self.channels {
            out.fill(0.0);
            return CallbackOutcome::Abort(Error::FrameCountMismatch {
                expected: self.block_size,
                got: frames,
            });
        }
        if status.output_underflow {
            out.fill(0.0);
            return CallbackOutcome::Abort(Error::DeviceUnderflow);
        }

        match self.consumer.try_pop() {
            Ok(QueueItem::AudioBlock(block)) => {
                let n = block.len().min(out.len());
                out[..n].copy_from_slice(&block[..n]);
                out[n..].fill(0.0);
                self.stats.blocks_played.fetch_add(1, Ordering::Relaxed);
                CallbackOutcome::Continue
            }
            Ok(QueueItem::ControlMessage(text)) => {
                out.fill(0.0);
                self.forward(&text);
                CallbackOutcome::Continue
            }
            Ok(QueueItem::End) => {
                out.fill(0.0);
                debug!("End of playback queue reached");
                CallbackOutcome::Stop
            }
            Err(TryPopError::Empty) => {
                out.fill(0.0);
                self.stats.starved_cycles.fetch_add(1, Ordering::Relaxed);
                CallbackOutcome::Continue
            }
            Err(TryPopError::Disconnected) => {
                out.fill(0.0);
                warn!("Playback queue producer went away without an end marker");
                CallbackOutcome::Stop
            }
        }
    }

    fn forward(&self, text: &str) {
        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.controller.lock().message(text) {
            self.stats.failed_messages.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to forward '{text}' to the recording system: {e}");
        }
    }
}

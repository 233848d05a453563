//! Bounded playback queue between the feeder and the real-time callback.
//!
//! The queue is the only hand-off point between the two threads. The producer
//! half may block (bounded by a timeout); the consumer half never blocks.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use oeaudio_core::{Error, Result};

/// One element of the playback queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// Interleaved samples for at most one block.
    AudioBlock(Vec<f32>),
    /// Text to forward to the recording controller.
    ControlMessage(String),
    /// No more items will follow.
    End,
}

/// Why a non-blocking pop returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPopError {
    /// Nothing queued right now.
    Empty,
    /// The producer is gone and the queue is drained.
    Disconnected,
}

/// Create a queue holding `buffer_size` blocks plus one control item.
pub fn playback_queue(buffer_size: usize) -> (QueueProducer, QueueConsumer) {
    let capacity = buffer_size + 1;
    let (tx, rx) = bounded(capacity);
    (
        QueueProducer { tx, capacity },
        QueueConsumer { rx, capacity },
    )
}

/// Producer half, owned by the feeder.
#[derive(Debug)]
pub struct QueueProducer {
    tx: Sender<QueueItem>,
    capacity: usize,
}

impl QueueProducer {
    /// Push, blocking for at most `timeout` while the queue is full.
    ///
    /// Expiry means the consumer stopped draining in time and is reported as
    /// [`Error::QueueOverrun`].
    pub fn push(&self, item: QueueItem, timeout: Duration) -> Result<()> {
        self.tx.send_timeout(item, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => Error::QueueOverrun { timeout },
            SendTimeoutError::Disconnected(_) => {
                Error::AudioOutput("Playback queue consumer is gone".to_string())
            }
        })
    }

    /// Push without blocking.
    pub fn try_push(&self, item: QueueItem) -> Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Disconnected(_) => {
                Error::AudioOutput("Playback queue consumer is gone".to_string())
            }
        })
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer half, owned by the audio callback.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: Receiver<QueueItem>,
    capacity: usize,
}

impl QueueConsumer {
    /// Pop without blocking.
    pub fn try_pop(&self) -> std::result::Result<QueueItem, TryPopError> {
        self.rx.try_recv().map_err(|e| match e {
            TryRecvError::Empty => TryPopError::Empty,
            TryRecvError::Disconnected => TryPopError::Disconnected,
        })
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

//! Producer loop filling the playback queue.
//!
//! For each stimulus the feeder pushes `start <name>`, the stimulus blocks
//! and `stop <name>`, then silence for the inter-stimulus gap before the next
//! stimulus. The `End` marker follows the last stimulus.

use std::time::Duration;

use oeaudio_core::{Error, Result};
use tracing::{debug, info, trace};

use crate::queue::{QueueItem, QueueProducer};
use crate::sequencer::Sequencer;
use crate::source::SampleSource;

/// Block geometry and gap length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeederConfig {
    /// Frames per queued block.
    pub block_size: usize,
    /// Blocks the queue holds ahead of the device.
    pub buffer_size: usize,
    /// Silence between consecutive stimuli.
    pub gap: Duration,
}

/// How [`Feeder::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Every stimulus was queued and `End` pushed.
    Completed,
    /// The stop predicate fired first.
    Interrupted,
}

/// Reads stimuli from a [`Sequencer`] and pushes them into the queue.
pub struct Feeder<S> {
    sequencer: Sequencer<S>,
    producer: QueueProducer,
    config: FeederConfig,
    push_timeout: Duration,
    gap_blocks: usize,
    block_samples: usize,
    primed: bool,
    stimulus_ended: bool,
    exhausted: bool,
    end_pushed: bool,
    presented: usize,
}

impl<S: SampleSource> Feeder<S> {
    pub fn new(
        sequencer: Sequencer<S>,
        producer: QueueProducer,
        config: FeederConfig,
    ) -> Result<Self> {
        if config.block_size == 0 || config.buffer_size == 0 {
            return Err(Error::Config(
                "block_size and buffer_size must be positive".to_string(),
            ));
        }

        let rate = f64::from(sequencer.sample_rate());
        let push_timeout = Duration::from_secs_f64(
            (config.block_size * config.buffer_size) as f64 / rate,
        );
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let gap_blocks = (config.gap.as_secs_f64() * rate / config.block_size as f64).ceil() as usize;
        let block_samples = config.block_size * usize::from(sequencer.channels());

        Ok(Self {
            sequencer,
            producer,
            config,
            push_timeout,
            gap_blocks,
            block_samples,
            primed: false,
            stimulus_ended: false,
            exhausted: false,
            end_pushed: false,
            presented: 0,
        })
    }

    pub const fn sequencer(&self) -> &Sequencer<S> {
        &self.sequencer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sequencer.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.sequencer.channels()
    }

    /// Longest a single push may block: the playing time of a full queue.
    pub const fn push_timeout(&self) -> Duration {
        self.push_timeout
    }

    /// Silence blocks inserted between stimuli.
    pub const fn gap_blocks(&self) -> usize {
        self.gap_blocks
    }

    /// Stimuli whose `stop` message has been queued.
    pub const fn presented(&self) -> usize {
        self.presented
    }

    /// Fill the queue before the device starts, without blocking.
    ///
    /// Queues `start` for the first stimulus and up to `buffer_size` of its
    /// blocks.
    pub fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;

        let name = match self.sequencer.next()? {
            Some(source) => source.name().to_string(),
            None => {
                self.exhausted = true;
                return Ok(());
            }
        };
        debug!("Presenting {name}");
        self.producer
            .try_push(QueueItem::ControlMessage(format!("start {name}")))?;

        for _ in 0..self.config.buffer_size {
            let (block, short) = self.read_block()?;
            if !block.is_empty() {
                self.producer.try_push(QueueItem::AudioBlock(block))?;
            }
            if short {
                self.stimulus_ended = true;
                break;
            }
        }
        debug!("Primed playback queue with {} items", self.producer.len());
        Ok(())
    }

    /// Queue the next block, or the transition to the next stimulus.
    ///
    /// Returns `false` once every stimulus has been queued.
    pub fn step(&mut self) -> Result<bool> {
        if !self.primed {
            self.prime()?;
        }
        if self.exhausted {
            return Ok(false);
        }

        if !self.stimulus_ended {
            let (block, short) = self.read_block()?;
            if !block.is_empty() {
                trace!("Queueing block of {} samples", block.len());
                self.push(QueueItem::AudioBlock(block))?;
            }
            if !short {
                return Ok(true);
            }
            self.stimulus_ended = true;
        }

        self.advance()?;
        Ok(!self.exhausted)
    }

    /// Feed until every stimulus is queued or `stop` returns true.
    ///
    /// `stop` is checked between blocks. `End` is pushed on completion only.
    pub fn run(&mut self, stop: &mut dyn FnMut() -> bool) -> Result<FeedOutcome> {
        loop {
            if stop() {
                return Ok(FeedOutcome::Interrupted);
            }
            if !self.step()? {
                break;
            }
        }
        self.finish(self.push_timeout)?;
        Ok(FeedOutcome::Completed)
    }

    /// Push the `End` marker once, waiting at most `timeout` for room.
    pub fn finish(&mut self, timeout: Duration) -> Result<()> {
        if self.end_pushed {
            return Ok(());
        }
        self.producer.push(QueueItem::End, timeout)?;
        self.end_pushed = true;
        debug!("End of playback queued");
        Ok(())
    }

    fn push(&self, item: QueueItem) -> Result<()> {
        self.producer.push(item, self.push_timeout)
    }

    /// Read one block from the current stimulus; `true` marks its end.
    fn read_block(&mut self) -> Result<(Vec<f32>, bool)> {
        let frames = self.config.block_size;
        let source = self
            .sequencer
            .current_mut()
            .ok_or_else(|| Error::Internal("No stimulus is being presented".to_string()))?;
        let block = source.read(frames)?;
        let short = block.len() < self.block_samples;
        Ok((block, short))
    }

    fn advance(&mut self) -> Result<()> {
        let finished = self
            .sequencer
            .current_mut()
            .map(|source| source.name().to_string())
            .ok_or_else(|| Error::Internal("No stimulus is being presented".to_string()))?;
        self.push(QueueItem::ControlMessage(format!("stop {finished}")))?;
        self.presented += 1;

        let next = match self.sequencer.next()? {
            Some(source) => source.name().to_string(),
            None => {
                info!("All {} stimuli queued", self.presented);
                self.exhausted = true;
                return Ok(());
            }
        };

        for _ in 0..self.gap_blocks {
            self.push(QueueItem::AudioBlock(vec![0.0; self.block_samples]))?;
        }
        debug!("Presenting {next}");
        self.push(QueueItem::ControlMessage(format!("start {next}")))?;
        self.stimulus_ended = false;
        Ok(())
    }
}

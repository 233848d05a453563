//! Stimulus presentation order: repeats, shuffling and looping.

use oeaudio_core::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::source::SampleSource;

/// Ordering options for a [`Sequencer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceOptions {
    /// Presentations of each stimulus per cycle.
    pub repeats: u32,
    pub shuffle: bool,
    /// Shuffle seed; `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Restart (and reshuffle) instead of ending.
    pub looping: bool,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            repeats: 1,
            shuffle: false,
            seed: None,
            looping: false,
        }
    }
}

/// Hands out stimuli in presentation order.
///
/// Each stimulus is repeated `repeats` times contiguously in input order
/// (`[A, B]` with two repeats is `[A, A, B, B]`), then the whole list is
/// optionally shuffled. The sources themselves are never copied; the order is
/// a list of indices into them.
pub struct Sequencer<S> {
    sources: Vec<S>,
    options: SequenceOptions,
    rng: StdRng,
    order: Vec<usize>,
    position: usize,
    current: Option<usize>,
    started: bool,
    sample_rate: u32,
    channels: u16,
}

impl<S: SampleSource> Sequencer<S> {
    /// Validate the stimulus set and build a sequencer.
    pub fn build(sources: Vec<S>, options: SequenceOptions) -> Result<Self> {
        let first = sources.first().ok_or(Error::EmptyInput)?;
        if options.repeats == 0 {
            return Err(Error::NonPositiveRepeats);
        }

        let sample_rate = first.sample_rate();
        let channels = first.channels();
        if let Some(s) = sources.iter().find(|s| s.sample_rate() != sample_rate) {
            return Err(Error::RateMismatch {
                name: s.name().to_string(),
                expected: sample_rate,
                found: s.sample_rate(),
            });
        }
        if let Some(s) = sources.iter().find(|s| s.channels() != channels) {
            return Err(Error::ChannelMismatch {
                name: s.name().to_string(),
                expected: channels,
                found: s.channels(),
            });
        }

        let rng = options
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        Ok(Self {
            sources,
            options,
            rng,
            order: Vec::new(),
            position: 0,
            current: None,
            started: false,
            sample_rate,
            channels,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    pub const fn options(&self) -> &SequenceOptions {
        &self.options
    }

    /// Distinct stimuli.
    pub fn sources(&self) -> &[S] {
        &self.sources
    }

    /// Presentations per cycle (stimuli times repeats).
    pub fn len(&self) -> usize {
        self.sources.len() * self.options.repeats as usize
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Build the flat presentation order and reset to its start.
    pub fn start_iteration(&mut self) {
        let repeats = self.options.repeats as usize;
        self.order = (0..self.sources.len())
            .flat_map(|index| std::iter::repeat(index).take(repeats))
            .collect();
        if self.options.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        self.position = 0;
        self.current = None;
        self.started = true;
    }

    /// Names in the current presentation order (empty before the first
    /// iteration starts).
    pub fn presentation_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&index| self.sources[index].name())
            .collect()
    }

    /// Next stimulus, rewound to its first frame, or `None` at the end of a
    /// non-looping sequence.
    pub fn next(&mut self) -> Result<Option<&mut S>> {
        if !self.started {
            self.start_iteration();
        }

        if self.position >= self.order.len() {
            if !self.options.looping {
                self.current = None;
                return Ok(None);
            }
            if self.options.shuffle {
                debug!("Reshuffling stimulus list");
                self.order.shuffle(&mut self.rng);
            }
            self.position = 0;
        }

        let index = self.order[self.position];
        self.position += 1;
        self.current = Some(index);

        let source = &mut self.sources[index];
        source.rewind()?;
        Ok(Some(source))
    }

    /// The stimulus most recently returned by [`next`](Self::next), at its
    /// current read position.
    pub fn current_mut(&mut self) -> Option<&mut S> {
        self.current.map(|index| &mut self.sources[index])
    }
}

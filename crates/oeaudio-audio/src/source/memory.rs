//! In-memory sample source.

use std::sync::Arc;

use oeaudio_core::{Error, Result};

use super::{ClickSynth, SampleSource};

/// A stimulus held in memory as interleaved samples.
///
/// Clones share the sample data.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    sample_rate: u32,
    file_channels: u16,
    samples: Arc<[f32]>,
    frame_pos: usize,
    click: Option<ClickSynth>,
}

impl MemorySource {
    /// Create a source from interleaved samples with `channels` channels.
    pub fn new(
        name: impl Into<String>,
        sample_rate: u32,
        channels: u16,
        samples: Vec<f32>,
    ) -> Result<Self> {
        let name = name.into();
        if channels == 0 || sample_rate == 0 {
            return Err(Error::Config(format!(
                "{name}: sample rate and channel count must be positive"
            )));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(Error::Config(format!(
                "{name}: {} samples is not a whole number of {channels}-channel frames",
                samples.len()
            )));
        }
        Ok(Self {
            name,
            sample_rate,
            file_channels: channels,
            samples: samples.into(),
            frame_pos: 0,
            click: None,
        })
    }

    /// Mono silence lasting `frames` frames.
    pub fn silence(name: impl Into<String>, sample_rate: u32, frames: usize) -> Result<Self> {
        Self::new(name, sample_rate, 1, vec![0.0; frames])
    }

    /// Add a synthesized click channel (mono sources only).
    pub fn with_click(mut self, duration_secs: f64) -> Self {
        self.click = ClickSynth::for_source(
            &self.name,
            Some(duration_secs),
            self.file_channels,
            self.sample_rate,
        );
        self
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.file_channels)
    }
}

impl SampleSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        if self.click.is_some() {
            2
        } else {
            self.file_channels
        }
    }

    fn duration(&self) -> Option<f64> {
        Some(self.frames() as f64 / f64::from(self.sample_rate))
    }

    fn read(&mut self, frames: usize) -> Result<Vec<f32>> {
        let channels = usize::from(self.file_channels);
        let take = frames.min(self.frames() - self.frame_pos);
        let start = self.frame_pos * channels;
        let block = &self.samples[start..start + take * channels];
        self.frame_pos += take;

        Ok(match self.click.as_mut() {
            Some(click) => click.apply(block),
            None => block.to_vec(),
        })
    }

    fn rewind(&mut self) -> Result<()> {
        self.frame_pos = 0;
        if let Some(click) = self.click.as_mut() {
            click.reset();
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.frame_pos as u64
    }
}

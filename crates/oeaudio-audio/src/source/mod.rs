//! Stimulus sample sources.
//!
//! A source is opened once per stimulus file and read sequentially in fixed
//! size blocks of interleaved `f32` samples. Repeats and loops reuse the same
//! source after rewinding it; the underlying data is never copied.

mod click;
mod file;
mod memory;

pub use click::{ClickSynth, CLICK_LEVEL};
pub use file::FileSource;
pub use memory::MemorySource;

use oeaudio_core::Result;

/// A readable, rewindable stimulus.
pub trait SampleSource: Send {
    /// Identity used in start/stop messages.
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    /// Channels delivered by [`read`](Self::read), including a synthesized
    /// click channel.
    fn channels(&self) -> u16;

    /// Duration in seconds, if known.
    fn duration(&self) -> Option<f64> {
        None
    }

    /// Read up to `frames` frames of interleaved samples.
    ///
    /// Fewer than `frames` frames means the end of the stimulus was reached;
    /// reads past the end return an empty block.
    fn read(&mut self, frames: usize) -> Result<Vec<f32>>;

    /// Return to the first frame, re-arming the click.
    fn rewind(&mut self) -> Result<()>;

    /// Frames handed out since opening or the last rewind.
    fn position(&self) -> u64;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn channels(&self) -> u16 {
        (**self).channels()
    }

    fn duration(&self) -> Option<f64> {
        (**self).duration()
    }

    fn read(&mut self, frames: usize) -> Result<Vec<f32>> {
        (**self).read(frames)
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }
}

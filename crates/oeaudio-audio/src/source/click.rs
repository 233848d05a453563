//! Synthesized sync click channel.

use tracing::debug;

/// Value of the sync channel while the click is high.
pub const CLICK_LEVEL: f32 = 1.0;

/// Adds a sync channel to a mono stimulus.
///
/// The first block after opening or rewinding carries `round(duration * rate)`
/// full-scale frames at its start (truncated to the block length); every other
/// frame of the sync channel is zero.
#[derive(Debug, Clone)]
pub struct ClickSynth {
    click_frames: usize,
    armed: bool,
}

impl ClickSynth {
    pub fn new(duration_secs: f64, sample_rate: u32) -> Self {
        Self {
            click_frames: (duration_secs * f64::from(sample_rate)).round() as usize,
            armed: true,
        }
    }

    /// Click synthesizer for a source with `file_channels` channels.
    ///
    /// Only mono files get a click; multi-channel files pass through
    /// unchanged.
    pub fn for_source(
        name: &str,
        duration_secs: Option<f64>,
        file_channels: u16,
        sample_rate: u32,
    ) -> Option<Self> {
        let duration = duration_secs?;
        if file_channels == 1 {
            Some(Self::new(duration, sample_rate))
        } else {
            debug!("{name}: {file_channels} channels, not adding a click channel");
            None
        }
    }

    pub const fn click_frames(&self) -> usize {
        self.click_frames
    }

    /// Re-arm the click for the next block.
    pub fn reset(&mut self) {
        self.armed = true;
    }

    /// Interleave a mono block with the sync channel.
    pub fn apply(&mut self, mono: &[f32]) -> Vec<f32> {
        let lead = if self.armed {
            self.click_frames.min(mono.len())
        } else {
            0
        };
        self.armed = false;

        let mut output = Vec::with_capacity(mono.len() * 2);
        for (i, &sample) in mono.iter().enumerate() {
            output.push(sample);
            output.push(if i < lead { CLICK_LEVEL } else { 0.0 });
        }
        output
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    fn sync_channel(block: &[f32]) -> Vec<f32> {
        block.chunks_exact(2).map(|frame| frame[1]).collect()
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_click_only_on_first_block() {
        let mut click = ClickSynth::new(0.001, 44100);
        assert_eq!(click.click_frames(), 44);

        let first = click.apply(&[0.5; 128]);
        let sync = sync_channel(&first);
        assert_eq!(sync.iter().filter(|&&s| s == CLICK_LEVEL).count(), 44);
        assert!(sync[..44].iter().all(|&s| s == CLICK_LEVEL));
        assert!(sync[44..].iter().all(|&s| s == 0.0));
        assert!(first.chunks_exact(2).all(|frame| frame[0] == 0.5));

        let second = click.apply(&[0.5; 128]);
        assert!(sync_channel(&second).iter().all(|&s| s == 0.0));

        click.reset();
        let rewound = click.apply(&[0.5; 128]);
        assert_eq!(sync_channel(&rewound)[0], CLICK_LEVEL);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_click_truncated_to_block() {
        let mut click = ClickSynth::new(1.0, 1000);
        let block = click.apply(&[0.0; 16]);
        assert!(sync_channel(&block).iter().all(|&s| s == CLICK_LEVEL));
        let next = click.apply(&[0.0; 16]);
        assert!(sync_channel(&next).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_click_only_for_mono() {
        assert!(ClickSynth::for_source("a", Some(0.01), 1, 44100).is_some());
        assert!(ClickSynth::for_source("a", Some(0.01), 2, 44100).is_none());
        assert!(ClickSynth::for_source("a", None, 1, 44100).is_none());
    }
}

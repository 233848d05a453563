//! Command-line arguments and how they override the configuration file.

use std::path::PathBuf;

use clap::Parser;
use oeaudio_core::PresenterConfig;

/// Present acoustic stimuli while Open Ephys records.
#[derive(Parser, Debug)]
#[command(name = "oeaudio-present")]
#[command(version)]
pub struct Args {
    /// Stimulus sound files
    #[arg(value_name = "STIM", required_unless_present_any = ["list_devices", "save_config"])]
    pub stim: Vec<PathBuf>,

    /// Shuffle order of presentation
    #[arg(short = 'S', long)]
    pub shuffle: bool,

    /// Loop endlessly
    #[arg(short = 'l', long = "loop")]
    pub looping: bool,

    /// Presentations of each stimulus
    #[arg(short, long)]
    pub repeats: Option<u32>,

    /// Gap between stimuli (s)
    #[arg(short, long, value_name = "SECONDS")]
    pub gap: Option<f64>,

    /// Seed for the shuffle
    #[arg(long)]
    pub seed: Option<u64>,

    /// Add a sync click channel of this length to mono stimuli
    #[arg(long, value_name = "SECONDS")]
    pub click: Option<f64>,

    /// Delay after recording starts before the first stimulus (s)
    #[arg(long, value_name = "SECONDS")]
    pub warmup: Option<f64>,

    /// Output device index or name
    #[arg(short, long)]
    pub device: Option<String>,

    /// Frames per block
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Blocks queued ahead of the device
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// List output devices and exit
    #[arg(short = 'L', long)]
    pub list_devices: bool,

    /// Open Ephys remote control address, e.g. tcp://localhost:5556
    #[arg(short = 'a', long, env = "OEAUDIO_ADDRESS")]
    pub open_ephys_address: Option<String>,

    /// Recording directory
    #[arg(long)]
    pub rec_dir: Option<String>,

    /// Text prepended to the recording name
    #[arg(long)]
    pub prepend: Option<String>,

    /// Text appended to the recording name
    #[arg(long)]
    pub append: Option<String>,

    /// Reply timeout for the recording system (ms)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Render without an audio device, in real time
    #[arg(long)]
    pub dry_run: bool,

    /// Configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the effective configuration to FILE
    #[arg(long, value_name = "FILE")]
    pub save_config: Option<PathBuf>,

    /// Show verbose log messages
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// Apply command-line values on top of `config`.
    pub fn apply(&self, config: &mut PresenterConfig) {
        let audio = &mut config.audio;
        if let Some(device) = &self.device {
            audio.device = Some(device.clone());
        }
        if let Some(block_size) = self.block_size {
            audio.block_size = block_size;
        }
        if let Some(buffer_size) = self.buffer_size {
            audio.buffer_size = buffer_size;
        }

        let presentation = &mut config.presentation;
        presentation.shuffle |= self.shuffle;
        presentation.looping |= self.looping;
        if let Some(repeats) = self.repeats {
            presentation.repeats = repeats;
        }
        if let Some(gap) = self.gap {
            presentation.gap = gap;
        }
        if self.seed.is_some() {
            presentation.seed = self.seed;
        }
        if self.click.is_some() {
            presentation.click = self.click;
        }
        if let Some(warmup) = self.warmup {
            presentation.warmup = warmup;
        }

        let recording = &mut config.recording;
        if let Some(address) = &self.open_ephys_address {
            recording.address = Some(address.clone());
        }
        if let Some(rec_dir) = &self.rec_dir {
            recording.rec_dir.clone_from(rec_dir);
        }
        if let Some(prepend) = &self.prepend {
            recording.prepend.clone_from(prepend);
        }
        if let Some(append) = &self.append {
            recording.append.clone_from(append);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            recording.timeout_ms = timeout_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("oeaudio-present").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&[
            "-S", "-l", "-r", "3", "-g", "0.5", "--seed", "9", "--click", "0.01", "-a",
            "tcp://rig:5556", "--rec-dir", "/data", "--block-size", "512", "a.wav", "b.wav",
        ]);
        assert_eq!(args.stim.len(), 2);

        let mut config = PresenterConfig::default();
        args.apply(&mut config);
        assert!(config.presentation.shuffle);
        assert!(config.presentation.looping);
        assert_eq!(config.presentation.repeats, 3);
        assert_eq!(config.presentation.seed, Some(9));
        assert_eq!(config.presentation.click, Some(0.01));
        assert_eq!(config.recording.address.as_deref(), Some("tcp://rig:5556"));
        assert_eq!(config.recording.rec_dir, "/data");
        assert_eq!(config.audio.block_size, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let mut config = PresenterConfig::default();
        config.presentation.shuffle = true;
        config.presentation.gap = 1.25;
        config.audio.buffer_size = 7;

        parse(&["a.wav"]).apply(&mut config);
        assert!(config.presentation.shuffle);
        assert!((config.presentation.gap - 1.25).abs() < f64::EPSILON);
        assert_eq!(config.audio.buffer_size, 7);
    }

    #[test]
    fn test_stimuli_required_unless_listing() {
        assert!(Args::try_parse_from(["oeaudio-present"]).is_err());
        assert!(parse(&["-L"]).list_devices);
        assert!(parse(&["--save-config", "out.toml"]).stim.is_empty());
    }
}

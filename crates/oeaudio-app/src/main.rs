//! # oeaudio
//!
//! Presents acoustic stimuli through an audio device while Open Ephys
//! records, marking the start and stop of every stimulus in the recording's
//! message log.

mod cli;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use oeaudio_audio::{
    list_output_devices, AudioDevice, CpalDevice, FileSource, OfflineDevice, SequenceOptions,
    Sequencer, Session, SessionConfig,
};
use oeaudio_control::RecordingController;
use oeaudio_core::{Error, PresenterConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    let args = cli::Args::parse();
    init_logging(args.debug);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "oeaudio_app={default_level},oeaudio_audio={default_level},\
                     oeaudio_control={default_level},oeaudio_core={default_level}"
                )
                .into()
            }),
        )
        .init();
}

/// Exit status by error class; 1 for anything not raised by oeaudio itself.
fn exit_code(error: &anyhow::Error) -> u8 {
    error.downcast_ref::<Error>().map_or(1, Error::exit_code)
}

fn run(args: &cli::Args) -> Result<()> {
    info!("Starting oeaudio v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        for device in list_output_devices().context("Failed to list output devices")? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{:>3}  {}{marker}", device.index, device.name);
        }
        return Ok(());
    }

    let mut config = PresenterConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("Failed to save configuration to {}", path.display()))?;
        info!("Configuration written to {}", path.display());
        if args.stim.is_empty() {
            return Ok(());
        }
    }

    let sources = args
        .stim
        .iter()
        .map(|path| FileSource::open(path, config.presentation.click))
        .collect::<oeaudio_core::Result<Vec<_>>>()
        .context("Failed to open stimuli")?;

    let sequencer = Sequencer::build(
        sources,
        SequenceOptions {
            repeats: config.presentation.repeats,
            shuffle: config.presentation.shuffle,
            seed: config.presentation.seed,
            looping: config.presentation.looping,
        },
    )
    .context("Invalid stimulus set")?;

    let controller = RecordingController::connect(
        config.recording.address.as_deref(),
        config.recording.timeout(),
    )
    .context("Failed to connect to the recording system")?
    .into_shared();

    let session = Session::new(sequencer, controller, SessionConfig::from_config(&config)?)?;
    spawn_interrupt_handler(session.cancel_flag())?;

    let mut device: Box<dyn AudioDevice> = if args.dry_run {
        info!("Dry run: rendering without an audio device");
        Box::new(OfflineDevice::realtime())
    } else {
        Box::new(CpalDevice::new(config.audio.device.clone()))
    };

    let summary = session
        .run(device.as_mut())
        .context("Presentation failed")?;

    info!(
        "Presented {} stimuli ({} blocks, {} messages, {} starved cycles)",
        summary.stimuli_presented, summary.blocks_played, summary.messages, summary.starved_cycles
    );
    if let Some(path) = &summary.recording_path {
        info!("Recording path: {path}");
    }
    if summary.interrupted {
        return Err(Error::Cancelled.into());
    }
    Ok(())
}

/// Set `cancel` on Ctrl-C. The session always stops the recording itself,
/// so repeated interrupts only log.
fn spawn_interrupt_handler(cancel: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;

    std::thread::Builder::new()
        .name("oeaudio-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Failed to listen for Ctrl-C: {e}");
                        return;
                    }
                    interrupt(&cancel);
                }
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

/// Record one Ctrl-C. Returns false if a stop was already requested.
fn interrupt(cancel: &AtomicBool) -> bool {
    if cancel.swap(true, Ordering::SeqCst) {
        warn!("Already stopping, waiting for the recording to stop");
        false
    } else {
        warn!("Interrupted, stopping the recording");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_interrupt_only_sets_flag() {
        let cancel = AtomicBool::new(false);
        assert!(interrupt(&cancel));
        assert!(!interrupt(&cancel));
        assert!(!interrupt(&cancel));
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_exit_code_by_error_class() {
        let err = anyhow::Error::from(Error::NonPositiveRepeats).context("Invalid stimulus set");
        assert_eq!(exit_code(&err), 2);

        let err = anyhow::Error::from(Error::DeviceUnderflow).context("Presentation failed");
        assert_eq!(exit_code(&err), 3);

        let err = anyhow::Error::from(Error::Connection("refused".into()))
            .context("Failed to connect to the recording system");
        assert_eq!(exit_code(&err), 4);

        assert_eq!(exit_code(&Error::Cancelled.into()), 130);
        assert_eq!(exit_code(&anyhow::anyhow!("signal runtime")), 1);
    }
}

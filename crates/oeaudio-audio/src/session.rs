//! One presentation run: recording lifecycle around stimulus playback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oeaudio_control::SharedController;
use oeaudio_core::{PresenterConfig, Result};
use tracing::{debug, error, info, warn};

use crate::callback::PlaybackCallback;
use crate::feeder::{FeedOutcome, Feeder, FeederConfig};
use crate::output::{AudioDevice, StreamEnd, StreamHandle, StreamParams};
use crate::queue::{playback_queue, QueueConsumer};
use crate::sequencer::Sequencer;
use crate::source::SampleSource;

/// Extra time allowed for the device to play out the queue.
const STREAM_END_MARGIN: Duration = Duration::from_secs(1);

/// Timing and recording parameters of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub block_size: usize,
    pub buffer_size: usize,
    /// Silence between stimuli, also the pause around recording start/stop.
    pub gap: Duration,
    /// Pause between recording start and the first stimulus.
    pub warmup: Duration,
    pub rec_dir: String,
    pub prepend: String,
    pub append: String,
}

impl SessionConfig {
    pub fn from_config(config: &PresenterConfig) -> Result<Self> {
        Ok(Self {
            block_size: config.audio.block_size,
            buffer_size: config.audio.buffer_size,
            gap: config.presentation.gap_duration()?,
            warmup: config.presentation.warmup_duration()?,
            rec_dir: config.recording.rec_dir.clone(),
            prepend: config.recording.prepend.clone(),
            append: config.recording.append.clone(),
        })
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub stimuli_presented: usize,
    pub blocks_played: u64,
    pub starved_cycles: u64,
    /// Control messages forwarded from the playback queue.
    pub messages: u64,
    pub interrupted: bool,
    /// Path reported by the recording system.
    pub recording_path: Option<String>,
}

/// Plays a stimulus sequence while the recording system records it.
pub struct Session<S> {
    feeder: Feeder<S>,
    consumer: QueueConsumer,
    controller: SharedController,
    config: SessionConfig,
    cancel: Arc<AtomicBool>,
}

impl<S: SampleSource> Session<S> {
    pub fn new(
        sequencer: Sequencer<S>,
        controller: SharedController,
        config: SessionConfig,
    ) -> Result<Self> {
        let (producer, consumer) = playback_queue(config.buffer_size);
        let feeder = Feeder::new(
            sequencer,
            producer,
            FeederConfig {
                block_size: config.block_size,
                buffer_size: config.buffer_size,
                gap: config.gap,
            },
        )?;

        Ok(Self {
            feeder,
            consumer,
            controller,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Use an externally owned cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops feeding when set; cleanup still runs.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the whole presentation on `device`.
    ///
    /// Recording is stopped on every exit path. The first fatal error is
    /// returned after cleanup.
    pub fn run(self, device: &mut dyn AudioDevice) -> Result<SessionSummary> {
        let Self {
            mut feeder,
            consumer,
            controller,
            config,
            cancel,
        } = self;
        let lifecycle = Lifecycle {
            controller: &controller,
            config: &config,
        };

        feeder.prime()?;
        info!(
            "Presentation order: {}",
            feeder.sequencer().presentation_order().join(", ")
        );

        let recording_path = match lifecycle.start() {
            Ok(path) => path,
            Err(e) => {
                lifecycle.stop(Some(&format!("aborted: {e}")));
                return Err(e);
            }
        };

        let params = StreamParams {
            sample_rate: feeder.sample_rate(),
            channels: feeder.channels(),
            block_size: config.block_size,
        };
        let callback = PlaybackCallback::new(
            consumer,
            Arc::clone(&controller),
            config.block_size,
            params.channels,
        );
        let stats = callback.stats();

        let mut handle = match device.start(params, callback) {
            Ok(handle) => handle,
            Err(e) => {
                lifecycle.stop(Some(&format!("aborted: {e}")));
                return Err(e);
            }
        };
        info!("Playback started");

        let fed = feeder.run(&mut || cancel.load(Ordering::Relaxed) || handle.is_finished());
        let end = close_stream(&mut feeder, handle, &params);

        let interrupted =
            matches!(fed, Ok(FeedOutcome::Interrupted)) && cancel.load(Ordering::Relaxed);
        let result = match (fed, end) {
            (_, Some(StreamEnd::Aborted(e))) | (Err(e), _) => Err(e),
            (Ok(_), _) => Ok(()),
        };

        let failure = match &result {
            Err(e) => Some(format!("aborted: {e}")),
            Ok(()) if interrupted => Some("interrupted".to_string()),
            Ok(()) => None,
        };
        lifecycle.stop(failure.as_deref());
        result?;

        let summary = SessionSummary {
            stimuli_presented: feeder.presented(),
            blocks_played: stats.blocks_played(),
            starved_cycles: stats.starved_cycles(),
            messages: stats.messages(),
            interrupted,
            recording_path: Some(recording_path),
        };
        info!(
            "Session finished: {} stimuli, {} blocks, {} starved cycles{}",
            summary.stimuli_presented,
            summary.blocks_played,
            summary.starved_cycles,
            if interrupted { " (interrupted)" } else { "" }
        );
        Ok(summary)
    }
}

/// Queue the end marker, let the device play out and close it.
fn close_stream<S: SampleSource>(
    feeder: &mut Feeder<S>,
    mut handle: StreamHandle,
    params: &StreamParams,
) -> Option<StreamEnd> {
    let end_timeout = if handle.is_finished() {
        Duration::ZERO
    } else {
        feeder.push_timeout()
    };
    if let Err(e) = feeder.finish(end_timeout) {
        warn!("Could not queue end of playback: {e}");
    }

    let drain = feeder.push_timeout() + params.block_duration() * 2 + STREAM_END_MARGIN;
    let end = handle.wait(drain);
    if end.is_none() {
        warn!("Output stream did not finish within {drain:?}");
    }
    handle.close();
    debug!("Output stream closed");
    end
}

/// Acquisition and recording start/stop around playback.
struct Lifecycle<'a> {
    controller: &'a SharedController,
    config: &'a SessionConfig,
}

impl Lifecycle<'_> {
    fn start(&self) -> Result<String> {
        {
            let mut controller = self.controller.lock();
            info!("Starting acquisition on {}", controller.endpoint());
            controller.start_acquisition()?;
        }
        std::thread::sleep(self.config.gap);
        let path = self.controller.lock().start_recording(
            &self.config.rec_dir,
            &self.config.prepend,
            &self.config.append,
        )?;
        std::thread::sleep(self.config.warmup);
        Ok(path)
    }

    /// Report `failure` in-band, then stop recording and acquisition.
    /// Errors are logged only.
    fn stop(&self, failure: Option<&str>) {
        {
            let mut controller = self.controller.lock();
            if let Some(text) = failure {
                if let Err(e) = controller.message(text) {
                    warn!("Could not log '{text}' in the recording: {e}");
                }
            }
            if let Err(e) = controller.stop_recording() {
                error!("Failed to stop recording: {e}");
            }
        }
        std::thread::sleep(self.config.gap);
        if let Err(e) = self.controller.lock().stop_acquisition() {
            error!("Failed to stop acquisition: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::callback::StreamStatus;
    use crate::offline::OfflineDevice;
    use crate::output::{ActiveStream, StreamDriver};
    use crate::sequencer::SequenceOptions;
    use crate::source::MemorySource;
    use oeaudio_control::{MockTransport, RecordingController};
    use oeaudio_core::Error;

    fn config() -> SessionConfig {
        SessionConfig {
            block_size: 10,
            buffer_size: 4,
            gap: Duration::from_millis(10),
            warmup: Duration::ZERO,
            rec_dir: "/data".to_string(),
            prepend: "p_".to_string(),
            append: "_a".to_string(),
        }
    }

    fn session(transport: &MockTransport) -> Session<MemorySource> {
        let sources = vec![
            MemorySource::new("a", 1000, 1, vec![0.5; 50]).unwrap(),
            MemorySource::new("b", 1000, 1, vec![0.5; 50]).unwrap(),
        ];
        let sequencer = Sequencer::build(sources, SequenceOptions::default()).unwrap();
        let controller = RecordingController::with_transport(transport.clone()).into_shared();
        Session::new(sequencer, controller, config()).unwrap()
    }

    #[test]
    fn test_full_session_request_order() {
        let transport = MockTransport::new();
        let mut device = OfflineDevice::new();
        let summary = session(&transport).run(&mut device).unwrap();

        assert_eq!(
            transport.requests(),
            vec![
                "StartAcquisition",
                "StartRecord RecDir=/data PrependText=p_ AppendText=_a",
                "GetRecordingPath",
                "start a",
                "stop a",
                "start b",
                "stop b",
                "StopRecord",
                "StopAcquisition",
            ]
        );
        assert_eq!(summary.stimuli_presented, 2);
        assert_eq!(summary.blocks_played, 11);
        assert_eq!(summary.messages, 4);
        assert!(!summary.interrupted);
        assert_eq!(summary.recording_path.as_deref(), Some("/tmp/oeaudio-mock"));
    }

    #[test]
    fn test_dummy_controller_session() {
        let sources = vec![MemorySource::silence("s", 1000, 30).unwrap()];
        let sequencer = Sequencer::build(sources, SequenceOptions::default()).unwrap();
        let session = Session::new(
            sequencer,
            RecordingController::dummy().into_shared(),
            config(),
        )
        .unwrap();

        let summary = session.run(&mut OfflineDevice::new()).unwrap();
        assert_eq!(summary.stimuli_presented, 1);
        assert_eq!(summary.recording_path.as_deref(), Some("dummy"));
    }

    #[test]
    fn test_cancel_runs_cleanup() {
        let transport = MockTransport::new();
        let session = session(&transport);
        session.cancel_flag().store(true, Ordering::Relaxed);

        let summary = session.run(&mut OfflineDevice::new()).unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.stimuli_presented, 0);

        let requests = transport.requests();
        assert_eq!(
            &requests[requests.len() - 4..],
            &["start a", "interrupted", "StopRecord", "StopAcquisition"]
        );
    }

    #[test]
    fn test_controller_failure_still_stops_recording() {
        let transport = MockTransport::new().with_reply("StartRecord", "Busy");
        let result = session(&transport).run(&mut OfflineDevice::new());
        assert!(matches!(result, Err(Error::Protocol { .. })));

        let requests = transport.requests();
        assert_eq!(requests[0], "StartAcquisition");
        assert!(requests[2].starts_with("aborted: "));
        assert_eq!(&requests[3..], &["StopRecord", "StopAcquisition"]);
    }

    struct NoopStream;

    impl ActiveStream for NoopStream {
        fn close(self: Box<Self>) {}
    }

    /// Renders a single cycle with the wrong frame count.
    struct MisconfiguredDevice;

    impl AudioDevice for MisconfiguredDevice {
        fn start(
            &mut self,
            params: StreamParams,
            callback: PlaybackCallback,
        ) -> Result<StreamHandle> {
            let (mut driver, finished) = StreamDriver::new(callback);
            let frames = params.block_size / 2;
            let mut out = vec![0.0; frames * usize::from(params.channels)];
            driver.render(&mut out, frames, StreamStatus::default());
            Ok(StreamHandle::new(finished, Box::new(NoopStream)))
        }
    }

    #[test]
    fn test_device_abort_is_reported() {
        let transport = MockTransport::new();
        let result = session(&transport).run(&mut MisconfiguredDevice);
        assert!(matches!(
            result,
            Err(Error::FrameCountMismatch {
                expected: 10,
                got: 5
            })
        ));

        let requests = transport.requests();
        let tail = &requests[requests.len() - 3..];
        assert!(tail[0].starts_with("aborted: "));
        assert_eq!(&tail[1..], &["StopRecord", "StopAcquisition"]);
    }

    /// Keeps the driver alive without ever rendering.
    struct StalledStream {
        _driver: StreamDriver,
    }

    impl ActiveStream for StalledStream {
        fn close(self: Box<Self>) {}
    }

    struct StalledDevice;

    impl AudioDevice for StalledDevice {
        fn start(
            &mut self,
            _params: StreamParams,
            callback: PlaybackCallback,
        ) -> Result<StreamHandle> {
            let (driver, finished) = StreamDriver::new(callback);
            Ok(StreamHandle::new(
                finished,
                Box::new(StalledStream { _driver: driver }),
            ))
        }
    }

    #[test]
    fn test_queue_overrun_stops_recording() {
        let transport = MockTransport::new();
        let result = session(&transport).run(&mut StalledDevice);
        assert!(matches!(result, Err(Error::QueueOverrun { .. })));

        // Nothing was rendered, so no stimulus message reached the recorder.
        let requests = transport.requests();
        assert_eq!(requests.len(), 6);
        let tail = &requests[requests.len() - 3..];
        assert!(
            tail[0].starts_with("aborted: Playback queue overrun"),
            "{tail:?}"
        );
        assert_eq!(&tail[1..], &["StopRecord", "StopAcquisition"]);
    }

    #[test]
    fn test_session_config_rejects_overflowing_gap() {
        let mut config = PresenterConfig::default();
        config.presentation.gap = 1e30;
        assert!(matches!(
            SessionConfig::from_config(&config),
            Err(Error::Config(_))
        ));

        config.presentation.gap = 0.25;
        let session_config = SessionConfig::from_config(&config).unwrap();
        assert_eq!(session_config.gap, Duration::from_millis(250));
        assert_eq!(session_config.block_size, config.audio.block_size);
    }
}

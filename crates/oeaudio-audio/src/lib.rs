//! # oeaudio-audio
//!
//! Real-time stimulus playback pipeline.
//!
//! Components:
//! - Sample sources decoding stimulus files block by block, with an optional
//!   synthesized sync click channel
//! - A sequencer applying repeats, seeded shuffling and looping
//! - A bounded playback queue between the feeder thread and the audio callback
//! - The real-time callback and the cpal/offline output devices driving it
//! - The session tying playback to the recording controller

pub mod callback;
pub mod feeder;
pub mod offline;
pub mod output;
pub mod queue;
pub mod sequencer;
pub mod session;
pub mod source;

pub use callback::{CallbackOutcome, CallbackStats, PlaybackCallback, StreamStatus};
pub use feeder::{FeedOutcome, Feeder, FeederConfig};
pub use offline::OfflineDevice;
pub use output::{
    list_output_devices, ActiveStream, AudioDevice, CpalDevice, DeviceInfo, StreamDriver,
    StreamEnd, StreamHandle, StreamParams,
};
pub use queue::{playback_queue, QueueConsumer, QueueItem, QueueProducer, TryPopError};
pub use sequencer::{SequenceOptions, Sequencer};
pub use session::{Session, SessionConfig, SessionSummary};
pub use source::{FileSource, MemorySource, SampleSource};

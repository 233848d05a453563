//! # oeaudio-control
//!
//! Client for the Open Ephys network-events protocol: a strictly synchronous
//! request/reply dialect used to start and stop acquisition and recording and
//! to write timestamped text messages into the recording.

pub mod controller;
pub mod transport;

pub use controller::{RecordingController, SessionState, SharedController, DUMMY_REPLY};
pub use transport::{MockTransport, Transport, ZmqTransport};

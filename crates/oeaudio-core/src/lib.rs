//! # oeaudio-core
//!
//! Core types, configuration, and error handling for oeaudio, the acoustic
//! stimulus presenter for Open Ephys experiments.

pub mod config;
pub mod error;

pub use config::{AudioConfig, PresentationConfig, PresenterConfig, RecordingConfig};
pub use error::{Error, Result};

//! Error types for oeaudio.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using oeaudio's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for oeaudio.
#[derive(Error, Debug)]
pub enum Error {
    // Stimulus set errors
    #[error("No stimuli given")]
    EmptyInput,

    #[error("Number of repeats must be a positive integer")]
    NonPositiveRepeats,

    #[error("Sampling rate is not the same in all files: {name} is {found} Hz, expected {expected} Hz")]
    RateMismatch {
        name: String,
        expected: u32,
        found: u32,
    },

    #[error("Channel count is not the same in all files: {name} has {found}, expected {expected}")]
    ChannelMismatch {
        name: String,
        expected: u16,
        found: u16,
    },

    #[error("Stimulus file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unreadable stimulus file {}: {reason}", path.display())]
    UnreadableFormat { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // Audio errors
    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Output underflow reported by audio device")]
    DeviceUnderflow,

    #[error("Audio device delivered {got} frames, expected {expected}")]
    FrameCountMismatch { expected: usize, got: usize },

    // Playback queue errors
    #[error("Playback queue overrun: push blocked longer than {timeout:?}")]
    QueueOverrun { timeout: Duration },

    #[error("Playback queue is full")]
    QueueFull,

    // Recording controller errors
    #[error("Unexpected reply from recording system: expected {expected:?}, received {received:?}")]
    Protocol { expected: String, received: String },

    #[error("Recording system connection error: {0}")]
    Connection(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error comes from a bad stimulus set or configuration.
    ///
    /// These are raised at start-up, before any playback is attempted.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput
                | Self::NonPositiveRepeats
                | Self::RateMismatch { .. }
                | Self::ChannelMismatch { .. }
                | Self::FileNotFound(_)
                | Self::UnreadableFormat { .. }
                | Self::Config(_)
        )
    }

    /// Returns true if the audio device missed a real-time deadline or is misconfigured.
    pub const fn is_device(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnderflow | Self::FrameCountMismatch { .. } | Self::AudioOutput(_)
        )
    }

    /// Returns true if this error was raised talking to the recording system.
    pub const fn is_controller(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Connection(_))
    }

    /// Process exit status for a run that ended with this error.
    pub const fn exit_code(&self) -> u8 {
        if self.is_configuration() {
            2
        } else if self.is_device() {
            3
        } else if self.is_controller() {
            4
        } else if matches!(self, Self::Cancelled) {
            130
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::EmptyInput.is_configuration());
        assert!(Error::RateMismatch {
            name: "b.wav".into(),
            expected: 44100,
            found: 48000
        }
        .is_configuration());
        assert!(Error::DeviceUnderflow.is_device());
        assert!(!Error::DeviceUnderflow.is_configuration());
        assert!(Error::Connection("timeout".into()).is_controller());
        assert!(!Error::QueueOverrun {
            timeout: Duration::from_millis(10)
        }
        .is_controller());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::NonPositiveRepeats.exit_code(), 2);
        assert_eq!(Error::Config("gap".into()).exit_code(), 2);
        assert_eq!(
            Error::FrameCountMismatch {
                expected: 1024,
                got: 512
            }
            .exit_code(),
            3
        );
        assert_eq!(Error::Connection("refused".into()).exit_code(), 4);
        assert_eq!(Error::Cancelled.exit_code(), 130);
        assert_eq!(
            Error::QueueOverrun {
                timeout: Duration::from_millis(10)
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::Protocol {
            expected: "StartedAcquisition".into(),
            received: "NotReady".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unexpected reply from recording system: expected \"StartedAcquisition\", received \"NotReady\""
        );
        let err = Error::FrameCountMismatch {
            expected: 1024,
            got: 512,
        };
        assert_eq!(
            err.to_string(),
            "Audio device delivered 512 frames, expected 1024"
        );
    }
}

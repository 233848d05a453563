//! Recording controller: acquisition/recording lifecycle and in-band messages.

use std::sync::Arc;
use std::time::Duration;

use oeaudio_core::{Error, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::transport::{Transport, ZmqTransport};

/// Reply returned by every operation when no endpoint is configured.
pub const DUMMY_REPLY: &str = "dummy";

/// Lifecycle of the external recorder as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Acquiring,
    Recording,
}

/// Controller shared between the session thread and the audio callback.
///
/// The protocol allows a single outstanding request, so every call goes
/// through the mutex.
pub type SharedController = Arc<Mutex<RecordingController>>;

/// Synchronous client for the recording system.
///
/// Without a transport the controller runs in dummy mode: every operation
/// succeeds, returns [`DUMMY_REPLY`] and performs no I/O.
pub struct RecordingController {
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
}

impl RecordingController {
    /// Controller that talks to nothing.
    pub fn dummy() -> Self {
        Self {
            transport: None,
            state: SessionState::Idle,
        }
    }

    /// Controller using an already established transport.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Some(Box::new(transport)),
            state: SessionState::Idle,
        }
    }

    /// Connect to `address`, or build a dummy controller if no address is given.
    pub fn connect(address: Option<&str>, timeout: Duration) -> Result<Self> {
        match address {
            Some(address) => {
                let transport = ZmqTransport::connect(address, timeout)?;
                info!("Recording controller connected to {address}");
                Ok(Self::with_transport(transport))
            }
            None => {
                info!("No recording system configured; controller running in dummy mode");
                Ok(Self::dummy())
            }
        }
    }

    /// Wrap the controller for sharing with the audio callback.
    pub fn into_shared(self) -> SharedController {
        Arc::new(Mutex::new(self))
    }

    pub const fn is_dummy(&self) -> bool {
        self.transport.is_none()
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> &str {
        self.transport
            .as_ref()
            .map_or(DUMMY_REPLY, |transport| transport.endpoint())
    }

    fn send(&mut self, request: &str) -> Result<String> {
        match self.transport.as_mut() {
            Some(transport) => transport.request(request),
            None => Ok(DUMMY_REPLY.to_string()),
        }
    }

    /// Send `request` and check the reply against `expected`.
    fn exchange(&mut self, request: &str, expected: &str) -> Result<String> {
        let reply = self.send(request)?;
        if self.is_dummy() || reply == expected {
            debug!("{request} -> {reply}");
            Ok(reply)
        } else {
            Err(Error::Protocol {
                expected: expected.to_string(),
                received: reply,
            })
        }
    }

    fn transition(&mut self, from: SessionState, to: SessionState) {
        if self.state != from {
            warn!(
                "Recording system is {:?}, expected {:?} before moving to {:?}",
                self.state, from, to
            );
        }
        self.state = to;
    }

    /// Start data acquisition.
    pub fn start_acquisition(&mut self) -> Result<String> {
        let reply = self.exchange("StartAcquisition", "StartedAcquisition")?;
        self.transition(SessionState::Idle, SessionState::Acquiring);
        Ok(reply)
    }

    /// Stop data acquisition.
    pub fn stop_acquisition(&mut self) -> Result<String> {
        let reply = self.exchange("StopAcquisition", "StoppedAcquisition")?;
        self.transition(SessionState::Acquiring, SessionState::Idle);
        Ok(reply)
    }

    /// Start recording and return the recording path reported by the recorder.
    pub fn start_recording(&mut self, dir: &str, prepend: &str, append: &str) -> Result<String> {
        let request = format!("StartRecord RecDir={dir} PrependText={prepend} AppendText={append}");
        self.exchange(&request, "StartedRecording")?;
        self.transition(SessionState::Acquiring, SessionState::Recording);

        let path = self.send("GetRecordingPath")?;
        info!("Recording to {path}");
        Ok(path)
    }

    /// Stop recording; acquisition keeps running.
    pub fn stop_recording(&mut self) -> Result<String> {
        let reply = self.exchange("StopRecord", "StoppedRecording")?;
        self.transition(SessionState::Recording, SessionState::Acquiring);
        Ok(reply)
    }

    /// Write `text` into the recording's message log. The reply is not checked.
    pub fn message(&mut self, text: &str) -> Result<String> {
        self.send(text)
    }
}

impl Default for RecordingController {
    fn default() -> Self {
        Self::dummy()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_dummy_mode_succeeds_without_io() {
        let mut controller = RecordingController::dummy();
        assert!(controller.is_dummy());
        assert_eq!(controller.endpoint(), DUMMY_REPLY);
        assert_eq!(controller.start_acquisition().unwrap(), DUMMY_REPLY);
        assert_eq!(controller.start_recording("", "", "").unwrap(), DUMMY_REPLY);
        assert_eq!(controller.message("start a.wav").unwrap(), DUMMY_REPLY);
        assert_eq!(controller.stop_recording().unwrap(), DUMMY_REPLY);
        assert_eq!(controller.stop_acquisition().unwrap(), DUMMY_REPLY);
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_connect_without_address_is_dummy() {
        let controller = RecordingController::connect(None, Duration::from_secs(1)).unwrap();
        assert!(controller.is_dummy());
    }

    #[test]
    fn test_lifecycle_requests() {
        let transport = MockTransport::new();
        let mut controller = RecordingController::with_transport(transport.clone());
        assert!(!controller.is_dummy());
        assert_eq!(controller.endpoint(), "mock");

        controller.start_acquisition().unwrap();
        assert_eq!(controller.state(), SessionState::Acquiring);
        let path = controller
            .start_recording("/data", "mouse1_", "_tones")
            .unwrap();
        assert_eq!(path, "/tmp/oeaudio-mock");
        assert_eq!(controller.state(), SessionState::Recording);
        controller.message("start a.wav").unwrap();
        controller.stop_recording().unwrap();
        controller.stop_acquisition().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);

        assert_eq!(
            transport.requests(),
            vec![
                "StartAcquisition",
                "StartRecord RecDir=/data PrependText=mouse1_ AppendText=_tones",
                "GetRecordingPath",
                "start a.wav",
                "StopRecord",
                "StopAcquisition",
            ]
        );
    }

    #[test]
    fn test_unexpected_reply_is_protocol_error() {
        let transport = MockTransport::new().with_reply("StartAcquisition", "NotReady");
        let mut controller = RecordingController::with_transport(transport);

        match controller.start_acquisition() {
            Err(Error::Protocol { expected, received }) => {
                assert_eq!(expected, "StartedAcquisition");
                assert_eq!(received, "NotReady");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_message_reply_not_validated() {
        let transport = MockTransport::new().with_reply("note", "anything at all");
        let mut controller = RecordingController::with_transport(transport);
        assert_eq!(controller.message("note 1").unwrap(), "anything at all");
    }

    #[test]
    fn test_unreachable_is_connection_error() {
        let mut controller = RecordingController::with_transport(MockTransport::unreachable());
        assert!(matches!(
            controller.stop_recording(),
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn test_shared_controller_serializes_requests() {
        let transport = MockTransport::new();
        let shared = RecordingController::with_transport(transport.clone()).into_shared();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        shared.lock().message(&format!("msg {i}-{j}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(transport.requests().len(), 40);
    }
}

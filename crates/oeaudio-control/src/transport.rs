//! Request/reply transports for the recording controller.

use std::sync::Arc;
use std::time::Duration;

use oeaudio_core::{Error, Result};
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, trace};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// A synchronous request/reply channel to the recording system.
///
/// Exactly one request is outstanding at a time: `request` sends and then
/// waits for the matching reply.
pub trait Transport: Send {
    /// Send one request and return the reply text.
    fn request(&mut self, request: &str) -> Result<String>;

    /// Human-readable endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// ZeroMQ REQ socket transport.
///
/// The socket is driven by a private single-threaded tokio runtime so callers
/// stay synchronous. A REQ socket that missed a reply cannot send again, so
/// after any failure the transport refuses further requests.
pub struct ZmqTransport {
    runtime: Runtime,
    socket: ReqSocket,
    endpoint: String,
    timeout: Duration,
    broken: bool,
}

impl ZmqTransport {
    /// Connect to `endpoint` (e.g. `tcp://localhost:5556`).
    ///
    /// `timeout` bounds both the connection attempt and every reply.
    pub fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Connection(format!("Failed to start transport runtime: {e}")))?;

        let mut socket = ReqSocket::new();
        runtime
            .block_on(async { tokio::time::timeout(timeout, socket.connect(endpoint)).await })
            .map_err(|_| Error::Connection(format!("Timed out connecting to {endpoint}")))?
            .map_err(|e| Error::Connection(format!("Failed to connect to {endpoint}: {e}")))?;

        debug!("Connected to recording system at {endpoint}");

        Ok(Self {
            runtime,
            socket,
            endpoint: endpoint.to_string(),
            timeout,
            broken: false,
        })
    }
}

impl Transport for ZmqTransport {
    fn request(&mut self, request: &str) -> Result<String> {
        if self.broken {
            return Err(Error::Connection(format!(
                "Socket to {} is unusable after an earlier failure",
                self.endpoint
            )));
        }

        let socket = &mut self.socket;
        let timeout = self.timeout;
        let message = ZmqMessage::from(request.to_string());

        let result = self.runtime.block_on(async move {
            tokio::time::timeout(timeout, socket.send(message))
                .await
                .map_err(|_| Error::Connection(format!("Could not send within {timeout:?}")))?
                .map_err(|e| Error::Connection(format!("Send failed: {e}")))?;

            let reply = tokio::time::timeout(timeout, socket.recv())
                .await
                .map_err(|_| Error::Connection(format!("No reply within {timeout:?}")))?
                .map_err(|e| Error::Connection(format!("Receive failed: {e}")))?;

            String::try_from(reply)
                .map_err(|e| Error::Connection(format!("Reply is not text: {e}")))
        });

        match &result {
            Ok(reply) => trace!("{request:?} -> {reply:?}"),
            Err(_) => self.broken = true,
        }
        result
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// In-process stand-in for the recording system.
///
/// Answers each lifecycle command with the reply Open Ephys sends, echoes a
/// recording path for `GetRecordingPath`, and acknowledges anything else as a
/// logged message. Every request is appended to a shared log that stays
/// readable after the transport has been moved into a controller.
#[derive(Clone, Default)]
pub struct MockTransport {
    log: Arc<Mutex<Vec<String>>>,
    overrides: Arc<Mutex<Vec<(String, String)>>>,
    unreachable: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every request fails with a connection error.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Reply `reply` to requests starting with `command` instead of the default.
    pub fn with_reply(self, command: &str, reply: &str) -> Self {
        self.overrides
            .lock()
            .push((command.to_string(), reply.to_string()));
        self
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn default_reply(request: &str) -> String {
        let command = request.split_whitespace().next().unwrap_or_default();
        match command {
            "StartAcquisition" => "StartedAcquisition".to_string(),
            "StopAcquisition" => "StoppedAcquisition".to_string(),
            "StartRecord" => "StartedRecording".to_string(),
            "StopRecord" => "StoppedRecording".to_string(),
            "GetRecordingPath" => "/tmp/oeaudio-mock".to_string(),
            _ => "Message received".to_string(),
        }
    }
}

impl Transport for MockTransport {
    fn request(&mut self, request: &str) -> Result<String> {
        if self.unreachable {
            return Err(Error::Connection("Mock endpoint is unreachable".to_string()));
        }
        self.log.lock().push(request.to_string());

        let reply = self
            .overrides
            .lock()
            .iter()
            .find(|(command, _)| request.starts_with(command.as_str()))
            .map(|(_, reply)| reply.clone());
        Ok(reply.unwrap_or_else(|| Self::default_reply(request)))
    }

    fn endpoint(&self) -> &str {
        "mock"
    }
}

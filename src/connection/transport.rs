//! Outbound side of a client connection.
//!
//! The registry only ever talks to clients through [`AudioTransport`], so the same
//! connection bookkeeping serves the raw-binary and the JSON-enveloped sockets.

use async_trait::async_trait;
use std::fmt;

/// Errors a transport can report when writing to its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The client is gone; the connection must be torn down
    Disconnected,

    /// A single write failed but the connection may still be usable
    Send(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Disconnected => write!(f, "Transport disconnected"),
            TransportError::Send(msg) => write!(f, "Transport send failed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Write half of a connection.
///
/// Each adapter decides how audio and end-of-turn marks look on the wire.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Send one chunk of PCM16 audio to the client.
    async fn send_audio(&self, audio: Vec<u8>) -> Result<(), TransportError>;

    /// Tell the client that the current agent turn has finished playing out.
    async fn send_end_of_turn(&self) -> Result<(), TransportError>;

    /// Close the underlying connection.
    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// What a [`RecordingTransport`] saw, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Sent {
        Audio(Vec<u8>),
        EndOfTurn,
        Close,
    }

    /// Test transport that records every write and can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Mutex<Vec<Sent>>,
        pub fail_with: Mutex<Option<TransportError>>,
    }

    impl RecordingTransport {
        pub(crate) fn failing(err: TransportError) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_with: Mutex::new(Some(err)),
            }
        }

        pub(crate) fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn record(&self, item: Sent) -> Result<(), TransportError> {
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            self.sent.lock().unwrap().push(item);
            Ok(())
        }
    }

    #[async_trait]
    impl AudioTransport for RecordingTransport {
        async fn send_audio(&self, audio: Vec<u8>) -> Result<(), TransportError> {
            self.record(Sent::Audio(audio))
        }

        async fn send_end_of_turn(&self) -> Result<(), TransportError> {
            self.record(Sent::EndOfTurn)
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(Sent::Close);
            Ok(())
        }
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Disconnected.to_string(), "Transport disconnected");
        assert_eq!(
            TransportError::Send("boom".to_string()).to_string(),
            "Transport send failed: boom"
        );
    }
}

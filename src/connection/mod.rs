//! # Connections
//!
//! Bookkeeping for live client connections, independent of the wire format.

pub mod registry;
pub mod transport;

pub use registry::{
    ConnectionRegistry, DetectorFactory, ReceiveOutcome, Registration, SendOutcome,
};
pub use transport::{AudioTransport, TransportError};

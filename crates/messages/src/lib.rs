//! Incoming message surface consumed from the messaging layer.

pub mod envelope;

pub use envelope::{MessageEnvelope, headers};

//! Pluggable wire serialization.
//!
//! The [`MessageCodec`] trait lets deployments swap the wire format without
//! touching the protocol code; [`JsonCodec`] is the default. Transports deal
//! only in bytes, so the codec is the sole place envelopes meet the wire.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::SynodError;

/// Pluggable message serialization format.
///
/// Message types are bounded by serde's `Serialize`/`DeserializeOwned`, so
/// any serde-compatible format (JSON, bincode, messagepack, ...) can back
/// an implementation.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a message to bytes.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, SynodError>;

    /// Decode bytes into a message.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, SynodError>;
}

/// JSON codec backed by `serde_json`.
///
/// Human-readable, which makes protocol traces easy to inspect; swap in a
/// binary codec where wire size matters.
#[derive(Clone, Copy, Default, Debug)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, SynodError> {
        serde_json::to_vec(msg).map_err(|e| SynodError::Codec(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, SynodError> {
        serde_json::from_slice(buf).map_err(|e| SynodError::Codec(e.to_string()))
    }
}

//! Payload encoding for events and snapshots.
//!
//! Stores hold one serializer for events and one for snapshots. Both default
//! to [`JsonSerializer`]; any other wire format plugs in by implementing
//! [`Serializer`] for the value type.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error from encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to decode payload: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Converts values of `T` to and from opaque bytes.
///
/// Implementations must round-trip: `deserialize(&serialize(v)?)? == v`.
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON encoding of any serde value.
///
/// Settings are fixed at construction and apply only to this instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Compact JSON.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indented JSON, easier to read in a table console.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        bytes.map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

/// Adapts a pair of functions into a [`Serializer`].
///
/// ```
/// use eventide::codec::{CodecError, FnSerializer, Serializer};
///
/// let codec = FnSerializer::new(
///     |s: &String| Ok(s.as_bytes().to_vec()),
///     |b: &[u8]| String::from_utf8(b.to_vec()).map_err(|e| CodecError::Decode(Box::new(e))),
/// );
/// let bytes = codec.serialize(&"hi".to_string()).unwrap();
/// assert_eq!(codec.deserialize(&bytes).unwrap(), "hi");
/// ```
pub struct FnSerializer<T, S, D> {
    serialize: S,
    deserialize: D,
    _value: PhantomData<fn() -> T>,
}

impl<T, S, D> FnSerializer<T, S, D>
where
    S: Fn(&T) -> Result<Vec<u8>, CodecError> + Send + Sync,
    D: Fn(&[u8]) -> Result<T, CodecError> + Send + Sync,
{
    pub fn new(serialize: S, deserialize: D) -> Self {
        Self {
            serialize,
            deserialize,
            _value: PhantomData,
        }
    }
}

impl<T, S, D> Serializer<T> for FnSerializer<T, S, D>
where
    S: Fn(&T) -> Result<Vec<u8>, CodecError> + Send + Sync,
    D: Fn(&[u8]) -> Result<T, CodecError> + Send + Sync,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        (self.serialize)(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        (self.deserialize)(bytes)
    }
}

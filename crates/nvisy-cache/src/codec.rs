//! Value codecs.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::BoxedError;

/// Error produced by a [`Codec`].
pub type CodecError = BoxedError;

/// Converts values of type `T` to and from the bytes kept in the store.
///
/// Implementations must round-trip losslessly: `compare_and_set` compares a
/// decoded stored value against the expected one, so a lossy codec makes that
/// comparison meaningless.
pub trait Codec<T>: Send + Sync + 'static {
    /// Serializes a value.
    fn encode(&self, value: &T) -> Result<Bytes, CodecError>;

    /// Deserializes a value.
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// Numbers written by `incr`/`decr` are plain ASCII decimals, which are valid
/// JSON, so counters can be read back through this codec as integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Bytes, CodecError> {
        Ok(serde_json::to_vec(value)?.into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

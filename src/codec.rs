//! Payload codecs.
//!
//! The log stores bodies as opaque bytes. A [`Codec`] turns them into the
//! values handed to `consume` callers and subscription listeners.

use crate::error::{RemqError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Encodes and decodes message bodies.
pub trait Codec: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    fn encode(&self, item: &Self::Item) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Item>;
}

/// Passes bodies through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Item = Vec<u8>;

    fn encode(&self, item: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(item.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// JSON bodies via `serde_json`.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    /// Create a new JSON codec.
    pub fn new() -> Self {
        JsonCodec(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = T;

    fn encode(&self, item: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(item).map_err(|e| RemqError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| RemqError::Deserialization(e.to_string()))
    }
}

/// MessagePack bodies via `rmp-serde`.
pub struct MsgPackCodec<T>(PhantomData<fn() -> T>);

impl<T> MsgPackCodec<T> {
    /// Create a new MessagePack codec.
    pub fn new() -> Self {
        MsgPackCodec(PhantomData)
    }
}

impl<T> Default for MsgPackCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MsgPackCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MsgPackCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MsgPackCodec")
    }
}

impl<T> Codec for MsgPackCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = T;

    fn encode(&self, item: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(item)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        account_id: u64,
        state: String,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec::<Account>::new();
        let bytes = codec
            .encode(&Account {
                account_id: 7,
                state: "active".into(),
            })
            .unwrap();
        assert_eq!(bytes, br#"{"account_id":7,"state":"active"}"#);
        assert_eq!(codec.decode(&bytes).unwrap().account_id, 7);
    }

    #[test]
    fn test_json_decode_failure() {
        let codec = JsonCodec::<Account>::new();
        let err = codec.decode(b"not json").unwrap_err();
        assert!(matches!(err, RemqError::Deserialization(_)));
    }

    #[test]
    fn test_msgpack_decode_failure() {
        let codec = MsgPackCodec::<Account>::new();
        let err = codec.decode(&[0xc1]).unwrap_err();
        assert!(matches!(err, RemqError::Deserialization(_)));
    }

    #[test]
    fn test_raw_codec_is_identity() {
        assert_eq!(RawCodec.decode(b"foo 1").unwrap(), b"foo 1");
    }
}

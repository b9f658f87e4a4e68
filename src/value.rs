//! The value codec: opaque round-trip serialization of user values and
//! errors into length-delimited blobs carried in the protocol envelope. Every
//! encoded value is tagged with a type-URL string so an orchestrator that
//! recognizes a well-known blob shape (e.g. the error message type) can
//! inspect it without fully deserializing. Encoding itself goes through
//! `serde` + `bincode` rather than a language-specific object format.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Type URL used for ordinary application values encoded with this codec.
pub const TYPE_URL_VALUE: &str = "type.dispatch-sdk.rs/dispatch.sdk.v1.Value";

/// Type URL used for [`crate::proto::Error`] payloads, so that an orchestrator
/// inspecting a blob it recognizes (e.g. to log a failure) doesn't need to
/// first know the originating language's error type.
pub const TYPE_URL_ERROR: &str = "type.dispatch-sdk.rs/dispatch.sdk.v1.Error";

/// An opaque, length-delimited, type-tagged blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub type_url: String,
    pub bytes: Vec<u8>,
}

/// Errors that can occur while encoding or decoding a [`Value`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[from] Box<bincode::ErrorKind>),
    #[error("failed to decode value: type URL '{0}' does not match expected '{1}'")]
    TypeMismatch(String, String),
}

/// Encode an arbitrary serializable value into a tagged [`Value`] blob.
pub fn encode<T: Serialize>(value: &T) -> Result<Value, CodecError> {
    let bytes = bincode::serialize(value)?;
    Ok(Value {
        type_url: TYPE_URL_VALUE.to_string(),
        bytes,
    })
}

/// Decode a [`Value`] blob previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, CodecError> {
    if value.type_url != TYPE_URL_VALUE {
        return Err(CodecError::TypeMismatch(
            value.type_url.clone(),
            TYPE_URL_VALUE.to_string(),
        ));
    }
    Ok(bincode::deserialize(&value.bytes)?)
}

/// Encode a value with an explicit, caller-chosen type URL. Used for payloads
/// that want to advertise their shape to the orchestrator (e.g. errors).
pub fn encode_tagged<T: Serialize>(value: &T, type_url: &str) -> Result<Value, CodecError> {
    let bytes = bincode::serialize(value)?;
    Ok(Value {
        type_url: type_url.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Record {
        name: String,
        count: u32,
        tags: Vec<String>,
    }

    #[test]
    fn round_trips_scalars_and_bytes() {
        let encoded = encode(&42i64).unwrap();
        assert_eq!(decode::<i64>(&encoded).unwrap(), 42);

        let encoded = encode(&"hello".to_string()).unwrap();
        assert_eq!(decode::<String>(&encoded).unwrap(), "hello");

        let bytes = vec![1u8, 2, 3, 255];
        let encoded = encode(&bytes).unwrap();
        assert_eq!(decode::<Vec<u8>>(&encoded).unwrap(), bytes);
    }

    #[test]
    fn round_trips_structured_records() {
        let record = Record {
            name: "widget".into(),
            count: 3,
            tags: vec!["a".into(), "b".into()],
        };
        let encoded = encode(&record).unwrap();
        assert_eq!(decode::<Record>(&encoded).unwrap(), record);
    }

    #[test]
    fn decode_rejects_mismatched_type_url() {
        let encoded = encode_tagged(&42i64, "type.example/Other").unwrap();
        let err = decode::<i64>(&encoded).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch(_, _)));
    }
}

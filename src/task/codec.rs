use bincode::config::{standard, Config};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wire serialization strategy, chosen once per deployment.
///
/// Every place of a deployment must use the same codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Structural self-describing encoding (serde_json).
    #[default]
    Json,
    /// Compact binary encoding (bincode).
    Bincode,
}

fn bincode_config() -> impl Config {
    standard()
}

impl Codec {
    pub fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            Codec::Json => {
                serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
            }
            Codec::Bincode => bincode::serde::encode_to_vec(value, bincode_config())
                .map_err(|e| CodecError::Encode(e.to_string())),
        }
    }

    /// Decode `bytes` completely.
    pub fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        match self {
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
            }
            Codec::Bincode => {
                let (value, read) =
                    bincode::serde::decode_from_slice::<T, _>(bytes, bincode_config())
                        .map_err(|e| CodecError::Decode(e.to_string()))?;
                if read != bytes.len() {
                    return Err(CodecError::TrailingBytes(bytes.len() - read));
                }
                Ok(value)
            }
        }
    }

    /// Decode one value from the front of `bytes`, returning it together with
    /// the number of bytes it occupied.
    pub fn decode_prefix<T>(&self, bytes: &[u8]) -> Result<(T, usize), CodecError>
    where
        T: DeserializeOwned,
    {
        match self {
            Codec::Json => {
                let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<T>();
                match stream.next() {
                    Some(Ok(value)) => Ok((value, stream.byte_offset())),
                    Some(Err(e)) => Err(CodecError::Decode(e.to_string())),
                    None => Err(CodecError::Truncated),
                }
            }
            Codec::Bincode => bincode::serde::decode_from_slice::<T, _>(bytes, bincode_config())
                .map_err(|e| CodecError::Decode(e.to_string())),
        }
    }
}

impl FromStr for Codec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "bincode" => Ok(Codec::Bincode),
            other => Err(CodecError::UnknownCodec(other.to_string())),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Json => write!(f, "json"),
            Codec::Bincode => write!(f, "bincode"),
        }
    }
}

/// Serialization failures on either side of the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("frame truncated")]
    Truncated,
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    #[error("job type not registered: {0}")]
    UnregisteredJob(&'static str),
    #[error("unknown job key: {0}")]
    UnknownJobKey(u16),
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Header {
        jid: u16,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Body {
        name: String,
        values: Vec<u32>,
    }

    fn frame(codec: Codec) -> Vec<u8> {
        let mut bytes = codec.encode(&Header { jid: 7 }).unwrap();
        let body = Body {
            name: "body".to_string(),
            values: vec![1, 2, 3],
        };
        bytes.extend(codec.encode(&body).unwrap());
        bytes
    }

    #[test]
    fn test_prefix_split() {
        for codec in [Codec::Json, Codec::Bincode] {
            let bytes = frame(codec);
            let (header, read) = codec.decode_prefix::<Header>(&bytes).unwrap();
            assert_eq!(header, Header { jid: 7 });

            let body = codec.decode::<Body>(&bytes[read..]).unwrap();
            assert_eq!(body.values, vec![1, 2, 3], "codec: {}", codec);
        }
    }

    #[test]
    fn test_truncated_body_fails() {
        for codec in [Codec::Json, Codec::Bincode] {
            let bytes = frame(codec);
            let (_, read) = codec.decode_prefix::<Header>(&bytes).unwrap();
            let cut = &bytes[read..bytes.len() - 2];
            assert!(codec.decode::<Body>(cut).is_err(), "codec: {}", codec);
        }
    }

    #[test]
    fn test_empty_prefix() {
        assert_eq!(
            Codec::Json.decode_prefix::<Header>(&[]),
            Err(CodecError::Truncated)
        );
        assert!(Codec::Bincode.decode_prefix::<Header>(&[]).is_err());
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("json".parse::<Codec>(), Ok(Codec::Json));
        assert_eq!(" Bincode ".parse::<Codec>(), Ok(Codec::Bincode));
        assert!("kryo".parse::<Codec>().is_err());
    }
}

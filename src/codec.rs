use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// Translates typed values to and from the textual payloads the store holds.
///
/// The store is generic over its codec so callers can swap the default JSON
/// encoding for another serde format without touching the facades.
pub trait Codec: Send + Sync + 'static {
    fn encode<T>(&self, value: &T) -> Result<String>
    where
        T: Serialize + ?Sized;

    fn decode<T>(&self, payload: &str) -> Result<T>
    where
        T: DeserializeOwned;
}

/// JSON codec backed by `serde_json`. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Codec for Json {
    fn encode<T>(&self, value: &T) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        Ok(serde_json::to_string(value)?)
    }

    fn decode<T>(&self, payload: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::Error;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Player {
        name: String,
        score: u32,
    }

    #[test]
    fn encodes_and_decodes_structs() {
        let player = Player {
            name: "alice".to_string(),
            score: 7,
        };

        let payload = Json.encode(&player).unwrap();
        let decoded: Player = Json.decode(&payload).unwrap();

        assert_eq!(decoded, player);
    }

    #[test]
    fn encodes_unsized_values() {
        let payload = Json.encode("hello").unwrap();
        assert_eq!(payload, "\"hello\"");
    }

    #[test]
    fn decode_failure_is_a_codec_error() {
        let err = Json.decode::<Player>("not json").unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}

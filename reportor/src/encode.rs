use serde::Serialize;

#[derive(thiserror::Error, Debug)]
#[error("failed to encode record: {0}")]
pub struct EncodingError(#[from] serde_json::Error);

/// Serialize a snapshot into the JSON payload stored under its keys.
pub fn encode<T>(value: &T) -> Result<Vec<u8>, EncodingError>
where
    T: Serialize + ?Sized,
{
    Ok(serde_json::to_vec(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Device {
        id: &'static str,
        channels: u32,
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("device is being torn down"))
        }
    }

    #[test]
    fn encodes_compact_json() {
        let payload = encode(&Device {
            id: "cam1",
            channels: 2,
        })
        .unwrap();

        assert_eq!(payload, br#"{"id":"cam1","channels":2}"#);
    }

    #[test]
    fn non_string_map_keys_fail() {
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], "value");

        assert!(encode(&map).is_err());
    }

    #[test]
    fn serializer_errors_surface() {
        let error = encode(&Unserializable).unwrap_err();

        assert!(error.to_string().contains("device is being torn down"));
    }
}

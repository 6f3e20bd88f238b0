//! Key layout read by the rest of the fleet. Changing any of these strings
//! breaks every consumer of the stores.

use crate::identity::NodeIdentity;
use std::fmt;

pub const DEVICE_NAMESPACE: &str = "gbDevices";
pub const STREAM_NAMESPACE: &str = "streamPath";
pub const SERVICE_NAMESPACE: &str = "m7sService";

/// The keys a single record is written under.
///
/// `public` is shared by the whole fleet and last writer wins. `private` is
/// scoped to the reporting node and attributes the record to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordKeys {
    pub public: String,
    pub private: Option<String>,
}

impl RecordKeys {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.public.as_str()).chain(self.private.as_deref())
    }
}

impl fmt::Display for RecordKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.public)
    }
}

#[derive(Clone, Debug)]
pub struct KeySpace {
    owner_prefix: String,
    node: NodeIdentity,
}

impl KeySpace {
    pub fn new(owner_prefix: impl Into<String>, node: NodeIdentity) -> Self {
        Self {
            owner_prefix: owner_prefix.into(),
            node,
        }
    }

    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    pub fn device(&self, device_key: &str) -> RecordKeys {
        self.scoped(DEVICE_NAMESPACE, device_key)
    }

    pub fn stream(&self, stream_path: &str) -> RecordKeys {
        self.scoped(STREAM_NAMESPACE, stream_path)
    }

    /// The heartbeat is already node scoped and has no private twin.
    pub fn service(&self) -> RecordKeys {
        RecordKeys {
            public: format!("{}:{}", SERVICE_NAMESPACE, self.node),
            private: None,
        }
    }

    fn scoped(&self, namespace: &str, local_key: &str) -> RecordKeys {
        RecordKeys {
            public: format!("{}:{}", namespace, local_key),
            private: Some(format!(
                "{}:{}:{}:{}",
                self.owner_prefix, self.node, namespace, local_key
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_space() -> KeySpace {
        KeySpace::new("m7s", NodeIdentity::new("node-1"))
    }

    #[test]
    fn device_keys() {
        let keys = key_space().device("34020000001320000001");

        assert_eq!(keys.public, "gbDevices:34020000001320000001");
        assert_eq!(
            keys.private.as_deref(),
            Some("m7s:node-1:gbDevices:34020000001320000001")
        );
    }

    #[test]
    fn stream_keys_keep_slashes() {
        let keys = key_space().stream("live/cam1");

        assert_eq!(keys.public, "streamPath:live/cam1");
        assert_eq!(
            keys.private.as_deref(),
            Some("m7s:node-1:streamPath:live/cam1")
        );
    }

    #[test]
    fn service_key_has_no_private_twin() {
        let keys = key_space().service();

        assert_eq!(keys.public, "m7sService:node-1");
        assert_eq!(keys.private, None);
        assert_eq!(keys.iter().count(), 1);
    }

    #[test]
    fn iter_yields_public_first() {
        let keys = key_space().device("cam1");

        let all: Vec<_> = keys.iter().collect();

        assert_eq!(all, vec!["gbDevices:cam1", "m7s:node-1:gbDevices:cam1"]);
    }
}

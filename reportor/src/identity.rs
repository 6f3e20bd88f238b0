use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// The name this process reports under. Resolved once at startup and never
/// changed afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh identifier that only lives as long as this process.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("hardware identity unavailable: {0}")]
pub struct IdentityUnavailable(pub String);

/// Where the raw, unprotected machine id comes from.
pub trait MachineIdSource {
    fn machine_id(&self) -> Result<String, IdentityUnavailable>;
}

/// Reads the operating system's machine id.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostMachineId;

impl MachineIdSource for HostMachineId {
    fn machine_id(&self) -> Result<String, IdentityUnavailable> {
        let id = machine_uid::get().map_err(|e| IdentityUnavailable(e.to_string()))?;
        let id = id.trim();

        if id.is_empty() {
            return Err(IdentityUnavailable("machine id is empty".to_owned()));
        }

        Ok(id.to_owned())
    }
}

/// Derive a stable identity from the machine id without exposing it.
///
/// The machine id is used as HMAC-SHA256 key over `app_id`, so two
/// applications on the same host report different identities.
pub fn hardware_id(
    source: &impl MachineIdSource,
    app_id: &str,
) -> Result<NodeIdentity, IdentityUnavailable> {
    let machine_id = source.machine_id()?;

    let mut mac = HmacSha256::new_from_slice(machine_id.as_bytes())
        .map_err(|e| IdentityUnavailable(e.to_string()))?;
    mac.update(app_id.as_bytes());

    Ok(NodeIdentity(hex::encode(mac.finalize().into_bytes())))
}

/// Never fails: falls back to a random identity when the hardware one
/// cannot be derived.
pub fn resolve(source: &impl MachineIdSource, app_id: &str) -> NodeIdentity {
    match hardware_id(source, app_id) {
        Ok(id) => id,
        Err(error) => {
            let id = NodeIdentity::random();
            tracing::warn!(%error, node_id = %id, "Falling back to a generated node identity");
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMachineId(&'static str);

    impl MachineIdSource for FixedMachineId {
        fn machine_id(&self) -> Result<String, IdentityUnavailable> {
            Ok(self.0.to_owned())
        }
    }

    struct NoMachineId;

    impl MachineIdSource for NoMachineId {
        fn machine_id(&self) -> Result<String, IdentityUnavailable> {
            Err(IdentityUnavailable("unsupported platform".to_owned()))
        }
    }

    #[test]
    fn hardware_identity_is_stable() {
        let source = FixedMachineId("4c4c4544-0032-3610-8051-b8c04f4e3332");

        let first = resolve(&source, "monibuca");
        let second = resolve(&source, "monibuca");

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
    }

    #[test]
    fn hardware_identity_does_not_leak_machine_id() {
        let source = FixedMachineId("4c4c4544-0032-3610-8051-b8c04f4e3332");

        let id = resolve(&source, "monibuca");

        assert!(!id.as_str().contains("4c4c4544"));
    }

    #[test]
    fn app_id_changes_identity() {
        let source = FixedMachineId("machine");

        assert_ne!(resolve(&source, "monibuca"), resolve(&source, "other"));
    }

    #[test]
    fn known_protected_id() {
        // HMAC-SHA256(key = "key", msg = "The quick brown fox jumps over the lazy dog")
        let source = FixedMachineId("key");

        let id = hardware_id(&source, "The quick brown fox jumps over the lazy dog").unwrap();

        assert_eq!(
            id.as_str(),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn fallback_identities_differ() {
        let first = resolve(&NoMachineId, "monibuca");
        let second = resolve(&NoMachineId, "monibuca");

        assert_ne!(first, second);
        assert!(Uuid::parse_str(first.as_str()).is_ok());
    }

    #[test]
    fn unavailable_hardware_id_is_an_explicit_error() {
        assert_eq!(
            hardware_id(&NoMachineId, "monibuca"),
            Err(IdentityUnavailable("unsupported platform".to_owned()))
        );
    }
}

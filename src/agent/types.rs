use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::error::ValidationError;

/// Opaque identity of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn generate() -> Self { Self(Uuid::new_v4().simple().to_string()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self { Self(id.to_string()) }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self { Self(id) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self { Self { host: host.into(), port } }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}:{}", self.host, self.port) }
}

/// Shared secret presented to the agent during the handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self { Self(key.into()) }

    pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Credential(***)") }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub address: Address,
    pub credential: Credential,
    #[serde(default)]
    pub remarks: String,
}

impl AgentConfig {
    pub fn new(host: impl Into<String>, port: u16, credential: impl Into<String>) -> Self {
        Self {
            address: Address::new(host, port),
            credential: Credential::new(credential),
            remarks: String::new(),
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = remarks.into();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.address.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        if self.address.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    /// Returns a copy with every present field of `patch` applied.
    pub fn patched(&self, patch: &ConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(host) = &patch.host {
            next.address.host = host.clone();
        }
        if let Some(port) = patch.port {
            next.address.port = port;
        }
        if let Some(key) = &patch.credential {
            next.credential = Credential::new(key.clone());
        }
        if let Some(remarks) = &patch.remarks {
            next.remarks = remarks.clone();
        }
        next
    }

    /// Whether moving from `self` to `other` requires a new session.
    pub fn needs_reconnect(&self, other: &AgentConfig) -> bool {
        self.address != other.address || self.credential != other.credential
    }
}

/// Partial edit of an [`AgentConfig`]; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub credential: Option<String>,
    pub remarks: Option<String>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.port.is_none() && self.credential.is_none() && self.remarks.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Unknown,
    Available,
    Unavailable,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Availability::Unknown => "unknown",
            Availability::Available => "available",
            Availability::Unavailable => "unavailable",
        })
    }
}

/// Point-in-time view of a registry entry. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub address: Address,
    pub remarks: String,
    pub availability: Availability,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct_hex() {
        let a = AgentId::generate();
        let b = AgentId::generate();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let config = AgentConfig::new("10.0.0.1", 8080, "k1").with_remarks("edge");
        let patch = ConfigPatch { port: Some(9090), ..Default::default() };

        let next = config.patched(&patch);
        assert_eq!(next.address, Address::new("10.0.0.1", 9090));
        assert_eq!(next.credential.expose(), "k1");
        assert_eq!(next.remarks, "edge");
        assert!(config.needs_reconnect(&next));
    }

    #[test]
    fn test_remarks_change_keeps_session() {
        let config = AgentConfig::new("10.0.0.1", 8080, "k1");
        let next = config.patched(&ConfigPatch { remarks: Some(String::from("renamed")), ..Default::default() });

        assert!(!config.needs_reconnect(&next));
    }

    #[test]
    fn test_validation() {
        assert_eq!(AgentConfig::new(" ", 8080, "k").validate(), Err(ValidationError::EmptyHost));
        assert_eq!(AgentConfig::new("host", 0, "k").validate(), Err(ValidationError::InvalidPort));
        assert!(AgentConfig::new("host", 1, "").validate().is_ok());
    }

    #[test]
    fn test_credential_is_redacted() {
        let config = AgentConfig::new("host", 1, "super-secret");
        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[test]
    fn test_remarks_default_when_missing() {
        let config: AgentConfig = serde_json::from_str(r#"{"address":{"host":"a","port":1},"credential":"k"}"#).unwrap();
        assert_eq!(config.remarks, "");
    }
}

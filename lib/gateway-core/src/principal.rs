//! Authenticated caller identity propagated to backends
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque claim set of the authenticated caller.
///
/// The gateway never interprets the claims; it carries them to backends as an
/// encoded blob. Backends trust the gateway's network boundary for this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(pub Value);

impl Principal {
    /// Encode the claims for the forwarded identity header.
    pub fn encode(&self) -> String {
        self.0.to_string()
    }
}

impl From<Value> for Principal {
    fn from(claims: Value) -> Self {
        Self(claims)
    }
}

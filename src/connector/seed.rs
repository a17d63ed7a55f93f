use serde::{Deserialize, Serialize};

use crate::secret::SecretRef;

/// Configuration-supplied connectors for one namespace.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NamespaceSeed {
    /// Namespace receiving the connectors; empty means `default`.
    pub namespace: String,
    pub connectors: Vec<ConnectorSeed>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorSeed {
    pub name: String,
    pub driver: String,
    pub dsn: String,
    /// Optional pre-provisioned secret reference.
    pub secrets: Option<SecretRef>,
}

//! Secret store wire types: the data/metadata pair kept per path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata kept alongside a secret's data, Vault-KV-v2-shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub created_time: String,
    #[serde(default)]
    pub custom_metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    pub deletion_time: String,
    #[serde(default)]
    pub destroyed: bool,
    pub version: u32,
}

/// A single secret: opaque JSON data plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub data: HashMap<String, Value>,
    pub metadata: SecretMetadata,
}

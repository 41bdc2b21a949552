//! Vault-KV-v2-shaped HTTP envelope types used by the KMS HTTP front-end
//! (`cmd/anubis`) and consumed by Kiln's key-proxy client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pkg_types::SecretMetadata;

/// Request body for `PUT /v1/secret/data/<path>`.
#[derive(Debug, Clone, Deserialize)]
pub struct PutSecretRequest {
    pub data: HashMap<String, Value>,
}

/// Response envelope, Vault-KV-v2-shaped: `request_id`, `data`, and
/// parallel nullable fields kept for wire compatibility even though this
/// implementation never populates them.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SecretResponse<T: Serialize> {
    pub request_id: String,
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub lease_duration: u64,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_info: Option<Value>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Value>,
}

impl<T: Serialize> SecretResponse<T> {
    pub fn new(request_id: String, data: T) -> Self {
        SecretResponse {
            request_id,
            lease_id: String::new(),
            renewable: false,
            lease_duration: 0,
            data,
            wrap_info: None,
            warnings: None,
            auth: None,
        }
    }
}

/// The `data` payload of a `GET /v1/secret/data/<path>` response.
#[derive(Debug, Clone, Serialize)]
pub struct SecretDataPayload {
    pub data: HashMap<String, Value>,
    pub metadata: SecretMetadata,
}

/// The `data` payload of a `GET /v1/secret/metadata/<path>` response.
#[derive(Debug, Clone, Serialize)]
pub struct SecretMetadataPayload {
    #[serde(flatten)]
    pub metadata: SecretMetadata,
    pub current_version: u32,
}

/// The `data` payload of a `LIST /v1/secret/metadata/<path>` response.
#[derive(Debug, Clone, Serialize)]
pub struct ListPayload {
    pub keys: Vec<String>,
}

/// Body of `GET /v1/sys/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub initialized: bool,
    pub sealed: bool,
    pub standby: bool,
}

impl Default for HealthResponse {
    fn default() -> Self {
        HealthResponse {
            initialized: true,
            sealed: false,
            standby: false,
        }
    }
}

/// Body of `GET /v1/sys/seal-status`.
#[derive(Debug, Clone, Serialize)]
pub struct SealStatusResponse {
    pub sealed: bool,
    #[serde(rename = "t")]
    pub threshold: u32,
    #[serde(rename = "n")]
    pub shares: u32,
}

impl Default for SealStatusResponse {
    fn default() -> Self {
        SealStatusResponse {
            sealed: false,
            threshold: 1,
            shares: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub errors: Vec<String>,
}

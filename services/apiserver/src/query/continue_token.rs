//! Opaque list continuation tokens.
use super::order::{SortOrder, SortValue};
use crate::store::{StoreError, StoreResult};
use crate::version::ResourceVersion;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Position after the last item of a page, pinned to the version the first
/// page was served at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueToken {
    #[serde(rename = "rv")]
    pub resource_version: ResourceVersion,
    #[serde(rename = "k")]
    pub last_key: Vec<SortValue>,
    #[serde(rename = "o")]
    pub order: String,
}

impl ContinueToken {
    pub fn encode(&self) -> StoreResult<String> {
        let raw = serde_json::to_vec(self).map_err(anyhow::Error::from)?;
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// # Errors
    /// - [`StoreError::Invalid`] when the token is malformed or was issued for
    ///   a different sort order.
    pub fn decode(token: &str, order: &SortOrder) -> StoreResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| StoreError::Invalid("malformed continue token".to_string()))?;
        let decoded: ContinueToken = serde_json::from_slice(&raw)
            .map_err(|_| StoreError::Invalid("malformed continue token".to_string()))?;
        if decoded.order != order.fingerprint() {
            return Err(StoreError::Invalid(
                "continue token was issued for a different orderBy".to_string(),
            ));
        }
        if !order.accepts_key(&decoded.last_key) {
            return Err(StoreError::Invalid(
                "continue token position does not fit its orderBy".to_string(),
            ));
        }
        Ok(decoded)
    }
}

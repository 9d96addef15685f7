use serde::{Deserialize, Serialize};

/// Body of `POST /verifySignature`. Fields are optional so a missing one
/// can be reported by name.
#[derive(Debug, Default, Deserialize)]
pub struct VerifySignatureRequest {
    pub hash: Option<String>,
    pub signature: Option<String>,
    pub key: Option<String>,
}

impl VerifySignatureRequest {
    /// First missing field, in `hash`, `signature`, `key` order.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("hash", &self.hash),
            ("signature", &self.signature),
            ("key", &self.key),
        ]
        .into_iter()
        .find(|(_, value)| value.is_none())
        .map(|(name, _)| name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: message.into(),
        }
    }
}

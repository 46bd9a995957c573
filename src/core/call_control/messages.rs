//! Wire types for the provider calls endpoint.

use serde::{Deserialize, Serialize};

use super::base::CallAction;

pub const MESSAGING_PRODUCT: &str = "whatsapp";

#[derive(Debug, Serialize)]
pub struct CallActionRequest<'a> {
    pub messaging_product: &'static str,
    pub call_id: &'a str,
    pub action: CallAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionBody<'a>>,
}

#[derive(Debug, Serialize)]
pub struct SessionBody<'a> {
    pub sdp_type: &'static str,
    pub sdp: &'a str,
}

impl<'a> SessionBody<'a> {
    pub fn answer(sdp: &'a str) -> Self {
        Self {
            sdp_type: "answer",
            sdp,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CallActionResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<ProviderErrorBody>,
}

/// Graph API error envelope.
#[derive(Debug, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

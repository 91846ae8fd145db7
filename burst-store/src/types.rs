use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row-level message kind. The wire names match the upstream table values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "SMS")]
    Sms,
    #[serde(rename = "AI_RESPONSE")]
    AiResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub contact_id: String,
    #[serde(rename = "message_body")]
    pub body: String,
    #[serde(rename = "message_type")]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactProfile {
    pub contact_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    /// Lead-source tag driving prompt selection ("facebook", "form_entry", ...).
    #[serde(default)]
    pub source_tag: Option<String>,
}

impl ContactProfile {
    pub fn display_name(&self) -> &str {
        if self.first_name.is_empty() {
            "there"
        } else {
            &self.first_name
        }
    }
}

use serde::Deserialize;

/// Inbound message webhook payload, form-encoded with Twilio's field
/// casing. Signature verification happens upstream of this crate.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct InboundSms {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "MessageSid", default)]
    pub message_sid: Option<String>,
}

impl InboundSms {
    /// Trimmed message text as the agent should see it.
    pub fn text(&self) -> &str {
        self.body.trim()
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::states::FlowState;

/// Persistence boundary the core consumes: a phone-keyed get/set of flow
/// state plus the message log. Implementations provide per-row atomicity;
/// serializing concurrent turns for the same phone is the dispatch layer's
/// responsibility.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Get-or-create the identity row for a phone number.
    async fn ensure_contact(&self, phone: &str) -> Result<(), StoreError>;

    async fn flow_state(&self, phone: &str) -> Result<Option<PersistedFlow>, StoreError>;

    /// Upsert. `was_interested` is OR-ed with the stored value: the flag is
    /// sticky and never downgraded by a write.
    async fn put_flow_state(
        &self,
        phone: &str,
        statename: FlowState,
        was_interested: bool,
    ) -> Result<(), StoreError>;

    /// The most recent `limit` messages for a phone, in chronological order.
    async fn recent_messages(
        &self,
        phone: &str,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    async fn append_message(
        &self,
        phone: &str,
        role: &str,
        content: &str,
        direction: MessageDirection,
    ) -> Result<(), StoreError>;

    /// Flows whose state is not `done`; used by the outreach throttle.
    async fn count_active_flows(&self) -> Result<u64, StoreError>;

    async fn record_outreach_run(&self, run: &OutreachRunRecord) -> Result<(), StoreError>;

    /// Delete the message log and flow state for one phone number.
    async fn reset_conversation(&self, phone: &str) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedFlow {
    pub statename: FlowState,
    pub was_interested: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachRunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub requested: u64,
    pub processed: u64,
    pub sent: u64,
    pub skipped: u64,
    pub throttled: u64,
    pub errors: u64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
}

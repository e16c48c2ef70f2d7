use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use winback_core::flows::FlowState;
use winback_core::store::{
    ConversationStore, MessageDirection, OutreachRunRecord, PersistedFlow, StoreError,
    StoredMessage,
};

#[derive(Default)]
struct MemoryState {
    contacts: HashMap<String, ()>,
    flows: HashMap<String, PersistedFlow>,
    messages: HashMap<String, Vec<StoredMessage>>,
    outreach_runs: Vec<OutreachRunRecord>,
}

/// In-memory store mirroring the SQL implementation's semantics, used by
/// tests and offline console runs.
#[derive(Default)]
pub struct MemoryConversationStore {
    state: RwLock<MemoryState>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn outreach_runs(&self) -> Vec<OutreachRunRecord> {
        self.state.read().await.outreach_runs.clone()
    }

    pub async fn all_messages(&self, phone: &str) -> Vec<StoredMessage> {
        self.state.read().await.messages.get(phone).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn ensure_contact(&self, phone: &str) -> Result<(), StoreError> {
        self.state.write().await.contacts.entry(phone.to_owned()).or_insert(());
        Ok(())
    }

    async fn flow_state(&self, phone: &str) -> Result<Option<PersistedFlow>, StoreError> {
        Ok(self.state.read().await.flows.get(phone).cloned())
    }

    async fn put_flow_state(
        &self,
        phone: &str,
        statename: FlowState,
        was_interested: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.contacts.entry(phone.to_owned()).or_insert(());
        let entry = state
            .flows
            .entry(phone.to_owned())
            .or_insert(PersistedFlow { statename, was_interested: false });
        entry.statename = statename;
        entry.was_interested = entry.was_interested || was_interested;
        Ok(())
    }

    async fn recent_messages(
        &self,
        phone: &str,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.state.read().await;
        let messages = state.messages.get(phone).cloned().unwrap_or_default();
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn append_message(
        &self,
        phone: &str,
        role: &str,
        content: &str,
        _direction: MessageDirection,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.contacts.entry(phone.to_owned()).or_insert(());
        state
            .messages
            .entry(phone.to_owned())
            .or_default()
            .push(StoredMessage { role: role.to_owned(), content: content.to_owned() });
        Ok(())
    }

    async fn count_active_flows(&self) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state.flows.values().filter(|flow| flow.statename != FlowState::Done).count() as u64)
    }

    async fn record_outreach_run(&self, run: &OutreachRunRecord) -> Result<(), StoreError> {
        self.state.write().await.outreach_runs.push(run.clone());
        Ok(())
    }

    async fn reset_conversation(&self, phone: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.messages.remove(phone);
        state.flows.remove(phone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use winback_core::flows::FlowState;
    use winback_core::store::{ConversationStore, MessageDirection};

    use crate::MemoryConversationStore;

    #[tokio::test]
    async fn sticky_interest_matches_sql_semantics() {
        let store = MemoryConversationStore::new();
        store.put_flow_state("1", FlowState::Interested, true).await.expect("write");
        store.put_flow_state("1", FlowState::Stop, false).await.expect("write");

        let persisted = store.flow_state("1").await.expect("read").expect("row");
        assert_eq!(persisted.statename, FlowState::Stop);
        assert!(persisted.was_interested);
    }

    #[tokio::test]
    async fn recent_messages_window_is_chronological() {
        let store = MemoryConversationStore::new();
        for index in 0..4 {
            store
                .append_message("1", "user", &format!("m{index}"), MessageDirection::Inbound)
                .await
                .expect("append");
        }

        let window = store.recent_messages("1", 2).await.expect("window");
        let bodies: Vec<&str> = window.iter().map(|message| message.content.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn active_count_excludes_done_flows() {
        let store = MemoryConversationStore::new();
        store.put_flow_state("1", FlowState::Done, true).await.expect("write");
        store.put_flow_state("2", FlowState::Start, false).await.expect("write");
        assert_eq!(store.count_active_flows().await.expect("count"), 1);
    }
}

use std::str::FromStr;

use async_trait::async_trait;

use winback_core::flows::FlowState;
use winback_core::store::{
    ConversationStore, MessageDirection, OutreachRunRecord, PersistedFlow, StoreError,
    StoredMessage,
};

use crate::DbPool;

/// SQLite-backed conversation store. Row-level atomicity comes from the
/// database; this type performs no cross-statement locking.
#[derive(Clone)]
pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn db_err(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

#[async_trait]
impl ConversationStore for SqlConversationStore {
    async fn ensure_contact(&self, phone: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO contact (phone_number) VALUES (?) ON CONFLICT DO NOTHING")
            .bind(phone)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn flow_state(&self, phone: &str) -> Result<Option<PersistedFlow>, StoreError> {
        let row: Option<(String, bool)> = sqlx::query_as(
            "SELECT statename, was_interested FROM flow_state WHERE phone_number = ?",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            None => Ok(None),
            Some((statename, was_interested)) => {
                let statename = FlowState::from_str(&statename)
                    .map_err(|error| StoreError::Decode(error.to_string()))?;
                Ok(Some(PersistedFlow { statename, was_interested }))
            }
        }
    }

    async fn put_flow_state(
        &self,
        phone: &str,
        statename: FlowState,
        was_interested: bool,
    ) -> Result<(), StoreError> {
        self.ensure_contact(phone).await?;
        // MAX keeps the interest flag sticky in a single atomic statement.
        sqlx::query(
            "INSERT INTO flow_state (phone_number, statename, was_interested, updated_at) \
             VALUES (?, ?, ?, datetime('now')) \
             ON CONFLICT (phone_number) DO UPDATE SET \
               statename = excluded.statename, \
               was_interested = MAX(flow_state.was_interested, excluded.was_interested), \
               updated_at = excluded.updated_at",
        )
        .bind(phone)
        .bind(statename.as_str())
        .bind(was_interested)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        phone: &str,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT role, body FROM message WHERE phone_number = ? \
             ORDER BY message_id DESC LIMIT ?",
        )
        .bind(phone)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // Newest-first from the query; callers expect chronological order.
        Ok(rows
            .into_iter()
            .rev()
            .map(|(role, content)| StoredMessage { role, content })
            .collect())
    }

    async fn append_message(
        &self,
        phone: &str,
        role: &str,
        content: &str,
        direction: MessageDirection,
    ) -> Result<(), StoreError> {
        self.ensure_contact(phone).await?;
        sqlx::query(
            "INSERT INTO message (phone_number, direction, role, body, sent_at) \
             VALUES (?, ?, ?, ?, datetime('now'))",
        )
        .bind(phone)
        .bind(direction.as_str())
        .bind(role)
        .bind(content)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn count_active_flows(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM flow_state WHERE statename != 'done'")
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count.max(0) as u64)
    }

    async fn record_outreach_run(&self, run: &OutreachRunRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO outreach_run \
             (started_at, finished_at, requested, processed, sent, skipped, throttled, errors) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|finished| finished.to_rfc3339()))
        .bind(run.requested as i64)
        .bind(run.processed as i64)
        .bind(run.sent as i64)
        .bind(run.skipped as i64)
        .bind(run.throttled as i64)
        .bind(run.errors as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn reset_conversation(&self, phone: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM message WHERE phone_number = ?")
            .bind(phone)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM flow_state WHERE phone_number = ?")
            .bind(phone)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

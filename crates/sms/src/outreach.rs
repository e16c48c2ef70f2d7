use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use winback_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use winback_core::flows::{FlowSnapshot, FlowState};
use winback_core::store::{ConversationStore, MessageDirection, OutreachRunRecord};
use winback_core::templates;

use crate::transport::SmsTransport;

/// One customer row for a proactive first-touch send.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct OutreachTarget {
    pub phone_number: String,
    pub name: Option<String>,
    pub previous_services: Option<String>,
    pub days_since_cancelled: Option<i64>,
    pub last_service: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    Sent,
    Skipped,
    Throttled,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutreachDispatch {
    pub phone_number: Option<String>,
    pub status: OutreachStatus,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutreachSummary {
    pub requested: u64,
    pub processed: u64,
    pub sent: u64,
    pub skipped: u64,
    pub throttled: u64,
    pub errors: u64,
    pub max_active_limit: Option<u64>,
}

/// Coordinates proactive outbound sends with an active-conversation
/// throttle. Row failures never abort the run.
pub struct OutreachCoordinator {
    store: Arc<dyn ConversationStore>,
    transport: Arc<dyn SmsTransport>,
    max_active: Option<u64>,
    audit: Arc<dyn AuditSink>,
}

impl OutreachCoordinator {
    pub fn new(store: Arc<dyn ConversationStore>, transport: Arc<dyn SmsTransport>) -> Self {
        Self { store, transport, max_active: None, audit: Arc::new(TracingAuditSink) }
    }

    pub fn with_max_active(mut self, max_active: Option<u64>) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Send the first outbound message to each target. Conversations in the
    /// `done` state do not count against the throttle limit.
    pub async fn send_bulk(
        &self,
        targets: &[OutreachTarget],
        message_template: Option<&str>,
        max_active_override: Option<u64>,
    ) -> (OutreachSummary, Vec<OutreachDispatch>) {
        let started_at = Utc::now();
        let limit = max_active_override.or(self.max_active);

        let mut summary = OutreachSummary { max_active_limit: limit, ..OutreachSummary::default() };
        let mut dispatches = Vec::with_capacity(targets.len());

        for target in targets {
            summary.requested += 1;

            if let Some(limit) = limit {
                match self.store.count_active_flows().await {
                    Ok(active) if active >= limit => {
                        summary.throttled += 1;
                        dispatches.push(OutreachDispatch {
                            phone_number: Some(target.phone_number.clone()),
                            status: OutreachStatus::Throttled,
                            detail: Some(format!("{active} active conversations")),
                        });
                        continue;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        summary.errors += 1;
                        dispatches.push(OutreachDispatch {
                            phone_number: Some(target.phone_number.clone()),
                            status: OutreachStatus::Error,
                            detail: Some(error.to_string()),
                        });
                        continue;
                    }
                }
            }

            let phone = target.phone_number.trim();
            if phone.is_empty() {
                summary.skipped += 1;
                dispatches.push(OutreachDispatch {
                    phone_number: None,
                    status: OutreachStatus::Skipped,
                    detail: Some("missing phone".to_owned()),
                });
                continue;
            }

            // Persist flow state up front so the throttle counts this
            // conversation from the moment the first message leaves.
            let snapshot = match self.hydrate_flow(phone).await {
                Ok(snapshot) => snapshot,
                Err(detail) => {
                    summary.errors += 1;
                    dispatches.push(OutreachDispatch {
                        phone_number: Some(phone.to_owned()),
                        status: OutreachStatus::Error,
                        detail: Some(detail),
                    });
                    continue;
                }
            };

            let body = resolve_message(target, message_template, &snapshot);

            match self.transport.send(phone, &body).await {
                Ok(delivery_id) => {
                    if let Err(error) = self
                        .store
                        .append_message(phone, "assistant", &body, MessageDirection::Outbound)
                        .await
                    {
                        tracing::warn!(
                            event_name = "outreach.message_log_failed",
                            phone_number = %phone,
                            error = %error,
                            "sent but could not log outbound message"
                        );
                    }
                    summary.sent += 1;
                    dispatches.push(OutreachDispatch {
                        phone_number: Some(phone.to_owned()),
                        status: OutreachStatus::Sent,
                        detail: Some(delivery_id),
                    });
                }
                Err(error) => {
                    summary.errors += 1;
                    dispatches.push(OutreachDispatch {
                        phone_number: Some(phone.to_owned()),
                        status: OutreachStatus::Error,
                        detail: Some(error.to_string()),
                    });
                }
            }
        }

        summary.processed =
            summary.sent + summary.skipped + summary.throttled + summary.errors;

        let record = OutreachRunRecord {
            started_at,
            finished_at: Some(Utc::now()),
            requested: summary.requested,
            processed: summary.processed,
            sent: summary.sent,
            skipped: summary.skipped,
            throttled: summary.throttled,
            errors: summary.errors,
        };
        if let Err(error) = self.store.record_outreach_run(&record).await {
            tracing::warn!(
                event_name = "outreach.run_log_failed",
                error = %error,
                "could not record outreach run"
            );
        }

        self.audit.emit(
            AuditEvent::new(
                None,
                format!("outreach-{}", started_at.timestamp()),
                "outreach.run_finished",
                AuditCategory::Outreach,
                if summary.errors == 0 { AuditOutcome::Success } else { AuditOutcome::Failed },
            )
            .with_metadata("requested", summary.requested.to_string())
            .with_metadata("sent", summary.sent.to_string())
            .with_metadata("throttled", summary.throttled.to_string()),
        );

        (summary, dispatches)
    }

    /// Ensure the contact and flow rows exist, returning the snapshot the
    /// first message should be templated from.
    async fn hydrate_flow(&self, phone: &str) -> Result<FlowSnapshot, String> {
        self.store.ensure_contact(phone).await.map_err(|error| error.to_string())?;

        match self.store.flow_state(phone).await {
            Ok(Some(persisted)) => Ok(FlowSnapshot {
                flow_state: persisted.statename,
                confused_count: 0,
                was_ever_interested: persisted.was_interested,
            }),
            Ok(None) => {
                self.store
                    .put_flow_state(phone, FlowState::Start, false)
                    .await
                    .map_err(|error| error.to_string())?;
                Ok(FlowSnapshot {
                    flow_state: FlowState::Start,
                    confused_count: 0,
                    was_ever_interested: false,
                })
            }
            Err(error) => Err(error.to_string()),
        }
    }
}

/// Template override with `{field}` substitution, falling back to the
/// state-templated reply.
fn resolve_message(
    target: &OutreachTarget,
    template: Option<&str>,
    snapshot: &FlowSnapshot,
) -> String {
    let Some(template) = template else {
        return templates::reply_for_state(snapshot).to_owned();
    };

    template
        .replace("{name}", target.name.as_deref().unwrap_or(""))
        .replace("{previous_services}", target.previous_services.as_deref().unwrap_or(""))
        .replace(
            "{days_since_cancelled}",
            &target.days_since_cancelled.map(|days| days.to_string()).unwrap_or_default(),
        )
        .replace("{last_service}", target.last_service.as_deref().unwrap_or(""))
}

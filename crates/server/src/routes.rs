use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tracing::{error, info, warn};
use uuid::Uuid;

use winback_agent::context::UserContext;
use winback_agent::runtime::{AgentRuntime, OrchestratorError};
use winback_core::errors::ApplicationError;
use winback_core::store::{ConversationStore, MessageDirection};
use winback_core::templates::FALLBACK_REPLY;
use winback_sms::transport::SmsTransport;
use winback_sms::webhook::InboundSms;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub store: Arc<dyn ConversationStore>,
    pub transport: Arc<dyn SmsTransport>,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/sms", post(sms_reply)).with_state(state)
}

/// Inbound message webhook. Replies are delivered out-of-band through the
/// transport; the webhook response body is a plain acknowledgement.
async fn sms_reply(
    State(state): State<AppState>,
    Form(inbound): Form<InboundSms>,
) -> (StatusCode, &'static str) {
    let correlation_id = Uuid::new_v4().to_string();
    let phone = inbound.from.trim().to_owned();
    if phone.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing sender");
    }

    info!(
        event_name = "webhook.sms_received",
        correlation_id = %correlation_id,
        phone_number = %phone,
        "inbound sms"
    );

    match process_inbound(&state, &phone, &inbound).await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(application_error) => {
            let interface = application_error.into_interface(correlation_id.clone());
            error!(
                event_name = "webhook.sms_failed",
                correlation_id = %correlation_id,
                phone_number = %phone,
                error = %interface,
                "inbound sms processing failed"
            );
            (StatusCode::SERVICE_UNAVAILABLE, interface.user_message())
        }
    }
}

async fn process_inbound(
    state: &AppState,
    phone: &str,
    inbound: &InboundSms,
) -> Result<(), ApplicationError> {
    let store = state.store.as_ref();

    store.append_message(phone, "user", inbound.text(), MessageDirection::Inbound).await?;

    let mut user = UserContext::load(phone, store).await?;
    if let Some(sid) = &inbound.message_sid {
        user.set_twilio_sid(sid);
    }
    user.set_twilio_message(inbound.text());

    let reply = match state.runtime.generate_response(inbound.text(), &mut user, store).await {
        Ok(reply) => reply,
        Err(OrchestratorError::Generation(generation_error)) => {
            // The turn must still produce a reply; substitute the fixed
            // fallback and log it like any other outbound message.
            warn!(
                event_name = "webhook.generation_degraded",
                phone_number = %phone,
                error = %generation_error,
                "substituting fallback reply"
            );
            FALLBACK_REPLY.to_owned()
        }
        Err(OrchestratorError::Store(store_error)) => return Err(store_error.into()),
    };

    store.append_message(phone, "assistant", &reply, MessageDirection::Outbound).await?;

    match state.transport.send(phone, &reply).await {
        Ok(delivery_id) => {
            info!(
                event_name = "webhook.reply_sent",
                phone_number = %phone,
                delivery_id = %delivery_id,
                "outbound sms dispatched"
            );
        }
        Err(transport_error) => {
            // Delivery retries are the carrier integration's concern; the
            // webhook must not trigger a provider retry storm.
            warn!(
                event_name = "webhook.reply_send_failed",
                phone_number = %phone,
                error = %transport_error,
                "outbound sms was not dispatched"
            );
        }
    }

    Ok(())
}

//! SMS channel for winback:
//! - **Transport** (`transport`) - outbound delivery through the Twilio
//!   Messages REST API, plus a recording no-op for tests and offline runs
//! - **Webhook** (`webhook`) - the inbound message payload shape
//! - **Outreach** (`outreach`) - bulk first-touch driver with an
//!   active-conversation throttle
//!
//! Carrier-level delivery guarantees and webhook signature verification are
//! collaborator concerns and live outside this crate.

pub mod outreach;
pub mod transport;
pub mod webhook;

pub use outreach::{OutreachCoordinator, OutreachDispatch, OutreachStatus, OutreachSummary, OutreachTarget};
pub use transport::{NoopSmsTransport, SmsTransport, TransportError, TwilioRestClient};
pub use webhook::InboundSms;

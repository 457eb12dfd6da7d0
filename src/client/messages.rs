//! Message delivery and send variables.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::events::{ClientEvent, EventHub};
use crate::protocol::{MessageInput, MessagePayload, Operation, OperationRequest};
use crate::transport::Subscription;

/// Variables of `sendMessage`
#[derive(Serialize)]
pub(crate) struct SendVariables<'a> {
    pub message: &'a MessageInput,
}

/// Turn pushed payloads into `Message` events, in push order, until the
/// stream ends.
pub(crate) async fn run_message_pump(mut subscription: Subscription, events: Arc<EventHub>) {
    let decoder = OperationRequest::new(Operation::MessageReceived);

    while let Some(item) = subscription.next().await {
        match item.and_then(|data| decoder.extract::<MessagePayload>(&data)) {
            Ok(payload) => {
                debug!(
                    thread = %payload.target_thread_id,
                    origin_id = %payload.message.origin_id,
                    "message received"
                );
                events.emit(ClientEvent::Message {
                    target_thread_id: payload.target_thread_id,
                    message: payload.message,
                });
            },
            Err(e) => error!(error = %e, "dropping undeliverable message"),
        }
    }

    warn!("message stream ended, no further messages will be delivered");
}

//! Client events and their fan-out.

use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::protocol::{ConfigurationResponse, Message};

/// Something the client observed
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A message was pushed for a local thread
    Message {
        /// Thread the message belongs to
        target_thread_id: String,
        /// The message
        message: Message,
    },
    /// Configuration values were negotiated
    Config(ConfigurationResponse),
    /// Startup finished
    Ready,
}

/// Ordered, lossless stream of [`ClientEvent`]s for one subscriber
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl EventReceiver {
    /// Wait for the next event. `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventReceiver {
    type Item = ClientEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Delivers every event to every live subscriber
#[derive(Debug, Default)]
pub(crate) struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>,
}

impl EventHub {
    pub(crate) fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        EventReceiver { rx }
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

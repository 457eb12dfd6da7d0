//! The plugin-side client.
//!
//! A [`Client`] owns the transport pair, drives the startup lifecycle and
//! turns coordinator pushes into [`ClientEvent`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use chatplug::{Client, ClientConfig, ClientEvent, ConfigurationField, ConfigurationRequest};
//!
//! let client = Client::new(ClientConfig::from_env()?)?;
//! let mut events = client.events();
//!
//! let schema = ConfigurationRequest::new(vec![ConfigurationField::string("token").masked()]);
//! client.connect(Some(schema)).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Message { target_thread_id, message } = event {
//!         println!("{target_thread_id}: {}", message.body);
//!     }
//! }
//! ```

mod events;
mod messages;
mod search;

pub use events::{ClientEvent, EventReceiver};
pub use search::SearchResolver;

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ChatPlugError, Result};
use crate::protocol::{
    ConfigurationRequest, ConfigurationResponse, Lifecycle, LifecycleState, Message,
    MessageInput, Operation, OperationRequest,
};
use crate::store::{ConfigStore, FileConfigStore};
use crate::transport::TransportPair;

use events::EventHub;
use messages::{run_message_pump, SendVariables};
use search::run_search_listener;

/// Startup state guarded for the whole of `connect`
struct Startup {
    lifecycle: Lifecycle,
    resolver: Option<Arc<dyn SearchResolver>>,
}

struct Inner {
    config: ClientConfig,
    transport: TransportPair,
    store: Arc<dyn ConfigStore>,
    events: Arc<EventHub>,
    startup: Mutex<Startup>,
    state: watch::Sender<LifecycleState>,
    negotiated: watch::Sender<Option<ConfigurationResponse>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn abort_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let count = tasks.len();
        for task in tasks.drain(..) {
            task.abort();
        }
        count
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Handle to one plugin instance's link with the coordinator.
///
/// Cheap to clone; clones share the same connection. Stream tasks stop when
/// [`Client::shutdown`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

/// `setInstanceStatus` result
#[derive(Deserialize)]
struct InstanceAck {
    id: String,
}

/// Variables of `configurationReceived`
#[derive(Serialize)]
struct ConfigVariables<'a> {
    config: &'a ConfigurationRequest,
}

impl Client {
    /// Build a client speaking GraphQL over HTTP and graphql-ws, caching
    /// configuration under `config.cache_dir`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = TransportPair::connect(&config)?;
        let store = Arc::new(FileConfigStore::new(config.cache_dir.clone()));
        Self::with_parts(config, transport, store)
    }

    /// Build a client over arbitrary channels and store
    pub fn with_parts(
        config: ClientConfig,
        transport: TransportPair,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        config.validate()?;
        let (requests, events) = transport.names();
        debug!(instance = %config.instance_id, requests, events, "client created");

        let (state, _) = watch::channel(LifecycleState::Created);
        let (negotiated, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                store,
                events: Arc::new(EventHub::default()),
                startup: Mutex::new(Startup {
                    lifecycle: Lifecycle::new(),
                    resolver: None,
                }),
                state,
                negotiated,
                tasks: StdMutex::new(Vec::new()),
            }),
        })
    }

    /// Instance this client speaks for
    pub fn instance_id(&self) -> &str {
        &self.inner.config.instance_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Subscribe to client events.
    ///
    /// Only events emitted after this call are delivered, so subscribe
    /// before [`Client::connect`] to observe startup.
    pub fn events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Run startup: announce, open event streams, optionally negotiate
    /// configuration, then emit [`ClientEvent::Ready`].
    ///
    /// If the announcement fails the client stays `Created` and nothing is
    /// emitted.
    pub async fn connect(&self, schema: Option<ConfigurationRequest>) -> Result<()> {
        let mut startup = self.inner.startup.lock().await;
        if startup.lifecycle.state() != LifecycleState::Created {
            return Err(ChatPlugError::Protocol(format!(
                "already connected (state: {})",
                startup.lifecycle.state()
            )));
        }
        info!(instance = %self.inner.config.instance_id, "connecting to coordinator");

        self.announce().await?;
        self.advance(&mut startup.lifecycle, Lifecycle::announced)?;

        let messages = self
            .inner
            .transport
            .subscribe(OperationRequest::new(Operation::MessageReceived))
            .await?;
        self.spawn(run_message_pump(messages, Arc::clone(&self.inner.events)));
        if let Some(resolver) = startup.resolver.clone() {
            self.open_search(resolver).await?;
        }
        self.advance(&mut startup.lifecycle, Lifecycle::subscribed)?;

        if let Some(schema) = schema {
            self.advance(&mut startup.lifecycle, Lifecycle::configuring)?;
            self.request_config(schema).await?;
        }

        self.advance(&mut startup.lifecycle, Lifecycle::ready)?;
        self.inner.events.emit(ClientEvent::Ready);
        info!(
            instance = %self.inner.config.instance_id,
            elapsed_ms = startup
                .lifecycle
                .startup_duration()
                .map_or(0, |d| d.as_millis() as u64),
            "client ready"
        );
        Ok(())
    }

    /// Post a message and return the coordinator's stored copy.
    ///
    /// Attempted once; failures are returned as-is.
    pub async fn send(&self, input: &MessageInput) -> Result<Message> {
        let request = OperationRequest::with_variables(
            Operation::SendMessage,
            &SendVariables { message: input },
        )?;
        let data = self.inner.transport.request(&request).await?;
        let message: Message = request.extract(&data)?;
        debug!(
            origin_id = %message.origin_id,
            thread = %message.thread.id,
            attachments = message.attachments.len(),
            "message sent"
        );
        Ok(message)
    }

    /// Negotiate configuration against `schema`.
    ///
    /// Waits for the first pushed value, then unsubscribes. The value is
    /// cached, published to [`Client::get_config`] waiters and emitted as
    /// [`ClientEvent::Config`].
    pub async fn request_config(
        &self,
        schema: ConfigurationRequest,
    ) -> Result<ConfigurationResponse> {
        let request = OperationRequest::with_variables(
            Operation::ConfigurationReceived,
            &ConfigVariables { config: &schema },
        )?;
        debug!(fields = schema.fields.len(), "requesting configuration");

        let mut subscription = self.inner.transport.subscribe(request.clone()).await?;
        let first = match self.inner.config.negotiation_timeout() {
            Some(limit) => tokio::time::timeout(limit, subscription.next())
                .await
                .map_err(|_| {
                    ChatPlugError::Timeout(format!("no configuration received within {limit:?}"))
                })?,
            None => subscription.next().await,
        };
        drop(subscription);

        let data = first.ok_or_else(|| {
            ChatPlugError::StreamClosed(
                "configuration stream ended before a value arrived".to_string(),
            )
        })??;
        let response: ConfigurationResponse = request.extract(&data)?;

        let missing = response.missing_required(&schema);
        if !missing.is_empty() {
            warn!(?missing, "required configuration fields left unanswered");
        }

        if let Err(e) = self
            .inner
            .store
            .save(&self.inner.config.instance_id, &response)
            .await
        {
            error!(error = %e, "failed to cache configuration");
        }

        self.inner.negotiated.send_replace(Some(response.clone()));
        self.inner.events.emit(ClientEvent::Config(response.clone()));
        info!(fields = ?response.field_names(), "configuration received");
        Ok(response)
    }

    /// Current configuration.
    ///
    /// Returns the cached value if one exists, otherwise waits for the
    /// first negotiation to finish.
    pub async fn get_config(&self) -> Result<ConfigurationResponse> {
        match self.inner.store.load(&self.inner.config.instance_id).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {},
            Err(e) => warn!(error = %e, "ignoring unreadable configuration cache"),
        }

        let mut negotiated = self.inner.negotiated.subscribe();
        let value = negotiated
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ChatPlugError::StreamClosed("client shut down".to_string()))?;
        (*value)
            .clone()
            .ok_or_else(|| ChatPlugError::Protocol("configuration vanished".to_string()))
    }

    /// Register the search resolver.
    ///
    /// Before `connect` the search stream is opened during startup, after
    /// it the stream opens right away. Only one resolver per client.
    pub async fn handle_search(&self, resolver: impl SearchResolver) -> Result<()> {
        let resolver: Arc<dyn SearchResolver> = Arc::new(resolver);
        let mut startup = self.inner.startup.lock().await;
        if startup.resolver.is_some() {
            return Err(ChatPlugError::Protocol(
                "a search resolver is already registered".to_string(),
            ));
        }
        if startup.lifecycle.state().is_subscribed() {
            self.open_search(Arc::clone(&resolver)).await?;
        }
        startup.resolver = Some(resolver);
        Ok(())
    }

    /// Stop all stream tasks. Their subscriptions are dropped, which
    /// unsubscribes them, and search answers still in flight are abandoned.
    pub fn shutdown(&self) {
        let stopped = self.inner.abort_tasks();
        info!(instance = %self.inner.config.instance_id, tasks = stopped, "client shut down");
    }

    async fn announce(&self) -> Result<()> {
        let request = OperationRequest::new(Operation::SetInstanceStatus);
        let data = self.inner.transport.request(&request).await.map_err(|e| {
            error!(error = %e, "instance announcement failed");
            e
        })?;
        let ack: InstanceAck = request.extract(&data)?;
        info!(instance = %ack.id, "instance announced");
        Ok(())
    }

    async fn open_search(&self, resolver: Arc<dyn SearchResolver>) -> Result<()> {
        let subscription = self
            .inner
            .transport
            .subscribe(OperationRequest::new(Operation::SubscribeToSearchRequests))
            .await?;
        self.spawn(run_search_listener(
            subscription,
            resolver,
            self.inner.transport.clone(),
        ));
        debug!("search listener started");
        Ok(())
    }

    fn advance(
        &self,
        lifecycle: &mut Lifecycle,
        step: fn(&mut Lifecycle) -> Result<()>,
    ) -> Result<()> {
        step(lifecycle)?;
        self.inner.state.send_replace(lifecycle.state());
        debug!(state = %lifecycle.state(), "lifecycle advanced");
        Ok(())
    }

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(task);
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("instance_id", &self.inner.config.instance_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

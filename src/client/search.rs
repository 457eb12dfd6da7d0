//! Search correlation.
//!
//! Each pushed [`SearchRequest`] is answered in its own task, so a slow or
//! failing resolver never holds up other queries. Answers are matched to
//! queries only by echoing the query text: two identical queries in flight
//! at once cannot be told apart.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::error::{ChatPlugError, Result};
use crate::protocol::{
    Operation, OperationRequest, SearchRequest, SearchResponse, ThreadSearchResult,
};
use crate::transport::{BoxFuture, Subscription, TransportPair};

/// Answers thread-search queries.
///
/// Implemented for any `Fn(SearchRequest) -> impl Future<Output = Result<Vec<ThreadSearchResult>>>`.
pub trait SearchResolver: Send + Sync + 'static {
    /// Find threads matching the request.
    fn resolve(&self, request: SearchRequest) -> BoxFuture<'static, Result<Vec<ThreadSearchResult>>>;
}

impl<F, Fut> SearchResolver for F
where
    F: Fn(SearchRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<ThreadSearchResult>>> + Send + 'static,
{
    fn resolve(&self, request: SearchRequest) -> BoxFuture<'static, Result<Vec<ThreadSearchResult>>> {
        Box::pin(self(request))
    }
}

/// Consume the search-request stream until it ends.
///
/// Answers in flight are owned by the listener: aborting it aborts them, so
/// nothing is posted after the client shuts down.
pub(crate) async fn run_search_listener(
    mut subscription: Subscription,
    resolver: Arc<dyn SearchResolver>,
    transport: TransportPair,
) {
    let decoder = OperationRequest::new(Operation::SubscribeToSearchRequests);
    let mut answers = JoinSet::new();

    loop {
        tokio::select! {
            item = subscription.next() => {
                let Some(item) = item else { break };
                match item.and_then(|data| decoder.extract::<SearchRequest>(&data)) {
                    Ok(request) => {
                        answers.spawn(answer(request, resolver.clone(), transport.clone()));
                    },
                    Err(e) => error!(error = %e, "unusable search request"),
                }
            },
            Some(_) = answers.join_next(), if !answers.is_empty() => {},
        }
    }

    warn!("search request stream ended");
    while answers.join_next().await.is_some() {}
}

/// Run the resolver in its own task so a panic is contained.
///
/// Failures and panics both come back as [`ChatPlugError::Resolver`].
async fn resolve_contained(
    resolver: &dyn SearchResolver,
    request: SearchRequest,
) -> Result<Vec<ThreadSearchResult>> {
    let task = tokio::spawn(resolver.resolve(request));
    let abort = task.abort_handle();
    let _guard = AbortOnDrop(abort);

    match task.await {
        Ok(Ok(threads)) => Ok(threads),
        Ok(Err(ChatPlugError::Resolver(message))) => Err(ChatPlugError::Resolver(message)),
        Ok(Err(e)) => Err(ChatPlugError::Resolver(e.to_string())),
        Err(e) if e.is_panic() => Err(ChatPlugError::Resolver("resolver panicked".to_string())),
        Err(e) => Err(ChatPlugError::Resolver(e.to_string())),
    }
}

/// Aborts the resolver task when its answer is abandoned.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Resolve one query and post the result.
async fn answer(request: SearchRequest, resolver: Arc<dyn SearchResolver>, transport: TransportPair) {
    let query = request.query.clone();
    debug!(%query, "search request");

    let threads = match resolve_contained(resolver.as_ref(), request).await {
        Ok(threads) => threads,
        Err(e) => {
            warn!(%query, error = %e, "no search response sent");
            return;
        },
    };

    let count = threads.len();
    let response = SearchResponse {
        for_query: query.clone(),
        threads,
    };
    let result = match OperationRequest::with_variables(Operation::SetSearchResponse, &response) {
        Ok(request) => transport.request(&request).await.map(|_| ()),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => debug!(%query, results = count, "search response posted"),
        Err(e) => warn!(%query, error = %e, "failed to post search response"),
    }
}

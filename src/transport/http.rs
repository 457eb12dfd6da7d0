//! GraphQL-over-HTTP request channel.
//!
//! Every call is a single `POST {query, variables, operationName}` carrying
//! the access credential in the `Authorization` header.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Url};
use serde_json::Value;

use super::{BoxFuture, GraphQlResponse, RequestChannel};
use crate::config::ClientConfig;
use crate::error::{ChatPlugError, Result};
use crate::protocol::OperationRequest;

/// Longest response body excerpt quoted in error messages
const MAX_ERROR_BODY: usize = 200;

/// Request channel backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: Client,
    endpoint: Url,
}

impl HttpChannel {
    /// Build the channel from the client configuration
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.http_endpoint).map_err(|e| {
            ChatPlugError::Startup(format!("HTTP endpoint {:?} is invalid: {e}", config.http_endpoint))
        })?;

        let mut auth = HeaderValue::from_str(&config.access_token).map_err(|_| {
            ChatPlugError::Startup("access token is not a valid header value".to_string())
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.transport.request_timeout())
            .build()
            .map_err(|e| ChatPlugError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    /// Target endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl RequestChannel for HttpChannel {
    fn execute<'a>(&'a self, request: &'a OperationRequest) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let operation = request.operation;
            tracing::debug!(%operation, endpoint = %self.endpoint, "graphql request");

            let response = self
                .client
                .post(self.endpoint.clone())
                .json(&request.body())
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if !status.is_success() {
                let detail = serde_json::from_str::<GraphQlResponse>(&text)
                    .ok()
                    .and_then(|r| r.error_summary())
                    .unwrap_or_else(|| excerpt(&text));
                return Err(ChatPlugError::Transport(format!(
                    "{operation} failed with HTTP {status}: {detail}"
                )));
            }

            let body: GraphQlResponse = serde_json::from_str(&text).map_err(|e| {
                ChatPlugError::Transport(format!("{operation} returned a non-GraphQL body: {e}"))
            })?;
            body.into_data(operation)
        })
    }

    fn name(&self) -> &'static str {
        "GraphQL/HTTP"
    }
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(MAX_ERROR_BODY).collect();
    if text.chars().count() > MAX_ERROR_BODY {
        out.push('…');
    }
    out
}

//! Thread search request/response model.

use serde::{Deserialize, Serialize};

/// Search query pushed by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text, echoed back to correlate the response
    pub query: String,
}

/// One matching thread on the instance's network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSearchResult {
    /// Display name
    pub name: String,
    /// Icon URL
    pub icon_url: String,
    /// Thread ID on the network
    pub origin_id: String,
}

impl ThreadSearchResult {
    /// Create a search result
    pub fn new(
        name: impl Into<String>,
        icon_url: impl Into<String>,
        origin_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            icon_url: icon_url.into(),
            origin_id: origin_id.into(),
        }
    }
}

/// Response posted back for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// The query being answered
    pub for_query: String,
    /// Matching threads
    pub threads: Vec<ThreadSearchResult>,
}

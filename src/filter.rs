use serde::Serialize;
use serde_json::Value;

use crate::SEARCH_TIMELINE_PREFIX;

/// One intercepted search timeline exchange.
/// `parsed_payload` is `None` when the body wasn't valid JSON, `decode_error` then says why.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub url: String,
    pub status: u16,
    pub raw_body: String,
    pub parsed_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
}

impl ResponseRecord {
    pub fn is_decoded(&self) -> bool {
        self.parsed_payload.is_some()
    }
}

/// Decides which network responses belong to the search timeline endpoint.
#[derive(Debug, Clone)]
pub struct ResponseFilter {
    prefix: String,
}

impl Default for ResponseFilter {
    fn default() -> Self {
        Self::new(SEARCH_TIMELINE_PREFIX)
    }
}

impl ResponseFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Exact prefix match, nothing else about the response is looked at.
    #[inline]
    pub fn matches(&self, url: &str) -> bool {
        url.starts_with(&self.prefix)
    }

    /// Returns a `ResponseRecord` for a matching response, `None` for anything else.
    /// A body that fails to parse still produces a record, just without a payload.
    pub fn accept(&self, url: &str, status: u16, body: String) -> Option<ResponseRecord> {
        if !self.matches(url) {
            return None;
        }

        let (parsed_payload, decode_error) = match serde_json::from_str::<Value>(&body) {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Some(ResponseRecord {
            url: url.to_string(),
            status,
            raw_body: body,
            parsed_payload,
            decode_error,
        })
    }
}

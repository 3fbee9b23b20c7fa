//! DNS activity event decoding.

use serde::Deserialize;

use crate::error::SentinelError;

/// Which stream an event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// A query observed by the resolver.
    Query,
    /// A response returned to a client.
    Response,
}

/// One DNS activity record as emitted by the resolver log pipeline.
///
/// Field names match the upstream producer's JSON keys. Missing fields
/// decode to their zero values; only payloads that are not valid JSON (or
/// carry wrongly typed fields) are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsEvent {
    /// Event time, seconds since the Unix epoch.
    #[serde(rename = "Timestamp", default)]
    pub timestamp: i64,

    /// Client address the query came from.
    #[serde(rename = "RemoteAddress", default)]
    pub remote_address: String,

    /// Queried name.
    #[serde(rename = "QueryName", default)]
    pub query_name: String,

    /// DNS response code.
    #[serde(rename = "ResponseCode", default)]
    pub response_code: i32,

    /// Time taken to answer, in seconds.
    #[serde(rename = "ResponseTime", default)]
    pub response_time: f64,

    /// Number of answer records.
    #[serde(rename = "AnswerCount", default)]
    pub answer_count: i32,

    /// Answer record values.
    #[serde(rename = "Answer", default)]
    pub answers: Vec<String>,
}

impl DnsEvent {
    /// Decode an event from its JSON payload.
    pub fn decode(payload: &[u8]) -> Result<Self, SentinelError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Whether the answer set contains `address` (exact match, order
    /// independent).
    pub fn has_answer(&self, address: &str) -> bool {
        self.answers.iter().any(|a| a == address)
    }
}

//! Record sources feeding the monitor.
//!
//! The activity stream arrives as newline-delimited JSON envelopes, each
//! carrying the topic it was published on and the raw event payload:
//!
//! ```json
//! {"topic": "DNS_LOG_QUERY", "payload": {"Timestamp": 1700000000, ...}}
//! ```
//!
//! Sources only frame records; decoding the payload is the dispatcher's
//! concern, so a payload the source cannot interpret still reaches it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::value::RawValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::config::SourceConfig;
use crate::error::SentinelError;

/// A single record drawn from the activity stream.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    /// Topic the record was published on.
    pub topic: String,
    /// Raw event payload, handed to the dispatcher untouched.
    pub payload: Vec<u8>,
}

/// Pull-based record stream.
#[async_trait]
pub trait RecordSource: Send {
    /// The next record, or `None` once the stream is exhausted.
    async fn next(&mut self) -> Result<Option<SourceRecord>, SentinelError>;
}

#[derive(Deserialize)]
struct Envelope<'a> {
    topic: String,
    #[serde(borrow)]
    payload: &'a RawValue,
}

/// Reads envelopes from any buffered byte stream, one per line.
pub struct JsonLinesSource<R> {
    reader: R,
    line: String,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

#[async_trait]
impl<R> RecordSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next(&mut self) -> Result<Option<SourceRecord>, SentinelError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Envelope>(trimmed) {
                Ok(envelope) => {
                    return Ok(Some(SourceRecord {
                        topic: envelope.topic,
                        payload: envelope.payload.get().as_bytes().to_vec(),
                    }));
                }
                Err(error) => {
                    warn!(%error, "skipping malformed stream record");
                }
            }
        }
    }
}

/// Build the record source named by the configuration.
pub async fn from_config(config: &SourceConfig) -> Result<Box<dyn RecordSource>, SentinelError> {
    match config {
        SourceConfig::Stdin => Ok(Box::new(JsonLinesSource::new(BufReader::new(
            tokio::io::stdin(),
        )))),
        SourceConfig::File { path } => {
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::new(JsonLinesSource::new(BufReader::new(file))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &str) -> Vec<SourceRecord> {
        let mut source = JsonLinesSource::new(input.as_bytes());
        let mut records = Vec::new();
        while let Some(record) = source.next().await.unwrap() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_reads_envelopes_in_order() {
        let input = concat!(
            r#"{"topic": "DNS_LOG_QUERY", "payload": {"QueryName": "a."}}"#,
            "\n",
            r#"{"topic": "DNS_LOG", "payload": {"QueryName": "b."}}"#,
            "\n",
        );

        let records = collect(input).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].topic, "DNS_LOG_QUERY");
        assert_eq!(records[1].topic, "DNS_LOG");
        assert_eq!(records[0].payload, br#"{"QueryName": "a."}"#);
    }

    #[tokio::test]
    async fn test_skips_blank_and_malformed_lines() {
        let input = concat!(
            "\n",
            "not json\n",
            r#"{"topic": "DNS_LOG", "payload": {}}"#,
            "\n",
        );

        let records = collect(input).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "DNS_LOG");
    }

    #[tokio::test]
    async fn test_payload_passed_through_raw() {
        // The payload is not validated here; a payload the dispatcher will
        // reject still comes through intact.
        let input = "{\"topic\": \"DNS_LOG\", \"payload\": [1, 2]}\n";

        let records = collect(input).await;
        assert_eq!(records[0].payload, b"[1, 2]");
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let mut source = JsonLinesSource::new(&b""[..]);
        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_source_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.ndjson");
        std::fs::write(
            &path,
            r#"{"topic": "DNS_LOG_QUERY", "payload": {"QueryName": "x."}}"#,
        )
        .unwrap();

        let mut source = from_config(&SourceConfig::File { path }).await.unwrap();
        let record = source.next().await.unwrap().unwrap();
        assert_eq!(record.topic, "DNS_LOG_QUERY");
        assert!(source.next().await.unwrap().is_none());
    }
}

//! Stats stream wire format
//!
//! A node's `/api/statsStream` endpoint writes a sequence of concatenated
//! JSON objects, roughly one per second, over a single chunked response:
//!
//! ```text
//! {"stats": {"<name>": <number>, ...}, "rebalance": <bool>}
//! ```
//!
//! Both keys are optional. Chunk boundaries have no relation to record
//! boundaries, so [`RecordDecoder`] buffers bytes until a whole object is
//! available.

use std::collections::BTreeMap;
use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{StreamError, StreamResult};

/// One record of a node's stats stream
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatsRecord {
    /// Numeric stats; non-numeric entries are ignored
    #[serde(default, deserialize_with = "numeric_stats")]
    pub stats: BTreeMap<String, f64>,

    /// Set while the cluster is rebalancing
    #[serde(default)]
    pub rebalance: bool,
}

fn numeric_stats<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| value.as_f64().map(|number| (name, number)))
        .collect())
}

/// Incremental decoder of concatenated JSON records over a byte stream
pub struct RecordDecoder<S> {
    stream: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S, E> RecordDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Wait for the next complete record.
    ///
    /// Returns [`StreamError::Eof`] once the server closes the stream and
    /// nothing but whitespace is left.
    pub async fn next_record(&mut self) -> StreamResult<StatsRecord> {
        loop {
            if let Some(record) = self.try_decode()? {
                return Ok(record);
            }

            if self.finished {
                return if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    Err(StreamError::Eof)
                } else {
                    Err(StreamError::Malformed {
                        reason: "stream ended inside a record".to_string(),
                    })
                };
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    return Err(StreamError::Transport { reason: err.to_string() });
                }
                None => self.finished = true,
            }
        }
    }

    fn try_decode(&mut self) -> StreamResult<Option<StatsRecord>> {
        let decoded = {
            let mut records = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<StatsRecord>();
            match records.next() {
                Some(Ok(record)) => Decoded::Record(record, records.byte_offset()),
                Some(Err(err)) if err.is_eof() => Decoded::Incomplete,
                Some(Err(err)) => Decoded::Invalid(err),
                None => Decoded::Blank,
            }
        };

        match decoded {
            Decoded::Record(record, consumed) => {
                self.buffer.drain(..consumed);
                Ok(Some(record))
            }
            Decoded::Incomplete => Ok(None),
            Decoded::Blank => {
                self.buffer.clear();
                Ok(None)
            }
            Decoded::Invalid(err) => {
                self.buffer.clear();
                Err(StreamError::Malformed { reason: err.to_string() })
            }
        }
    }
}

enum Decoded {
    Record(StatsRecord, usize),
    Incomplete,
    Blank,
    Invalid(serde_json::Error),
}

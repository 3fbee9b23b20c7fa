//! Counter persistence backends.
//!
//! [`CounterStore`] is the contract the mirror syncs through: scalar and
//! hash-field reads plus conditional writes that only land while the stored
//! value still equals what the caller last read. [`MemoryStore`] backs tests
//! and embedded use; [`RedisStore`] is the production backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::StoreError;

/// Conditional read/write access to persisted counters.
///
/// `expected` carries the value the caller last observed, `None` meaning
/// absent. A conditional write returns `false`, changing nothing, when the
/// stored value no longer matches. Counters only grow, so value equality is
/// equivalent to "unchanged since the read".
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a scalar counter.
    async fn get(&self, key: &str) -> Result<Option<f64>, StoreError>;

    /// Write a scalar counter if it still holds `expected`.
    async fn put_if(
        &self,
        key: &str,
        expected: Option<f64>,
        value: f64,
    ) -> Result<bool, StoreError>;

    /// Read one field of a hash counter.
    async fn field_get(&self, key: &str, field: &str) -> Result<Option<f64>, StoreError>;

    /// Write one field of a hash counter if it still holds `expected`.
    async fn field_put_if(
        &self,
        key: &str,
        field: &str,
        expected: Option<f64>,
        value: f64,
    ) -> Result<bool, StoreError>;

    /// Enumerate every `(field, value)` pair of a hash counter.
    async fn fields(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError>;
}

/// Decimal encoding used for stored values.
fn format_value(value: f64) -> String {
    format!("{value:.6}")
}

/// Lenient float parse for stored values.
fn parse_value(key: &str, raw: &str) -> Result<f64, StoreError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| StoreError::Malformed {
            key: key.to_string(),
            value: raw.to_string(),
        })
}

/// Encode an expected value for the CAS scripts; absent is the empty string.
fn encode_expected(expected: Option<f64>) -> String {
    expected.map(format_value).unwrap_or_default()
}

// --- In-memory backend ---

#[derive(Default)]
struct MemoryInner {
    scalars: HashMap<String, f64>,
    hashes: HashMap<String, HashMap<String, f64>>,
}

/// In-process store used by tests and embedded deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.inner.lock().scalars.get(key).copied())
    }

    async fn put_if(
        &self,
        key: &str,
        expected: Option<f64>,
        value: f64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.scalars.get(key).copied() != expected {
            return Ok(false);
        }
        inner.scalars.insert(key.to_string(), value);
        Ok(true)
    }

    async fn field_get(&self, key: &str, field: &str) -> Result<Option<f64>, StoreError> {
        Ok(self
            .inner
            .lock()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .copied())
    }

    async fn field_put_if(
        &self,
        key: &str,
        field: &str,
        expected: Option<f64>,
        value: f64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        if hash.get(field).copied() != expected {
            return Ok(false);
        }
        hash.insert(field.to_string(), value);
        Ok(true)
    }

    async fn fields(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        Ok(self
            .inner
            .lock()
            .hashes
            .get(key)
            .map(|hash| {
                hash.iter()
                    .map(|(field, value)| (field.clone(), *value))
                    .collect()
            })
            .unwrap_or_default())
    }
}

// --- Redis backend ---

/// Compare-and-set for a scalar key. ARGV[1] is the expected value ("" for
/// absent), ARGV[2] the new value.
const SCALAR_CAS: &str = r"
local cur = redis.call('GET', KEYS[1])
local expected = ARGV[1]
if (cur == false and expected == '') or
   (cur ~= false and expected ~= '' and tonumber(cur) == tonumber(expected)) then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
";

/// Compare-and-set for a hash field. ARGV[1] is the field, ARGV[2] the
/// expected value ("" for absent), ARGV[3] the new value.
const FIELD_CAS: &str = r"
local cur = redis.call('HGET', KEYS[1], ARGV[1])
local expected = ARGV[2]
if (cur == false and expected == '') or
   (cur ~= false and expected ~= '' and tonumber(cur) == tonumber(expected)) then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
  return 1
end
return 0
";

/// Redis-backed counter store.
///
/// Conditional writes run as server-side scripts so they stay atomic on a
/// multiplexed connection, where per-caller `WATCH` state cannot be
/// isolated. Values compare numerically, making the check robust against
/// encoding differences between writers.
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
    scalar_cas: redis::Script,
    field_cas: redis::Script,
}

impl RedisStore {
    /// Connect to the store.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            scalar_cas: redis::Script::new(SCALAR_CAS),
            field_cas: redis::Script::new(FIELD_CAS),
        })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<f64>, StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|value| parse_value(key, &value)).transpose()
    }

    async fn put_if(
        &self,
        key: &str,
        expected: Option<f64>,
        value: f64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let applied: i32 = self
            .scalar_cas
            .key(key)
            .arg(encode_expected(expected))
            .arg(format_value(value))
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn field_get(&self, key: &str, field: &str) -> Result<Option<f64>, StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(key, field).await?;
        raw.map(|value| parse_value(key, &value)).transpose()
    }

    async fn field_put_if(
        &self,
        key: &str,
        field: &str,
        expected: Option<f64>,
        value: f64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let applied: i32 = self
            .field_cas
            .key(key)
            .arg(field)
            .arg(encode_expected(expected))
            .arg(format_value(value))
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn fields(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let raw: Vec<(String, String)> = conn.hgetall(key).await?;
        raw.into_iter()
            .map(|(field, value)| Ok((field, parse_value(key, &value)?)))
            .collect()
    }
}

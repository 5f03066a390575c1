//! Durable Event Log contract (spec §4.3, §6) and its Redis Streams
//! implementation: append with approximate length bound, read-by-consumer-
//! group with blocking timeout, explicit acknowledgment, and pending-message
//! inspection (so a crashed consumer's unacked entries can be recovered,
//! even though recovery itself is out of scope to implement per spec §4.3).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{Error, Result};

/// One entry read back from the log: its log-assigned ID and the raw field
/// map it was appended with (spec models a single `event` field, but the DLQ
/// stream carries several).
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Contract the durable event log must satisfy (spec §4.3).
#[async_trait]
pub trait DurableEventLog: Send + Sync {
    /// Appends `fields` to the stream, trimming approximately to
    /// `max_length` entries.
    async fn append(&self, fields: &[(&str, &str)], max_length: u64) -> Result<String>;

    /// Idempotently creates `group` at offset `0`. "Group already exists" is
    /// treated as success (spec §4.5.4).
    async fn ensure_group(&self, group: &str) -> Result<()>;

    /// Blocking read of up to one pending message for `consumer` in `group`,
    /// honoring `block_timeout`. Returns `None` on timeout.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        block_timeout: Duration,
    ) -> Result<Option<LogEntry>>;

    /// Acknowledges `id` in `group`, removing it from the pending set.
    async fn ack(&self, group: &str, id: &str) -> Result<()>;

    /// Lists entries still pending (unacknowledged) for `group`, for crash
    /// recovery inspection.
    async fn pending(&self, group: &str, count: usize) -> Result<Vec<String>>;

    /// Approximate number of entries currently in the stream, for the
    /// worker pool's stream-length gauge (spec §4.5).
    async fn len(&self) -> Result<u64>;
}

/// Redis Streams backing for [`DurableEventLog`].
#[derive(Clone)]
pub struct RedisEventLog {
    conn: ConnectionManager,
    stream_key: String,
}

impl RedisEventLog {
    pub fn new(conn: ConnectionManager, stream_key: impl Into<String>) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
        }
    }
}

#[async_trait]
impl DurableEventLog for RedisEventLog {
    async fn append(&self, fields: &[(&str, &str)], max_length: u64) -> Result<String> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_length)
            .arg("*");
        for (k, v) in fields {
            cmd.arg(k).arg(v);
        }
        let id: String = cmd.query_async(&mut conn).await.map_err(Error::from)?;
        Ok(id)
    }

    async fn ensure_group(&self, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream_key, group, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        block_timeout: Duration,
    ) -> Result<Option<LogEntry>> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .group(group, consumer)
            .count(1)
            .block(block_timeout.as_millis() as usize);
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(Error::from)?;

        for stream_key in reply.keys {
            for id in stream_key.ids {
                let fields = id
                    .map
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        redis::Value::BulkString(bytes) => {
                            Some((k, String::from_utf8_lossy(&bytes).into_owned()))
                        }
                        redis::Value::SimpleString(s) => Some((k, s)),
                        _ => None,
                    })
                    .collect();
                return Ok(Some(LogEntry {
                    id: id.id,
                    fields,
                }));
            }
        }
        Ok(None)
    }

    async fn ack(&self, group: &str, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream_key, group, &[id])
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn pending(&self, group: &str, count: usize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingCountReply = conn
            .xpending_count(&self.stream_key, group, "-", "+", count)
            .await
            .map_err(Error::from)?;
        Ok(reply.ids.into_iter().map(|p| p.id).collect())
    }

    async fn len(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(&self.stream_key).await.map_err(Error::from)?;
        Ok(len)
    }
}

//! Store client (spec §2): read access to the event-sourced key-value store
//! this engine projects, plus the append-only change stream it tails.
//!
//! Grounded in the teacher's [`RedisCache`](../../examples/Lowband21-ferrex/ferrex-core/src/database/cache.rs)
//! wrapper over `redis::aio::ConnectionManager` — same reconnect-transparent
//! connection handle, same `get`/`set`-shaped surface — generalized here to
//! also read the `meta:events` stream the bootstrap and live-tail phases
//! consume (spec §2.1, §2.2).
//!
//! Properties live as individual string keys (`file:<fileId>/<property>`),
//! not as a hash per file: the event stream carries only `{type, key, ts}`,
//! never the value, so a consumer that decides an update is irrelevant never
//! pays for a fetch (spec §9 — "never load a whole file's properties merely
//! to place it in the projection").

use async_trait::async_trait;

use crate::error::{CoreError, Result};

/// An opaque position in the store's change stream (a Redis stream entry
/// ID, e.g. `"1700000000000-0"`). Ordered lexically the same way the
/// underlying stream orders entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub String);

impl StreamId {
    /// The stream position meaning "the very beginning" — used to bootstrap
    /// a reader that has never consumed this stream before.
    pub fn beginning() -> Self {
        StreamId("0-0".to_string())
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of change a [`StoreEvent`] represents (spec §2.2: `set` or
/// `del`). File-level deletion is not a distinct wire event — the state
/// builder infers it when `filePath` itself is deleted (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Set,
    Delete,
}

/// One entry read off the change stream. Deliberately thin: the event
/// carries only the changed key, never its value (spec §2.2) — a consumer
/// that cares does a separate [`StoreClient::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub id: StreamId,
    pub kind: EventKind,
    /// The raw store key, e.g. `file:abc123/titles/eng`.
    pub key: String,
    pub ts_ms: i64,
}

impl StoreEvent {
    /// Parses `file:<fileId>/<propertyPath>` into `(fileId, dot-normalized
    /// property)`. `None` for keys outside this schema, which the state
    /// builder simply ignores (spec §4.4).
    pub fn parse_file_key(&self) -> Option<(String, String)> {
        parse_file_key(&self.key)
    }
}

/// Parses a raw store key of the form `file:<fileId>/<propertyPath>` into
/// `(fileId, dot-normalized property)`.
pub fn parse_file_key(key: &str) -> Option<(String, String)> {
    let rest = key.strip_prefix("file:")?;
    let (file_id, prop) = rest.split_once('/')?;
    if file_id.is_empty() || prop.is_empty() {
        return None;
    }
    Some((
        file_id.to_string(),
        crate::metadata::normalize_property_path(prop),
    ))
}

/// Read access to the metadata store: point GET on individual property
/// keys, and the append-only event stream (for bootstrap and live tail).
///
/// Implementors only need to support reads — this engine never writes back
/// to the store (spec §1 Non-goals).
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Point GET on a string key, e.g. `file:<id>/<prop>`. `None` means the
    /// key is absent right now — for a `set` event this is spec §7's
    /// `DataSkew` case (the key was deleted again before the fetch landed)
    /// and is silently ignored rather than treated as an error.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// `SMEMBERS` on a set key, e.g. `file:__index__` (diagnostics only).
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Lists every key matching `prefix*`, for diagnostic enumeration.
    async fn scan_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Reads events strictly after `after`, oldest first, up to
    /// `max_count` entries, without blocking. Used for the bootstrap replay
    /// (spec §2.1: "subscribe to events starting at log position zero").
    async fn read_stream(&self, after: &StreamId, max_count: usize) -> Result<Vec<StoreEvent>>;

    /// Reads events strictly after `after`, blocking up to `timeout` if
    /// none are yet available. Used for the live-tail phase (spec §5:
    /// "bounded block timeout (suggested 5s); on timeout they simply
    /// loop").
    async fn read_stream_blocking(
        &self,
        after: &StreamId,
        max_count: usize,
        timeout: std::time::Duration,
    ) -> Result<Vec<StoreEvent>>;
}

/// Redis-backed [`StoreClient`], mirroring the teacher's `RedisCache`
/// connection-management pattern. Properties live as plain string keys
/// (`file:<fileId>/<property>`, spec §2.2); the stream is `meta:events`.
#[cfg(feature = "redis-store")]
pub mod redis_store {
    use super::*;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    const EVENTS_STREAM_KEY: &str = "meta:events";

    /// A thin, cloneable handle over a `redis::aio::ConnectionManager`
    /// (spec §2, grounded in `RedisCache`): connection loss is retried
    /// transparently by the manager, so callers never see a "disconnected"
    /// error, only transient latency.
    #[derive(Clone)]
    pub struct RedisStoreClient {
        conn: ConnectionManager,
    }

    impl std::fmt::Debug for RedisStoreClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisStoreClient").finish_non_exhaustive()
        }
    }

    impl RedisStoreClient {
        /// Connects to `url` (a `redis://` connection string); retrying the
        /// initial handshake is the manager's job once constructed.
        pub async fn connect(url: &str) -> Result<Self> {
            let client = redis::Client::open(url)
                .map_err(|e| CoreError::Transport(format!("invalid redis url: {e}")))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| CoreError::Transport(format!("redis connect failed: {e}")))?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl StoreClient for RedisStoreClient {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let mut conn = self.conn.clone();
            conn.get(key)
                .await
                .map_err(|e| CoreError::Transport(format!("redis GET failed: {e}")))
        }

        async fn smembers(&self, key: &str) -> Result<Vec<String>> {
            let mut conn = self.conn.clone();
            conn.smembers(key)
                .await
                .map_err(|e| CoreError::Transport(format!("redis SMEMBERS failed: {e}")))
        }

        async fn scan_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            let mut conn = self.conn.clone();
            let pattern = format!("{prefix}*");
            conn.keys(&pattern)
                .await
                .map_err(|e| CoreError::Transport(format!("redis KEYS failed: {e}")))
        }

        async fn read_stream(&self, after: &StreamId, max_count: usize) -> Result<Vec<StoreEvent>> {
            let mut conn = self.conn.clone();
            let lower = format!("({}", after.0);
            let entries: Vec<(String, Vec<(String, String)>)> = redis::cmd("XRANGE")
                .arg(EVENTS_STREAM_KEY)
                .arg(lower)
                .arg("+")
                .arg("COUNT")
                .arg(max_count)
                .query_async(&mut conn)
                .await
                .map_err(|e| CoreError::Transport(format!("redis XRANGE failed: {e}")))?;

            entries
                .into_iter()
                .map(|(id, fields)| parse_event(StreamId(id), fields))
                .collect()
        }

        async fn read_stream_blocking(
            &self,
            after: &StreamId,
            max_count: usize,
            timeout: std::time::Duration,
        ) -> Result<Vec<StoreEvent>> {
            let mut conn = self.conn.clone();
            let block_ms = timeout.as_millis().max(1) as usize;
            let result: redis::streams::StreamReadReply = redis::cmd("XREAD")
                .arg("COUNT")
                .arg(max_count)
                .arg("BLOCK")
                .arg(block_ms)
                .arg("STREAMS")
                .arg(EVENTS_STREAM_KEY)
                .arg(&after.0)
                .query_async(&mut conn)
                .await
                .map_err(|e| CoreError::Transport(format!("redis XREAD failed: {e}")))?;

            let mut events = Vec::new();
            for key in result.keys {
                for id in key.ids {
                    let fields: Vec<(String, String)> = id
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
                    events.push(parse_event(StreamId(id.id), fields)?);
                }
            }
            Ok(events)
        }
    }

    fn parse_event(id: StreamId, fields: Vec<(String, String)>) -> Result<StoreEvent> {
        let lookup = |field: &str| {
            fields
                .iter()
                .find(|(k, _)| k == field)
                .map(|(_, v)| v.clone())
        };
        let key = lookup("key")
            .ok_or_else(|| CoreError::Transport("event missing key field".to_string()))?;
        let kind = match lookup("type").as_deref() {
            Some("set") => EventKind::Set,
            Some("del") => EventKind::Delete,
            other => {
                return Err(CoreError::Transport(format!(
                    "event has unknown type: {other:?}"
                )))
            }
        };
        let ts_ms = lookup("ts").and_then(|v| v.parse().ok()).unwrap_or(0);
        Ok(StoreEvent {
            id,
            kind,
            key,
            ts_ms,
        })
    }
}

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStoreClient;

/// An in-memory [`StoreClient`] fake, normally only compiled for this
/// crate's own unit tests; gated behind `mock-store` as well so
/// `metafs-core/tests/` integration tests and `metafs-server` can drive
/// scenarios against it without a live Redis instance.
#[cfg(any(test, feature = "mock-store"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// An in-memory [`StoreClient`] double for tests: a keyspace plus an
    /// append-only event log, with helpers to seed and append events
    /// without needing a live Redis instance.
    #[derive(Default)]
    pub struct MockStoreClient {
        keyspace: Mutex<HashMap<String, String>>,
        sets: Mutex<HashMap<String, HashSet<String>>>,
        events: Mutex<Vec<StoreEvent>>,
    }

    impl MockStoreClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Appends a property-set event and updates the keyspace so a
        /// subsequent `get` reflects it (spec §9's read-your-writes
        /// assumption).
        pub fn push_set(&self, file_id: &str, property: &str, value: &str) -> StreamId {
            let id = self.next_id();
            let key = format!("file:{file_id}/{property}");
            self.keyspace
                .lock()
                .unwrap()
                .insert(key.clone(), value.to_string());
            self.events.lock().unwrap().push(StoreEvent {
                id: id.clone(),
                kind: EventKind::Set,
                key,
                ts_ms: 0,
            });
            id
        }

        /// Appends a `set` event whose key is absent from the keyspace by
        /// the time a reader follows up with `get` — exercises spec §7's
        /// `DataSkew` path without touching the keyspace.
        pub fn push_set_without_value(&self, file_id: &str, property: &str) -> StreamId {
            let id = self.next_id();
            let key = format!("file:{file_id}/{property}");
            self.events.lock().unwrap().push(StoreEvent {
                id: id.clone(),
                kind: EventKind::Set,
                key,
                ts_ms: 0,
            });
            id
        }

        /// Appends a property-delete event, removing the key from the
        /// keyspace.
        pub fn push_delete(&self, file_id: &str, property: &str) -> StreamId {
            let id = self.next_id();
            let key = format!("file:{file_id}/{property}");
            self.keyspace.lock().unwrap().remove(&key);
            self.events.lock().unwrap().push(StoreEvent {
                id: id.clone(),
                kind: EventKind::Delete,
                key,
                ts_ms: 0,
            });
            id
        }

        fn next_id(&self) -> StreamId {
            let len = self.events.lock().unwrap().len();
            StreamId(format!("{}-0", len + 1))
        }
    }

    #[async_trait]
    impl StoreClient for MockStoreClient {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.keyspace.lock().unwrap().get(key).cloned())
        }

        async fn smembers(&self, key: &str) -> Result<Vec<String>> {
            Ok(self
                .sets
                .lock()
                .unwrap()
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default())
        }

        async fn scan_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .keyspace
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn read_stream(&self, after: &StreamId, max_count: usize) -> Result<Vec<StoreEvent>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.id > *after)
                .take(max_count)
                .cloned()
                .collect())
        }

        async fn read_stream_blocking(
            &self,
            after: &StreamId,
            max_count: usize,
            _timeout: std::time::Duration,
        ) -> Result<Vec<StoreEvent>> {
            self.read_stream(after, max_count).await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_file_key_schema() {
            assert_eq!(
                parse_file_key("file:abc/titles/eng"),
                Some(("abc".to_string(), "titles.eng".to_string()))
            );
            assert_eq!(parse_file_key("meta:events"), None);
            assert_eq!(parse_file_key("file:abc"), None);
        }

        #[tokio::test]
        async fn get_reflects_the_latest_set() {
            let store = MockStoreClient::new();
            store.push_set("file-1", "filePath", "a.mkv");
            store.push_set("file-1", "title", "A");
            assert_eq!(
                store.get("file:file-1/filePath").await.unwrap().as_deref(),
                Some("a.mkv")
            );
        }

        #[tokio::test]
        async fn read_stream_respects_cursor_and_count() {
            let store = MockStoreClient::new();
            let first = store.push_set("file-1", "filePath", "a.mkv");
            store.push_set("file-1", "title", "A");
            store.push_set("file-1", "title", "B");

            let events = store.read_stream(&first, 10).await.unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[1].key, "file:file-1/title");
        }

        #[tokio::test]
        async fn delete_event_removes_key_from_keyspace() {
            let store = MockStoreClient::new();
            store.push_set("file-1", "title", "A");
            store.push_delete("file-1", "title");
            assert_eq!(store.get("file:file-1/title").await.unwrap(), None);
        }

        #[tokio::test]
        async fn set_without_value_then_get_yields_data_skew() {
            let store = MockStoreClient::new();
            let id = store.push_set_without_value("file-1", "title");
            let events = store
                .read_stream(&StreamId::beginning(), 10)
                .await
                .unwrap();
            assert_eq!(events[0].id, id);
            assert_eq!(store.get(&events[0].key).await.unwrap(), None);
        }
    }
}

//! State builder (spec §4.4): consumes the store's change stream and keeps
//! an in-memory `fileId -> property map` of every file seen so far,
//! re-evaluating rules and pushing completed/changed/removed files into a
//! [`ProjectionSink`] as they occur.
//!
//! Bootstrap and live-tail share the same event-application logic
//! (`handle_event`); only how the caller obtains events differs (`XRANGE`
//! replay vs. blocking `XREAD`, spec §2.1/§2.2). The sink is a parameter to
//! every call rather than a field so a caller can swap in a
//! [`TrackingSink`] for the duration of a refresh's full-log replay without
//! disturbing this builder's own `files_state`.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::extractor::PropertyExtractor;
use crate::metadata::{FileMetadata, PropertyMap};
use crate::store::{EventKind, StoreClient, StoreEvent, StreamId};

/// Where the state builder delivers file lifecycle changes. Implemented by
/// the server's live projection writer, and by [`TrackingSink`] during a
/// refresh.
pub trait ProjectionSink {
    /// A file's property map became complete (has `filePath`) for the first
    /// time, or changed while already complete.
    fn on_file_complete(&self, file_id: &str, metadata: FileMetadata);
    /// A file's `filePath` was removed (or its whole property map emptied),
    /// so it must leave the projection.
    fn on_file_delete(&self, file_id: &str);
}

/// Running counters surfaced for diagnostics (`/api/fuse/stats` supplemental
/// fields, spec §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct StateBuilderStats {
    pub events_applied: u64,
    pub events_skipped_irrelevant: u64,
    pub events_skipped_skew: u64,
    pub files_tracked: u64,
}

/// Consumes the store's change stream and maintains the raw per-file
/// property state the [`Projection`](crate::projection::Projection) is
/// derived from.
pub struct StateBuilder<S: StoreClient> {
    store: S,
    extractor: PropertyExtractor,
    files_state: HashMap<String, PropertyMap>,
    stats: StateBuilderStats,
}

impl<S: StoreClient> StateBuilder<S> {
    pub fn new(store: S, extractor: PropertyExtractor) -> Self {
        Self {
            store,
            extractor,
            files_state: HashMap::new(),
            stats: StateBuilderStats::default(),
        }
    }

    pub fn stats(&self) -> StateBuilderStats {
        self.stats
    }

    /// Discards all tracked per-file state (spec §4.5 "Refresh" step 1:
    /// "reset the builder's in-memory file state"). Does not touch the
    /// projection itself — the caller is responsible for reconciling it
    /// afterwards via [`ProjectionSink`] calls driven by a fresh
    /// [`Self::bootstrap`].
    pub fn reset(&mut self) {
        self.files_state.clear();
        self.stats = StateBuilderStats::default();
    }

    /// Replays the change stream from the very beginning in bounded
    /// batches, applying each event to `sink` as it's read (spec §2.1).
    /// Returns the cursor to resume live-tailing from.
    pub async fn bootstrap(&mut self, sink: &dyn ProjectionSink, batch_size: usize) -> Result<StreamId> {
        let mut cursor = StreamId::beginning();
        loop {
            let batch = self.store.read_stream(&cursor, batch_size).await?;
            if batch.is_empty() {
                break;
            }
            for event in &batch {
                self.handle_event(event, sink).await?;
            }
            cursor = batch.last().map(|e| e.id.clone()).unwrap_or(cursor);
            if batch.len() < batch_size {
                break;
            }
        }
        Ok(cursor)
    }

    /// Blocks (up to `timeout`) for new events after `cursor`, applies them
    /// to `sink`, and returns the advanced cursor (spec §2.2, §5: "bounded
    /// block timeout... on timeout they simply loop").
    pub async fn poll_once(
        &mut self,
        sink: &dyn ProjectionSink,
        cursor: &StreamId,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<StreamId> {
        let batch = self
            .store
            .read_stream_blocking(cursor, batch_size, timeout)
            .await?;
        let mut next = cursor.clone();
        for event in &batch {
            self.handle_event(event, sink).await?;
            next = event.id.clone();
        }
        Ok(next)
    }

    async fn handle_event(&mut self, event: &StoreEvent, sink: &dyn ProjectionSink) -> Result<()> {
        let Some((file_id, property)) = event.parse_file_key() else {
            self.stats.events_skipped_irrelevant += 1;
            return Ok(());
        };

        if !self.extractor.is_relevant(&property) {
            self.stats.events_skipped_irrelevant += 1;
            return Ok(());
        }

        match event.kind {
            EventKind::Set => self.handle_set(&file_id, &property, &event.key, sink).await?,
            EventKind::Delete => self.handle_delete(&file_id, &property, sink),
        }
        self.stats.events_applied += 1;
        self.stats.files_tracked = self.files_state.len() as u64;
        Ok(())
    }

    async fn handle_set(
        &mut self,
        file_id: &str,
        property: &str,
        key: &str,
        sink: &dyn ProjectionSink,
    ) -> Result<()> {
        let Some(value) = self.store.get(key).await? else {
            // DataSkew (spec §7): the event fired but the value is already
            // gone by the time we fetch it. Silently ignored, not an error.
            self.stats.events_skipped_skew += 1;
            return Ok(());
        };

        let was_complete = self
            .files_state
            .get(file_id)
            .is_some_and(|props| props.contains_key("filePath"));

        let props = self.files_state.entry(file_id.to_string()).or_default();
        props.insert(property.to_string(), value);

        let is_complete = props.contains_key("filePath");
        if is_complete {
            if let Some(metadata) = FileMetadata::from_property_map(props) {
                sink.on_file_complete(file_id, metadata);
            }
        } else if was_complete {
            // filePath was present, a different property update landed
            // mid-flight, and the map is still missing filePath — this can
            // only happen if filePath itself was previously deleted without
            // us yet observing the delete event; nothing to project either
            // way.
            sink.on_file_delete(file_id);
        }
        Ok(())
    }

    fn handle_delete(&mut self, file_id: &str, property: &str, sink: &dyn ProjectionSink) {
        let Some(props) = self.files_state.get_mut(file_id) else {
            return;
        };
        props.remove(property);

        // A file leaves the projection when its `filePath` is deleted, or
        // its whole property map becomes empty (spec §4.4).
        if property == "filePath" || props.is_empty() {
            self.files_state.remove(file_id);
            sink.on_file_delete(file_id);
            return;
        }

        // Any other property deletion is a path-affecting update as long as
        // the file is still complete: re-derive and push the snapshot so the
        // projection recomputes its virtual path (spec §4.4 handleDelete).
        if let Some(metadata) = FileMetadata::from_property_map(props) {
            sink.on_file_complete(file_id, metadata);
        }
    }
}

/// A [`ProjectionSink`] decorator that records every `fileId` it sees
/// completed, without forwarding deletes to the wrapped sink. Used during a
/// refresh's full-log replay (spec §4.5): the projection is reconciled, not
/// emptied, by calling
/// [`Projection::retain_file_ids`](crate::projection::Projection::retain_file_ids)
/// with [`TrackingSink::into_seen`]'s result once the replay completes.
pub struct TrackingSink<'a> {
    inner: &'a dyn ProjectionSink,
    seen: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl<'a> TrackingSink<'a> {
    pub fn new(inner: &'a dyn ProjectionSink) -> Self {
        Self {
            inner,
            seen: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn into_seen(self) -> std::collections::HashSet<String> {
        self.seen.into_inner().unwrap()
    }
}

impl ProjectionSink for TrackingSink<'_> {
    fn on_file_complete(&self, file_id: &str, metadata: FileMetadata) {
        self.seen.lock().unwrap().insert(file_id.to_string());
        self.inner.on_file_complete(file_id, metadata);
    }

    fn on_file_delete(&self, file_id: &str) {
        // A delete mid-replay means the log itself recorded removal; still
        // not "seen" for retention purposes, and not forwarded either since
        // the caller reconciles deletions via retain_file_ids afterwards.
        self.seen.lock().unwrap().remove(file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleConfig;
    use crate::store::mock::MockStoreClient;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        completed: Mutex<Vec<(String, FileMetadata)>>,
        deleted: Mutex<Vec<String>>,
    }

    impl ProjectionSink for RecordingSink {
        fn on_file_complete(&self, file_id: &str, metadata: FileMetadata) {
            self.completed
                .lock()
                .unwrap()
                .push((file_id.to_string(), metadata));
        }
        fn on_file_delete(&self, file_id: &str) {
            self.deleted.lock().unwrap().push(file_id.to_string());
        }
    }

    fn builder(store: MockStoreClient) -> StateBuilder<MockStoreClient> {
        let extractor = PropertyExtractor::from_rule_config(&RuleConfig::seed());
        StateBuilder::new(store, extractor)
    }

    #[tokio::test]
    async fn bootstrap_completes_a_file_once_file_path_arrives() {
        let store = MockStoreClient::new();
        store.push_set("f1", "title", "Inception");
        store.push_set("f1", "fileType", "video");
        store.push_set("f1", "filePath", "Movies/Inception.mkv");
        let mut sb = builder(store);
        let sink = RecordingSink::default();

        sb.bootstrap(&sink, 10).await.unwrap();

        let completed = sink.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, "f1");
        assert_eq!(completed[0].1.file_path, "Movies/Inception.mkv");
    }

    #[tokio::test]
    async fn irrelevant_property_updates_are_skipped_without_a_fetch() {
        let store = MockStoreClient::new();
        store.push_set("f1", "filePath", "Movies/Inception.mkv");
        store.push_set("f1", "thumbnailHash", "deadbeef");
        let mut sb = builder(store);
        let sink = RecordingSink::default();

        sb.bootstrap(&sink, 10).await.unwrap();

        assert_eq!(sb.stats().events_skipped_irrelevant, 1);
        // Only the filePath set produced a completion; the irrelevant
        // update did not re-trigger one.
        assert_eq!(sink.completed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn data_skew_is_silently_ignored() {
        let store = MockStoreClient::new();
        store.push_set_without_value("f1", "filePath");
        let mut sb = builder(store);
        let sink = RecordingSink::default();

        sb.bootstrap(&sink, 10).await.unwrap();

        assert_eq!(sb.stats().events_skipped_skew, 1);
        assert!(sink.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_of_file_path_removes_the_file() {
        let store = MockStoreClient::new();
        store.push_set("f1", "filePath", "Movies/Inception.mkv");
        store.push_delete("f1", "filePath");
        let mut sb = builder(store);
        let sink = RecordingSink::default();

        sb.bootstrap(&sink, 10).await.unwrap();

        assert_eq!(sink.completed.lock().unwrap().len(), 1);
        assert_eq!(sink.deleted.lock().unwrap(), vec!["f1".to_string()]);
    }

    #[tokio::test]
    async fn poll_once_advances_cursor_and_applies_new_events() {
        let store = MockStoreClient::new();
        let first = store.push_set("f1", "filePath", "Movies/Inception.mkv");
        let mut sb = builder(store);
        let sink = RecordingSink::default();

        let cursor = sb.poll_once(&sink, &StreamId::beginning(), 10, Duration::from_millis(1)).await.unwrap();
        assert_eq!(cursor, first);
        assert_eq!(sink.completed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tracking_sink_records_only_completed_file_ids() {
        let store = MockStoreClient::new();
        store.push_set("f1", "filePath", "Movies/A.mkv");
        store.push_set("f2", "filePath", "Movies/B.mkv");
        let mut sb = builder(store);
        let sink = RecordingSink::default();
        let tracking = TrackingSink::new(&sink);

        sb.bootstrap(&tracking, 10).await.unwrap();
        let seen = tracking.into_seen();

        assert!(seen.contains("f1"));
        assert!(seen.contains("f2"));
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn deleting_a_non_file_path_property_re_emits_completion() {
        let store = MockStoreClient::new();
        store.push_set("f1", "filePath", "Movies/Inception.mkv");
        store.push_set("f1", "movieYear", "2010");
        store.push_delete("f1", "movieYear");
        let mut sb = builder(store);
        let sink = RecordingSink::default();

        sb.bootstrap(&sink, 10).await.unwrap();

        // filePath set, movieYear set, movieYear delete: two completions,
        // the second reflecting movieYear's removal, and no delete at all
        // since the file is still complete (spec §4.4 handleDelete).
        let completed = sink.completed.lock().unwrap();
        assert_eq!(completed.len(), 2);
        assert!(completed[1].1.get("movieYear").is_none());
        assert!(sink.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_tracked_state_but_not_stats_observers() {
        let store = MockStoreClient::new();
        store.push_set("f1", "filePath", "Movies/A.mkv");
        let mut sb = builder(store);
        let sink = RecordingSink::default();
        sb.bootstrap(&sink, 10).await.unwrap();
        assert_eq!(sb.stats().files_tracked, 1);

        sb.reset();
        assert_eq!(sb.stats().files_tracked, 0);
    }
}

//! End-to-end scenarios (spec §8): drives a [`MockStoreClient`] through a
//! [`StateBuilder`] into a [`Projection`] exactly as the server's
//! `LiveProjectionSink` does, then queries the projection the way the REST
//! API would. Each test reproduces one of the six worked scenarios.

use std::sync::RwLock;

use metafs_core::{
    FileMetadata, MockStoreClient, Projection, ProjectionConfig, ProjectionSink,
    PropertyExtractor, RuleConfig, StateBuilder,
};

/// A [`ProjectionSink`] that applies straight to a locked [`Projection`]
/// under a fixed rule set — the test-side equivalent of the server's
/// `LiveProjectionSink`, minus the event bus.
struct TestSink<'a> {
    projection: &'a RwLock<Projection>,
    rules: &'a RuleConfig,
}

impl ProjectionSink for TestSink<'_> {
    fn on_file_complete(&self, file_id: &str, metadata: FileMetadata) {
        self.projection
            .write()
            .unwrap()
            .on_file_complete(file_id, metadata, self.rules);
    }

    fn on_file_delete(&self, file_id: &str) {
        self.projection.write().unwrap().on_file_delete(file_id);
    }
}

fn test_projection() -> RwLock<Projection> {
    RwLock::new(Projection::new(ProjectionConfig {
        files_root: "/files".to_string(),
        share_base: None,
        file_mode: 0o644,
        dir_mode: 0o755,
        uid: 0,
        gid: 0,
    }))
}

async fn bootstrap(store: &MockStoreClient, rules: &RuleConfig, projection: &RwLock<Projection>) {
    let extractor = PropertyExtractor::from_rule_config(rules);
    let mut builder = StateBuilder::new(StoreHandle(store), extractor);
    let sink = TestSink { projection, rules };
    builder.bootstrap(&sink, 100).await.unwrap();
}

/// [`StateBuilder`] is generic over an owned [`metafs_core::StoreClient`];
/// the tests want to keep the same `MockStoreClient` across repeated
/// bootstraps (to append further events in between), so this wraps a
/// borrow and forwards every call.
struct StoreHandle<'a>(&'a MockStoreClient);

#[async_trait::async_trait]
impl metafs_core::StoreClient for StoreHandle<'_> {
    async fn get(&self, key: &str) -> metafs_core::Result<Option<String>> {
        self.0.get(key).await
    }
    async fn smembers(&self, key: &str) -> metafs_core::Result<Vec<String>> {
        self.0.smembers(key).await
    }
    async fn scan_by_prefix(&self, prefix: &str) -> metafs_core::Result<Vec<String>> {
        self.0.scan_by_prefix(prefix).await
    }
    async fn read_stream(
        &self,
        after: &metafs_core::StreamId,
        max_count: usize,
    ) -> metafs_core::Result<Vec<metafs_core::StoreEvent>> {
        self.0.read_stream(after, max_count).await
    }
    async fn read_stream_blocking(
        &self,
        after: &metafs_core::StreamId,
        max_count: usize,
        timeout: std::time::Duration,
    ) -> metafs_core::Result<Vec<metafs_core::StoreEvent>> {
        self.0.read_stream_blocking(after, max_count, timeout).await
    }
}

#[tokio::test]
async fn scenario_1_bootstrap_to_complete_movie() {
    let store = MockStoreClient::new();
    store.push_set("abc", "filePath", "Movies/Inception.mkv");
    store.push_set("abc", "title", "Inception");
    store.push_set("abc", "year", "2010");
    store.push_set("abc", "fileType", "video");
    store.push_set("abc", "extension", "mkv");
    store.push_set("abc", "movieYear", "2010");

    let rules = RuleConfig::seed();
    let projection = test_projection();
    bootstrap(&store, &rules, &projection).await;

    let projection = projection.read().unwrap();
    assert!(projection
        .readdir("/")
        .unwrap()
        .contains(&"Movies".to_string()));
    assert!(projection
        .readdir("/Movies")
        .unwrap()
        .contains(&"Inception (2010)".to_string()));

    let attrs = projection
        .getattr("/Movies/Inception (2010)/Inception (2010).mkv")
        .expect("file should be projected");
    assert!(!attrs.is_dir);
    assert_eq!(attrs.size, 0);

    let read = projection
        .read("/Movies/Inception (2010)/Inception (2010).mkv")
        .expect("file should be readable");
    assert_eq!(read.source_path, "/files/Movies/Inception.mkv");
}

#[tokio::test]
async fn scenario_2_move_on_property_update() {
    let store = MockStoreClient::new();
    store.push_set("abc", "filePath", "Movies/Inception.mkv");
    store.push_set("abc", "title", "Inception");
    store.push_set("abc", "fileType", "video");
    store.push_set("abc", "extension", "mkv");
    store.push_set("abc", "movieYear", "2010");

    let rules = RuleConfig::seed();
    let projection = test_projection();
    bootstrap(&store, &rules, &projection).await;

    store.push_set("abc", "movieYear", "2011");
    bootstrap(&store, &rules, &projection).await;

    let guard = projection.read().unwrap();
    assert!(!guard
        .readdir("/Movies")
        .unwrap()
        .contains(&"Inception (2010)".to_string()));
    assert!(guard
        .readdir("/Movies")
        .unwrap()
        .contains(&"Inception (2011)".to_string()));

    let metadata = guard
        .get_metadata("/Movies/Inception (2011)/Inception (2011).mkv")
        .expect("file should be at the new path");
    assert_eq!(metadata.get("movieYear").as_deref(), Some("2011"));
    assert_eq!(
        guard.path_for_file("abc").as_deref(),
        Some("/Movies/Inception (2011)/Inception (2011).mkv")
    );
}

#[tokio::test]
async fn scenario_3_delete_on_file_path_removal() {
    let store = MockStoreClient::new();
    store.push_set("abc", "filePath", "Movies/Inception.mkv");
    store.push_set("abc", "title", "Inception");
    store.push_set("abc", "fileType", "video");
    store.push_set("abc", "extension", "mkv");
    store.push_set("abc", "movieYear", "2011");

    let rules = RuleConfig::seed();
    let projection = test_projection();
    bootstrap(&store, &rules, &projection).await;
    assert!(projection.read().unwrap().path_for_file("abc").is_some());

    store.push_delete("abc", "filePath");
    bootstrap(&store, &rules, &projection).await;

    let guard = projection.read().unwrap();
    assert!(guard.path_for_file("abc").is_none());
    assert!(!guard.exists("/Movies/Inception (2011)"));
    assert!(!guard.exists("/Movies"));
}

#[tokio::test]
async fn scenario_4_tv_with_season_and_episode() {
    let store = MockStoreClient::new();
    store.push_set("xyz", "filePath", "tv/bb/s01e01.mkv");
    store.push_set("xyz", "titles.eng", "Breaking Bad");
    store.push_set("xyz", "season", "1");
    store.push_set("xyz", "episode", "1");
    store.push_set("xyz", "fileType", "video");
    store.push_set("xyz", "extension", "mkv");

    let rules = RuleConfig::seed();
    let projection = test_projection();
    bootstrap(&store, &rules, &projection).await;

    let guard = projection.read().unwrap();
    assert_eq!(
        guard.path_for_file("xyz").as_deref(),
        Some("/TV Shows/Breaking Bad/S01/Breaking Bad S01E01.mkv")
    );
}

#[tokio::test]
async fn scenario_5_rule_relevance_skips_unrelated_property() {
    let store = MockStoreClient::new();
    store.push_set("q", "unrelated", "some-value");

    let rules = RuleConfig::seed();
    let extractor = PropertyExtractor::from_rule_config(&rules);
    assert!(!extractor.is_relevant("unrelated"));

    let projection = test_projection();
    let mut builder = StateBuilder::new(StoreHandle(&store), extractor);
    let sink = TestSink {
        projection: &projection,
        rules: &rules,
    };
    builder.bootstrap(&sink, 100).await.unwrap();

    let stats = builder.stats();
    assert_eq!(stats.events_skipped_irrelevant, 1);
    assert_eq!(stats.events_applied, 0);
    assert_eq!(projection.read().unwrap().known_file_count(), 0);
}

#[tokio::test]
async fn scenario_6_refresh_after_rule_change() {
    let store = MockStoreClient::new();
    store.push_set("abc", "filePath", "Movies/Inception.mkv");
    store.push_set("abc", "title", "Inception");
    store.push_set("abc", "fileType", "video");
    store.push_set("abc", "extension", "mkv");
    store.push_set("abc", "movieYear", "2010");

    let mut rules = RuleConfig::seed();
    let projection = test_projection();
    bootstrap(&store, &rules, &projection).await;

    let old_path = "/Movies/Inception (2010)/Inception (2010).mkv";
    assert!(projection.read().unwrap().exists(old_path));

    // Replace the movie rule's template so the same file lands elsewhere.
    rules.rules[0].template = "Films/{title}.{extension}".to_string();

    let extractor = PropertyExtractor::from_rule_config(&rules);
    let mut builder = StateBuilder::new(StoreHandle(&store), extractor);
    let sink = TestSink {
        projection: &projection,
        rules: &rules,
    };
    builder.bootstrap(&sink, 100).await.unwrap();

    let guard = projection.read().unwrap();
    assert!(!guard.exists(old_path));
    assert!(guard.exists("/Films/Inception.mkv"));
    assert_eq!(
        guard.path_for_file("abc").as_deref(),
        Some("/Films/Inception.mkv")
    );
}

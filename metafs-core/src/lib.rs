//! Core library for the metadata-driven filesystem projection engine (spec
//! §1–§5): the rule model and evaluator, the path-template renderer, the
//! store client, the property extractor, the state builder, the in-memory
//! projection (virtual filesystem), the rule config store, and the
//! in-process event bus.
//!
//! The server crate (`metafs-server`) wires these pieces into a long-running
//! process and exposes them over HTTP; everything in this crate is
//! transport-agnostic and has no knowledge of axum, Redis Streams wire
//! details aside, or any particular deployment shape.

pub mod error;
pub mod events;
pub mod extractor;
pub mod metadata;
pub mod projection;
pub mod rule_store;
pub mod rules;
pub mod state_builder;
pub mod store;
pub mod template;

pub use error::{CoreError, Result};
pub use events::{ProjectionEvent, ProjectionEventBus};
pub use extractor::PropertyExtractor;
pub use metadata::{FileMetadata, PropertyLookup, PropertyMap};
pub use projection::{
    FileSnapshot, FsAttrs, Projection, ProjectionConfig, ProjectionStats, ReadResult,
};
pub use rule_store::RuleConfigStore;
pub use rules::{
    Condition, ConditionGroup, ConditionNode, ConditionOp, GroupOp, Rule, RuleConfig, RuleMatch,
    RuleValidation,
};
pub use state_builder::{ProjectionSink, StateBuilder, StateBuilderStats, TrackingSink};
pub use store::{EventKind, StoreClient, StoreEvent, StreamId};
#[cfg(feature = "redis-store")]
pub use store::RedisStoreClient;
#[cfg(any(test, feature = "mock-store"))]
pub use store::mock::MockStoreClient;
pub use template::{Template, TemplateParseError};

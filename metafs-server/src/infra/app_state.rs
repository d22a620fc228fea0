use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use metafs_core::{Projection, ProjectionEventBus, RuleConfig, RuleConfigStore};
use tokio::sync::mpsc;

use crate::infra::config::Config;
use crate::infra::engine::EngineCommand;

/// Shared, cloneable handle axum passes to every request handler (spec §5:
/// handlers never touch the projection or rule config directly, only
/// through these locks/channels; the only writer is the background engine
/// task). Grounded in the teacher's `AppState` pattern of a single `Clone`
/// struct of `Arc`-wrapped subsystems threaded through the router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub projection: Arc<RwLock<Projection>>,
    pub rule_store: Arc<RuleConfigStore>,
    pub rules: Arc<RwLock<RuleConfig>>,
    pub events: Arc<ProjectionEventBus>,
    pub engine_commands: mpsc::Sender<EngineCommand>,
    /// Flips to `true` once the first bootstrap completes; `/health`
    /// reports not-ready until then (spec §6 `/health`).
    pub ready: Arc<AtomicBool>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }
}

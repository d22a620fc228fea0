mod loader;
mod models;
mod sources;

pub use loader::{CliOverlay, ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::{Config, ConfigMetadata, FilesConfig, PermissionsConfig, ServerConfig, StoreConfig};
pub use sources::{EnvConfig, FileConfig};

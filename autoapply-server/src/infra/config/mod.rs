pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    AdapterConfig, Config, ConfigMetadata, DatabaseConfig, SchedulerSettings, ServerConfig,
};
pub use validation::{ConfigWarning, ConfigWarnings};

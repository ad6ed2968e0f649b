pub mod config;
pub mod loader;
pub mod registry;
pub mod schema;

pub use config::{load_config, load_config_file};
pub use loader::DataLoadError;
pub use registry::load_registry;

//! Application settings and configuration management

mod settings;

pub use settings::{
    LoggingConfig, ProviderConfig, RetryConfig, ServerConfig, Settings, StorageConfig,
};

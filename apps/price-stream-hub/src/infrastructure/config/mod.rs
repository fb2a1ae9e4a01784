//! Configuration Module
//!
//! Configuration loading for the hub service.

mod settings;

pub use settings::{
    ChannelSettings, ConfigError, ContinuitySettings, EngineSettings, HubConfig, ServerSettings,
    StorageSettings,
};

//! Core configuration for Capstan.

mod config;

pub use config::{Config, EngineConfig, MonitorConfig, RegistryConfig};

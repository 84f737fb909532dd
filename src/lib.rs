pub mod catalog;
pub mod config;
pub mod dataset;
pub mod error;
pub mod forwarder;
pub mod logger;
pub mod plugin;
pub mod presentation;
pub mod session;
pub mod state;

pub use error::PluginError;
pub use plugin::MoviePlugin;

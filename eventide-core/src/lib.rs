//! Eventide Core - configuration, catalog and output boundary
//!
//! This crate holds everything around the simulation engine that talks to the
//! outside world: the configuration model, the content catalog, the JSON event
//! schema with its topic routing, output sinks and tracing setup.

pub mod catalog;
pub mod config;
pub mod events;
pub mod sink;
pub mod tracing_setup;

pub use catalog::{Catalog, CatalogError, Song, Video};
pub use config::{ConfigError, EventideConfig};
pub use events::{EventEnvelope, EventMessage, EventRecord, Topic};
pub use sink::{EventSink, SinkError, SinkStats};

/// Errors that can bubble up from any boundary subsystem.
#[derive(Debug, thiserror::Error)]
pub enum EventideError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EventideError {
    /// Checks if this error stems from user-supplied input files.
    pub fn is_user_error(&self) -> bool {
        matches!(self, EventideError::Config(_) | EventideError::Catalog(_))
    }
}

pub type Result<T> = std::result::Result<T, EventideError>;

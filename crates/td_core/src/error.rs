//! Error types for the tower defense simulation.
//!
//! Only resource exhaustion, bad configuration and lookups of unknown
//! agents are errors. Missing targets, stale pool handles and
//! out-of-world queries are ordinary gameplay conditions and never
//! surface here.

use thiserror::Error;

use crate::components::AgentId;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Top-level error type for all simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Acquire was requested with creation disabled and no idle objects.
    #[error("Pool '{pool}' exhausted: {active} objects active, creation on demand disabled")]
    PoolExhausted {
        /// Name of the pool.
        pool: String,
        /// Objects currently checked out.
        active: usize,
    },

    /// Configuration values are out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No live agent carries this id.
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Failed to read a configuration file.
    #[error("Failed to read configuration file: {0}")]
    ConfigRead(#[from] std::io::Error),

    /// Failed to parse RON configuration.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] ron::error::SpannedError),
}

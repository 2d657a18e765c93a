//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → handed to ResilienceLayer, which splits it per component
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; circuits keep the config they were created with
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::CircuitBreakerSettings;
pub use schema::CircuitConfig;
pub use schema::LockSettings;
pub use schema::ObservabilityConfig;
pub use schema::OutboxConfig;
pub use schema::RealtimeConfig;
pub use schema::ResilienceConfig;

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, apply CLI overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → handed to the orchestrator at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the topic set never changes at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError, ConfigOverrides};
pub use schema::AppConfig;
pub use schema::BrokerConfig;
pub use schema::MetricsConfig;
pub use schema::ShutdownConfig;

//! Index Migrator Provider
//!
//! Rebuilds the transactions index as a new `<base>_v<N+1>` generation behind
//! its alias: create, atomic alias swap, bounded copy, verification, then
//! deletion of the previous generation. Any failure after the swap rolls the
//! alias back and removes the candidate.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod naming;
pub mod provider;

pub use config::MigratorConfig;
pub use coordinator::{MigrationOutcome, MigrationPhase, MigrationReport, ReindexCoordinator};
pub use error::MigrationError;
pub use job::MigrationJob;
pub use naming::{index_name, parse_index_name, IndexGeneration};
pub use provider::IndexMigratorProvider;

// Re-export Result type for convenience
pub type Result<T> = std::result::Result<T, MigrationError>;

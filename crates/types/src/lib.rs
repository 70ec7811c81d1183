//! Shared type definitions for Stevedore.
//!
//! These are the plain data types that cross crate boundaries: the lifecycle
//! and connection state enums, and the wire shapes returned by the runtime CLI
//! and the backend HTTP API.

mod backend;
mod connection;
mod lifecycle;
mod status;

pub use backend::{AccessToken, ConnectionRecord, ConnectionRecordList, EnvironmentInfo, FailedMigration, MigrationReport, ProjectRecord};
pub use connection::ConnectionState;
pub use lifecycle::LifecycleState;
pub use status::CliStatus;

//! Local runtime lifecycle: the install/start/stop/remove state machine and
//! workspace migration detection.

mod manager;
pub mod migration;

pub use manager::{InstallState, LifecycleManager, LifecycleSettings, StartReport};
pub use migration::{LEGACY_VERSION_PREFIXES, MigrationOutcome, is_legacy_version, migration_required};

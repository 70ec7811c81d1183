//! Configuration for stevedore.
//! This module handles loading, validation and persistence of the
//! ~/.config/stevedore/config.json file and the environment overrides.

mod env;
mod io;
mod model;
mod store;
mod validation;

pub use env::{EnvironmentOverrides, SKIP_VERIFY_ENV, VERSION_TAG_ENV};
pub use io::{CONFIG_PATH_ENV, default_config_path, load_config, load_config_from_path, save_config_to_path};
pub use model::{ConfigError, DEFAULT_CLI_PATH, DEFAULT_TAG, StevedoreConfig};
pub use store::{ConfigStore, ConnectionPreferences};
pub use validation::{ValidationError, validate_config, validate_tag};

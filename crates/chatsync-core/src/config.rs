use config::{Config as ConfigLoader, Environment, File};
use std::path::Path;

use chatsync_types::SyncConfig;
use crate::error::Result;

/// Loading of [`SyncConfig`] from a TOML file and the environment.
pub trait LoadSyncConfig: Sized {
    /// Hierarchy (weakest to strongest):
    /// 1. built-in defaults
    /// 2. the TOML file at `path`, if given and present
    /// 3. `CHATSYNC_*` environment variables (`CHATSYNC_RETRY__MAX_ATTEMPTS=3`)
    fn load(path: Option<&Path>) -> Result<Self>;
}

impl LoadSyncConfig for SyncConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigLoader::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("CHATSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

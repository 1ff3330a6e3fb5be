//! Local filesystem storage backend, used by tests and local dry runs.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{LocalConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// Local filesystem configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub path: String,
}

impl StorageProvider {
    pub(super) async fn construct_local(config: LocalConfig) -> Result<Self, StorageError> {
        let store = LocalFileSystem::new_with_prefix(&config.path).context(LocalConfigSnafu)?;
        let canonical_url = config.path.clone();

        Ok(Self {
            config: BackendConfig::Local(config),
            object_store: Arc::new(store) as Arc<dyn ObjectStore>,
            canonical_url,
        })
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for an [`ObjectDatabase`](crate::ObjectDatabase).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// How long `save_objects` waits on each importer. `None` waits
    /// indefinitely.
    pub importer_timeout: Option<Duration>,
    /// Append a name table record to every save so hashes can be shown by
    /// name when the archive is inspected later.
    pub write_name_table: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            importer_timeout: None,
            write_name_table: true,
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Registry configuration.
//!
//! Controls the debug forensics the registry keeps for unregistered
//! callbacks. Both toggles default to off; turning them on trades memory
//! (retained dispatchers) for diagnosable double-unregister errors.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Configuration for a [`DispatchRegistry`].
///
/// [`DispatchRegistry`]: crate::registry::DispatchRegistry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Retain unregistered receivers, with their unregistration site, so a
    /// second unregister fails with `DoubleUnregister` instead of
    /// `NotRegistered`.
    #[serde(default)]
    pub track_unregistered_receivers: bool,

    /// Same retention for unbound connection listeners.
    #[serde(default)]
    pub track_unbound_connections: bool,
}

impl RegistryConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> DispatchResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DispatchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|source| DispatchError::Io {
            context: "reading registry configuration",
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|err| DispatchError::ConfigParse {
            message: err.to_string(),
        })
    }
}

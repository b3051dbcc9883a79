use std::{env, path::PathBuf};

use dirs_next::config_dir;
use das_util::expand_tilde;
use serde::{Deserialize, Serialize};

use crate::{RegistryError, ServiceMaps};

/// Environment variable overriding the service map location.
pub const MAPS_PATH_ENV: &str = "DAS_MAPS";

/// Location of the service map document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub maps_path: PathBuf,
}

impl RegistryConfig {
    /// Resolves the maps location: explicit path, then `DAS_MAPS`, then the
    /// default config directory.
    pub fn resolve(explicit: Option<&str>) -> Self {
        let maps_path = explicit
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(expand_tilde)
            .unwrap_or_else(default_maps_path);
        Self { maps_path }
    }

    pub fn load_maps(&self) -> Result<ServiceMaps, RegistryError> {
        ServiceMaps::from_path(&self.maps_path)
    }
}

/// Get the default path of the service map document.
///
/// `<config_dir>/das/maps.json` is preferred; `maps.yaml` is used when only the
/// YAML variant exists.
pub fn default_maps_path() -> PathBuf {
    if let Ok(path) = env::var(MAPS_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    let dir = config_dir().unwrap_or_else(|| PathBuf::from(".")).join("das");
    let json = dir.join("maps.json");
    let yaml = dir.join("maps.yaml");
    if !json.exists() && yaml.exists() { yaml } else { json }
}

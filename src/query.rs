//! Everything a packaging run needs to know, filled from the command line or a JSON file

use crate::common::{path_to_string, DeployError};
use crate::library::OperatingSystem;
use crate::path_list::PathList;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete specification of a packaging run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployQuery {
    /// Executables (or libraries) to deploy, all copied to the destination
    pub binaries: Vec<PathBuf>,
    /// Root of the bundle; libraries, plugins and translations go below it
    pub destination: PathBuf,
    /// Directories searched for libraries and Qt files before the system ones
    pub search_first_path_list: PathList,
    /// Suffixes appended to each search-first path (`lib`, `bin`, `qt5/lib`...)
    pub path_suffixes: Vec<String>,
    /// Languages to ship (`fr`, `de_CH`...); no translation work when empty
    pub language_suffixes: Vec<String>,
    /// Directories holding the application's own .qm files
    pub translation_dirs: Vec<PathBuf>,
    /// Format of the binaries; sniffed from the first binary when absent
    pub operating_system: Option<OperatingSystem>,
    pub patch_rpath: bool,
}

impl Default for DeployQuery {
    fn default() -> Self {
        Self {
            binaries: Vec::new(),
            destination: PathBuf::new(),
            search_first_path_list: PathList::new(),
            path_suffixes: Vec::new(),
            language_suffixes: Vec::new(),
            translation_dirs: Vec::new(),
            operating_system: None,
            patch_rpath: true,
        }
    }
}

impl DeployQuery {
    /// autodetects the settings with sensible defaults
    ///
    /// The destination is the directory containing the first binary.
    pub fn deduce_from_binaries<P: AsRef<Path>>(binaries: &[P]) -> Result<Self, DeployError> {
        let first = binaries
            .first()
            .ok_or_else(|| DeployError::ConfigError("no binary to deploy".to_owned()))?;
        let destination = first
            .as_ref()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_owned)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self {
            binaries: binaries.iter().map(|b| b.as_ref().to_owned()).collect(),
            destination,
            operating_system: OperatingSystem::from_binary(first),
            ..Self::default()
        })
    }

    /// Load a query from a JSON file; missing fields take their default value
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, DeployError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DeployError::io("reading the configuration file", e))?;
        serde_json::from_str(&content).map_err(|e| {
            DeployError::ConfigError(format!(
                "invalid configuration file {}: {}",
                path_to_string(path),
                e
            ))
        })
    }

    /// Operating system of the binaries, falling back to the host's
    pub fn target_operating_system(&self) -> OperatingSystem {
        self.operating_system
            .or_else(|| self.binaries.first().and_then(OperatingSystem::from_binary))
            .unwrap_or_else(OperatingSystem::current)
    }

    /// Check the query can be run: binaries present and existing
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.binaries.is_empty() {
            return Err(DeployError::ConfigError("no binary to deploy".to_owned()));
        }
        if let Some(missing) = self.binaries.iter().find(|b| !b.is_file()) {
            return Err(DeployError::PathNotFound(missing.clone()));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(DeployError::ConfigError("no destination directory".to_owned()));
        }
        Ok(())
    }
}

//! Locating and running the external programs a deployment relies on (lconvert, patchelf)

use crate::common::{path_to_string, DeployError};
use crate::dependencies::find_file_in_directory;
use crate::path_list::PathList;
use crate::search_path::SearchPathList;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Directories where Qt tools live below an installation prefix
const TOOL_DIRECTORY_SUFFIXES: [&str; 2] = ["bin", "qt5/bin"];

/// Search path for Qt tools: each prefix, `<prefix>/bin` and `<prefix>/qt5/bin`
pub fn tool_search_path_list(path_prefix_list: &PathList) -> PathList {
    let mut spl = SearchPathList::new();
    spl.set_include_path_prefixes(true);
    spl.set_path_prefix_list(path_prefix_list.clone());
    spl.set_path_suffix_list(&TOOL_DIRECTORY_SUFFIXES);
    spl.path_list().clone()
}

/// An external executable, found once and run as many times as needed
///
/// Runs are blocking and have no timeout.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    path: PathBuf,
}

impl ExternalTool {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }

    /// Find `name` in `search_path`, then in the directories of PATH
    pub fn find(name: &str, search_path: &PathList) -> Result<Self, DeployError> {
        let file_name = executable_file_name(name);
        let mut candidates = search_path.clone();
        for p in &PathList::system_executable_path_list() {
            if !candidates.contains(p) {
                candidates.append_path(p);
            }
        }
        candidates
            .iter()
            .find_map(|dir| find_file_in_directory(&file_name, Path::new(dir), cfg!(windows)))
            .map(|path| {
                tracing::debug!("using {}", path.display());
                Self { path }
            })
            .ok_or_else(|| DeployError::ToolNotFound {
                tool: file_name,
                searched: candidates.join(", "),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the tool to completion; `target` only names the file being worked on in errors
    pub fn run<I, S>(&self, args: I, target: &Path) -> Result<String, DeployError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.path);
        command.args(args);
        tracing::trace!("running {:?}", command);
        let output = command
            .output()
            .map_err(|e| DeployError::io(format!("running {}", path_to_string(&self.path)), e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(DeployError::ToolFailure {
                tool: self.path.clone(),
                target: target.to_owned(),
                message: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn executable_file_name(name: &str) -> String {
    if cfg!(windows) && !name.to_ascii_lowercase().ends_with(".exe") {
        format!("{}.exe", name)
    } else {
        name.to_owned()
    }
}

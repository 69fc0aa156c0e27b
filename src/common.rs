use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Step of a packaging run, used to tell the user where a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployStage {
    ResolveDependencies,
    FindPlugins,
    CopyBinaries,
    CopyLibraries,
    CopyPlugins,
    FindTranslations,
    JoinTranslations,
    WriteQtConf,
    PatchRPath,
}

impl std::fmt::Display for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ResolveDependencies => "resolving dependencies",
            Self::FindPlugins => "finding Qt plugins",
            Self::CopyBinaries => "copying binaries",
            Self::CopyLibraries => "copying libraries",
            Self::CopyPlugins => "copying Qt plugins",
            Self::FindTranslations => "finding translations",
            Self::JoinTranslations => "joining translations",
            Self::WriteQtConf => "writing qt.conf",
            Self::PatchRPath => "patching RPATH",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
pub enum DeployError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Could not find library '{library}' required by {binary}\nSearched in {searched}")]
    DependencyNotResolvable {
        library: String,
        binary: PathBuf,
        searched: String,
    },

    #[error("Could not read object file {path}: {reason}")]
    UnreadableObjectFile { path: PathBuf, reason: String },

    #[error("Could not find tool '{tool}'\nSearched in {searched}")]
    ToolNotFound { tool: String, searched: String },

    #[error("{tool} failed on {target}: {message}")]
    ToolFailure {
        tool: PathBuf,
        target: PathBuf,
        message: String,
    },

    #[error("I/O failure while {step}")]
    IoFailure {
        step: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Patching RPATH failed for {}", format_failures(.failures))]
    RPathPatchFailure { failures: Vec<(PathBuf, String)> },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed while {stage}")]
    StageFailed {
        stage: DeployStage,
        #[source]
        source: Box<DeployError>,
    },
}

impl DeployError {
    pub fn io(step: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoFailure {
            step: step.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn in_stage(self, stage: DeployStage) -> Self {
        Self::StageFailed {
            stage,
            source: Box::new(self),
        }
    }
}

impl From<std::io::Error> for DeployError {
    fn from(e: std::io::Error) -> Self {
        Self::io("accessing the filesystem", e)
    }
}

fn format_failures(failures: &[(PathBuf, String)]) -> String {
    failures
        .iter()
        .map(|(p, reason)| format!("{}: {}", p.display(), reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Lossy conversion for messages and for the string-based path lists
pub fn path_to_string<P: AsRef<Path>>(p: P) -> String {
    p.as_ref().to_string_lossy().into_owned()
}

/// File name component as an owned string, empty if there is none
pub fn file_name_string<P: AsRef<Path>>(p: P) -> String {
    p.as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lexically normalize a path: collapse separators, drop "." and resolve ".."
///
/// The filesystem is not touched, so symlinks are not followed.
/// A ".." above the root of an absolute path is dropped.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    #[cfg(windows)]
    let path = &path.replace('\\', "/");

    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

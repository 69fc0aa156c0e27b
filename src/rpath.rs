//! Prepending a library directory to the RPATH of deployed ELF binaries

use crate::common::{clean_path, path_to_string, DeployError};
use crate::inspector::ElfRunPath;
use crate::path_list::PathList;
use crate::tool::{tool_search_path_list, ExternalTool};
use fs_err as fs;
use std::path::{Component, Path, PathBuf};

const ORIGIN: &str = "$ORIGIN";

/// Run-time search path of `binary`, `None` when it is not an ELF file
pub fn read_run_path(binary: &Path) -> Result<Option<ElfRunPath>, DeployError> {
    let content = fs::read(binary).map_err(|e| DeployError::UnreadableObjectFile {
        path: binary.to_owned(),
        reason: e.to_string(),
    })?;
    if !content.starts_with(&goblin::elf::header::ELFMAG[..]) {
        return Ok(None);
    }
    match goblin::elf::Elf::parse(&content) {
        Ok(elf) => Ok(Some(ElfRunPath::from_elf(&elf))),
        Err(e) => Err(DeployError::UnreadableObjectFile {
            path: binary.to_owned(),
            reason: e.to_string(),
        }),
    }
}

/// Path from `from_dir` to `to_dir`, computed without touching the filesystem
///
/// Both paths must be of the same kind (both absolute or both relative).
pub fn relative_path(from_dir: &Path, to_dir: &Path) -> PathBuf {
    let from = PathBuf::from(clean_path(&path_to_string(from_dir)));
    let to = PathBuf::from(clean_path(&path_to_string(to_dir)));
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();

    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for c in &to[common..] {
        rel.push(c.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

/// `$ORIGIN`-relative entry pointing from `binaries_dir` to `library_dir`
pub fn origin_entry(library_dir: &Path, binaries_dir: &Path) -> String {
    format!(
        "{}/{}",
        ORIGIN,
        path_to_string(relative_path(binaries_dir, library_dir)).replace('\\', "/")
    )
}

fn normalized_entry(entry: &str) -> String {
    let entry = entry.replace("${ORIGIN}", ORIGIN);
    match entry.strip_prefix(ORIGIN) {
        Some(rest) => {
            let rest = clean_path(&format!(".{}", rest));
            format!("{}/{}", ORIGIN, rest)
        }
        None => clean_path(&entry),
    }
}

/// `current` with `entry` in front, or `None` when `entry` already comes first
///
/// An equal entry further down the list is removed.
pub fn prepended_run_path(current: &[String], entry: &str) -> Option<Vec<String>> {
    let wanted = normalized_entry(entry);
    if current.first().map(|e| normalized_entry(e)) == Some(wanted.clone()) {
        return None;
    }
    let mut entries = vec![entry.to_owned()];
    entries.extend(
        current
            .iter()
            .filter(|e| normalized_entry(e) != wanted)
            .cloned(),
    );
    Some(entries)
}

/// Rewrites RPATHs with patchelf
pub struct RPathPatcher {
    patchelf: ExternalTool,
}

impl RPathPatcher {
    /// Find patchelf below the prefixes (`bin/`, `qt5/bin/`), then in PATH
    pub fn find(path_prefix_list: &PathList) -> Result<Self, DeployError> {
        Ok(Self {
            patchelf: ExternalTool::find("patchelf", &tool_search_path_list(path_prefix_list))?,
        })
    }

    pub fn with_tool(patchelf: ExternalTool) -> Self {
        Self { patchelf }
    }

    /// Make every ELF file directly in `binaries_dir` look into `library_dir` first
    ///
    /// Files that are not ELF are skipped. Each binary is patched
    /// independently; failures are collected and reported together once all
    /// binaries were tried. Returns the binaries that were rewritten.
    pub fn prepend_path_for_binaries(
        &self,
        library_dir: &Path,
        binaries_dir: &Path,
    ) -> Result<Vec<PathBuf>, DeployError> {
        let entry = origin_entry(library_dir, binaries_dir);
        let mut files: Vec<PathBuf> = fs::read_dir(binaries_dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        let mut patched = Vec::new();
        let mut failures = Vec::new();
        for file in files {
            match self.prepend_path(&entry, &file) {
                Ok(true) => patched.push(file),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("{}", e);
                    failures.push((file, e.to_string()));
                }
            }
        }
        if failures.is_empty() {
            Ok(patched)
        } else {
            Err(DeployError::RPathPatchFailure { failures })
        }
    }

    fn prepend_path(&self, entry: &str, binary: &Path) -> Result<bool, DeployError> {
        let Some(run_path) = read_run_path(binary)? else {
            return Ok(false);
        };
        let Some(entries) = prepended_run_path(&run_path.entries, entry) else {
            tracing::debug!("{} already has {} first", binary.display(), entry);
            return Ok(false);
        };
        let new_run_path = entries.join(":");
        tracing::info!("setting RPATH of {} to {}", binary.display(), new_run_path);
        self.patchelf.run(
            [
                std::ffi::OsStr::new("--set-rpath"),
                std::ffi::OsStr::new(&new_run_path),
                binary.as_os_str(),
            ],
            binary,
        )?;
        Ok(true)
    }
}

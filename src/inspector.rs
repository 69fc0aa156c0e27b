//! Reading the direct dependencies of a binary through goblin

use crate::common::{clean_path, path_to_string, DeployError};
use crate::library::OperatingSystem;
use fs_err as fs;
use std::path::{Path, PathBuf};

/// Reads the libraries a binary directly depends on
///
/// Each returned entry is either a bare file name, which must be searched,
/// or an absolute path that the object format already resolved.
pub trait ObjectFileInspector {
    /// Operating system of the binaries this inspector understands
    fn operating_system(&self) -> OperatingSystem;

    fn direct_dependencies(&self, binary: &Path) -> Result<Vec<String>, DeployError>;
}

/// Pick the inspector for binaries built for `operating_system`
pub fn inspector_for(operating_system: OperatingSystem) -> Box<dyn ObjectFileInspector> {
    match operating_system {
        OperatingSystem::Linux => Box::new(ElfInspector),
        OperatingSystem::Windows => Box::new(PeInspector),
    }
}

fn read_object_file(binary: &Path) -> Result<Vec<u8>, DeployError> {
    fs::read(binary).map_err(|e| DeployError::UnreadableObjectFile {
        path: binary.to_owned(),
        reason: e.to_string(),
    })
}

fn parse_error(binary: &Path, e: goblin::error::Error) -> DeployError {
    DeployError::UnreadableObjectFile {
        path: binary.to_owned(),
        reason: e.to_string(),
    }
}

/// Run-time search path embedded in an ELF file
///
/// DT_RUNPATH wins over DT_RPATH when both are present, as the loader does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElfRunPath {
    pub entries: Vec<String>,
    pub is_runpath: bool,
}

impl ElfRunPath {
    pub(crate) fn from_elf(elf: &goblin::elf::Elf) -> Self {
        let (raw, is_runpath) = if !elf.runpaths.is_empty() {
            (&elf.runpaths, true)
        } else {
            (&elf.rpaths, false)
        };
        Self {
            entries: raw
                .iter()
                .flat_map(|r| r.split(':'))
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            is_runpath,
        }
    }

    /// Directories with `$ORIGIN` replaced by the directory of the binary
    pub fn expanded(&self, binary: &Path) -> Vec<PathBuf> {
        let origin = match binary.parent() {
            Some(p) if !p.as_os_str().is_empty() => path_to_string(p),
            _ => ".".to_owned(),
        };
        self.entries
            .iter()
            .map(|e| e.replace("${ORIGIN}", &origin).replace("$ORIGIN", &origin))
            .map(|e| PathBuf::from(clean_path(&e)))
            .collect()
    }
}

/// Inspector for ELF binaries
///
/// DT_NEEDED entries found in the binary's own run-time search path are
/// reported as absolute paths, the others as bare names.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfInspector;

impl ObjectFileInspector for ElfInspector {
    fn operating_system(&self) -> OperatingSystem {
        OperatingSystem::Linux
    }

    fn direct_dependencies(&self, binary: &Path) -> Result<Vec<String>, DeployError> {
        let content = read_object_file(binary)?;
        let elf = match goblin::Object::parse(&content).map_err(|e| parse_error(binary, e))? {
            goblin::Object::Elf(elf) => elf,
            _ => {
                return Err(DeployError::UnreadableObjectFile {
                    path: binary.to_owned(),
                    reason: "not an ELF file".to_owned(),
                })
            }
        };
        let run_path = ElfRunPath::from_elf(&elf).expanded(binary);

        Ok(elf
            .libraries
            .iter()
            .map(|needed| {
                if needed.contains('/') {
                    return (*needed).to_owned();
                }
                run_path
                    .iter()
                    .map(|dir| dir.join(needed))
                    .find(|candidate| candidate.is_file())
                    .map(path_to_string)
                    .unwrap_or_else(|| (*needed).to_owned())
            })
            .collect())
    }
}

/// Inspector for PE binaries: import table DLL names, always bare
#[derive(Debug, Default, Clone, Copy)]
pub struct PeInspector;

impl ObjectFileInspector for PeInspector {
    fn operating_system(&self) -> OperatingSystem {
        OperatingSystem::Windows
    }

    fn direct_dependencies(&self, binary: &Path) -> Result<Vec<String>, DeployError> {
        let content = read_object_file(binary)?;
        match goblin::Object::parse(&content).map_err(|e| parse_error(binary, e))? {
            goblin::Object::PE(pe) => Ok(pe.libraries.iter().map(|l| l.to_string()).collect()),
            _ => Err(DeployError::UnreadableObjectFile {
                path: binary.to_owned(),
                reason: "not a PE file".to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_unreadable() {
        let r = ElfInspector.direct_dependencies(Path::new("/nonexistent/binary"));
        assert!(matches!(r, Err(DeployError::UnreadableObjectFile { .. })));
    }

    #[test]
    fn text_file_is_unreadable() -> Result<(), DeployError> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("notes.txt");
        fs::write(&p, "just some text, long enough to not be mistaken for a header")?;
        assert!(matches!(
            ElfInspector.direct_dependencies(&p),
            Err(DeployError::UnreadableObjectFile { .. })
        ));
        assert!(matches!(
            PeInspector.direct_dependencies(&p),
            Err(DeployError::UnreadableObjectFile { .. })
        ));
        Ok(())
    }

    #[test]
    fn origin_is_expanded() {
        let rp = ElfRunPath {
            entries: vec!["$ORIGIN/../lib".to_owned(), "${ORIGIN}".to_owned(), "/opt/x".to_owned()],
            is_runpath: true,
        };
        assert_eq!(
            rp.expanded(Path::new("/app/bin/tool")),
            vec![PathBuf::from("/app/lib"), PathBuf::from("/app/bin"), PathBuf::from("/opt/x")]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_executable_has_elf_dependencies() -> Result<(), DeployError> {
        let exe = std::env::current_exe()?;
        assert_eq!(OperatingSystem::from_binary(&exe), Some(OperatingSystem::Linux));
        let deps = inspector_for(OperatingSystem::Linux).direct_dependencies(&exe)?;
        assert!(deps.iter().any(|d| d.contains("libc.so")));
        Ok(())
    }
}

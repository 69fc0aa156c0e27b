use crate::common::{file_name_string, path_to_string, DeployError};
use crate::inspector::{inspector_for, ObjectFileInspector};
use crate::library::{LibraryInfo, LibraryInfoList, LibraryName, OperatingSystem};
use crate::path_list::PathList;
use crate::search_path::SearchPathList;
use std::path::{Path, PathBuf};

/// Working set of one resolution: libraries found so far and binaries still to inspect
#[derive(Debug, Default)]
struct DependencyResolutionState {
    libraries: LibraryInfoList,
    pending: Vec<PathBuf>,
}

/// Finds the transitive closure of the shared libraries a binary needs
///
/// Bare dependency names are searched in the directory of the binary that
/// requires them, then in the search-first paths (expanded with their suffixes),
/// then in the system library paths.
/// Dependencies are resolved depth-first; a library is inspected only once.
pub struct BinaryDependencies {
    inspector: Box<dyn ObjectFileInspector>,
    binary_file: Option<PathBuf>,
    search_first_path_list: PathList,
    search_first_path_suffix_list: Vec<String>,
    system_library_path_list: PathList,
    dependencies: LibraryInfoList,
    last_error: Option<DeployError>,
}

impl BinaryDependencies {
    /// Resolver for binaries of the host operating system
    pub fn new() -> Self {
        Self::for_operating_system(OperatingSystem::current())
    }

    pub fn for_operating_system(operating_system: OperatingSystem) -> Self {
        Self::with_inspector(inspector_for(operating_system))
    }

    pub fn with_inspector(inspector: Box<dyn ObjectFileInspector>) -> Self {
        Self {
            inspector,
            binary_file: None,
            search_first_path_list: PathList::new(),
            search_first_path_suffix_list: Vec::new(),
            system_library_path_list: PathList::system_library_path_list(),
            dependencies: LibraryInfoList::new(),
            last_error: None,
        }
    }

    pub fn operating_system(&self) -> OperatingSystem {
        self.inspector.operating_system()
    }

    /// Directories searched before the system ones
    pub fn set_library_search_first_path_list(&mut self, path_list: PathList) {
        self.search_first_path_list = path_list;
    }

    /// Suffixes appended to each search-first path (e.g. `lib`, `bin`, `qt5/lib`)
    pub fn set_library_search_first_path_suffix_list<S: AsRef<str>>(&mut self, suffixes: &[S]) {
        self.search_first_path_suffix_list =
            suffixes.iter().map(|s| s.as_ref().to_owned()).collect();
    }

    /// Replace the system library directories searched last
    pub fn set_system_library_path_list(&mut self, path_list: PathList) {
        self.system_library_path_list = path_list;
    }

    pub fn set_binary_file<P: AsRef<Path>>(&mut self, binary_file: P) {
        self.binary_file = Some(binary_file.as_ref().to_owned());
    }

    /// Directory of the current binary followed by the expanded search-first paths
    pub fn library_search_path_list(&self) -> PathList {
        self.library_search_path_list_for(self.binary_file.as_deref())
    }

    fn library_search_path_list_for(&self, binary: Option<&Path>) -> PathList {
        let mut search_first = SearchPathList::new();
        search_first.set_include_path_prefixes(true);
        search_first.set_path_prefix_list(self.search_first_path_list.clone());
        search_first.set_path_suffix_list(&self.search_first_path_suffix_list);

        let mut list = PathList::new();
        if let Some(dir) = binary.and_then(Path::parent) {
            if !dir.as_os_str().is_empty() {
                list.append_path(&path_to_string(dir));
            }
        }
        for p in search_first.path_list() {
            if !list.contains(p) {
                list.append_path(p);
            }
        }
        list
    }

    /// Resolve the dependencies of the binary given to [`Self::set_binary_file`]
    pub fn find_dependencies(&mut self) -> Result<(), DeployError> {
        let binary = self.binary_file.clone().ok_or_else(|| {
            DeployError::ConfigError("no binary file set to find dependencies for".to_owned())
        })?;
        self.find_dependencies_of_binaries(&[binary])
    }

    pub fn find_dependencies_of<P: AsRef<Path>>(&mut self, binary: P) -> Result<(), DeployError> {
        self.set_binary_file(binary.as_ref());
        self.find_dependencies()
    }

    /// Resolve the dependencies of several libraries into one closure
    pub fn find_dependencies_of_libraries(
        &mut self,
        libraries: &LibraryInfoList,
    ) -> Result<(), DeployError> {
        self.find_dependencies_of_binaries(&libraries.absolute_file_paths())
    }

    /// Resolve the dependencies of several binaries into one closure
    ///
    /// A failing binary does not stop the others; the first error is returned
    /// and the libraries found for all binaries stay available.
    pub fn find_dependencies_of_binaries(&mut self, binaries: &[PathBuf]) -> Result<(), DeployError> {
        self.dependencies.clear();
        self.last_error = None;
        if let Some(first) = binaries.first() {
            self.binary_file = Some(first.clone());
        }

        let mut state = DependencyResolutionState::default();
        let mut first_error: Option<DeployError> = None;
        for binary in binaries {
            tracing::debug!("searching dependencies of {}", binary.display());
            if let Err(e) = self.resolve_binary(binary, &mut state) {
                tracing::warn!("{}", e);
                state.pending.clear();
                first_error.get_or_insert(e);
            }
        }
        self.dependencies = state.libraries;

        match first_error {
            Some(e) => {
                self.last_error = Some(e.clone());
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn resolve_binary(
        &self,
        binary: &Path,
        state: &mut DependencyResolutionState,
    ) -> Result<(), DeployError> {
        let operating_system = self.operating_system();
        state.pending.push(binary.to_owned());

        while let Some(current) = state.pending.pop() {
            let direct_dependencies = self.inspector.direct_dependencies(&current)?;
            let search_path = self.library_search_path_list_for(Some(&current));

            for dependency in direct_dependencies {
                let name = LibraryName::new(&dependency, operating_system);
                if name.is_excluded_from_deployment() || state.libraries.contains(&name) {
                    continue;
                }
                let path = if Path::new(&dependency).is_absolute() {
                    PathBuf::from(&dependency)
                } else {
                    self.search_library(&name, &search_path)
                        .ok_or_else(|| DeployError::DependencyNotResolvable {
                            library: dependency.clone(),
                            binary: current.clone(),
                            searched: search_path
                                .iter()
                                .chain(self.system_library_path_list.iter())
                                .cloned()
                                .collect::<Vec<_>>()
                                .join(", "),
                        })?
                };
                tracing::trace!("{} => {}", dependency, path.display());
                state.libraries.add_library(LibraryInfo::new(name, path.clone()));
                state.pending.push(path);
            }
        }
        Ok(())
    }

    fn search_library(&self, name: &LibraryName, search_path: &PathList) -> Option<PathBuf> {
        let case_insensitive = name.operating_system().is_case_insensitive();
        search_path
            .iter()
            .chain(self.system_library_path_list.iter())
            .find_map(|dir| find_file_in_directory(name.full_name(), Path::new(dir), case_insensitive))
    }

    /// Libraries found by the last resolution, complete or not
    pub fn dependencies(&self) -> &LibraryInfoList {
        &self.dependencies
    }

    pub fn last_error(&self) -> Option<&DeployError> {
        self.last_error.as_ref()
    }
}

impl Default for BinaryDependencies {
    fn default() -> Self {
        Self::new()
    }
}

/// Look for `file_name` directly inside `directory`
///
/// A missing directory is not an error, it is just skipped.
pub(crate) fn find_file_in_directory(
    file_name: &str,
    directory: &Path,
    case_insensitive: bool,
) -> Option<PathBuf> {
    if !directory.is_dir() {
        tracing::trace!("{}", DeployError::PathNotFound(directory.to_owned()));
        return None;
    }
    if !case_insensitive {
        let candidate = directory.join(file_name);
        return candidate.is_file().then_some(candidate);
    }
    let lower_file_name = file_name.to_lowercase();
    std::fs::read_dir(directory)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.metadata().map_or(false, |m| m.is_file()))
        .find(|entry| file_name_string(entry.path()).to_lowercase() == lower_file_name)
        .map(|entry| entry.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs_err as fs;
    use std::collections::{HashMap, HashSet};

    /// Inspector answering from a fixed table of binary -> dependencies
    struct FakeInspector {
        operating_system: OperatingSystem,
        table: HashMap<PathBuf, Vec<String>>,
    }

    impl FakeInspector {
        fn new() -> Self {
            Self {
                operating_system: OperatingSystem::Linux,
                table: HashMap::new(),
            }
        }

        fn with(mut self, binary: &Path, dependencies: &[&str]) -> Self {
            self.table.insert(
                binary.to_owned(),
                dependencies.iter().map(|d| d.to_string()).collect(),
            );
            self
        }
    }

    impl ObjectFileInspector for FakeInspector {
        fn operating_system(&self) -> OperatingSystem {
            self.operating_system
        }

        fn direct_dependencies(&self, binary: &Path) -> Result<Vec<String>, DeployError> {
            self.table
                .get(binary)
                .cloned()
                .ok_or_else(|| DeployError::UnreadableObjectFile {
                    path: binary.to_owned(),
                    reason: "unknown to the fake inspector".to_owned(),
                })
        }
    }

    fn touch(path: &Path) -> Result<(), DeployError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, b"")?;
        Ok(())
    }

    fn resolver(inspector: FakeInspector) -> BinaryDependencies {
        let mut bd = BinaryDependencies::with_inspector(Box::new(inspector));
        bd.set_system_library_path_list(PathList::new());
        bd
    }

    fn found_names(bd: &BinaryDependencies) -> HashSet<String> {
        bd.dependencies()
            .iter()
            .map(|l| l.library_name().full_name().to_owned())
            .collect()
    }

    #[test]
    fn shared_dependency_is_listed_once() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let app = root.path().join("bin/app");
        let lib_dir = root.path().join("lib");
        let (a, b, c) = (lib_dir.join("libA.so"), lib_dir.join("libB.so"), lib_dir.join("libC.so"));
        for p in [&app, &a, &b, &c] {
            touch(p)?;
        }
        let inspector = FakeInspector::new()
            .with(&app, &["libA.so", "libB.so", "libC.so"])
            .with(&a, &["libC.so"])
            .with(&b, &[])
            .with(&c, &[]);
        let mut bd = resolver(inspector);
        bd.set_library_search_first_path_list([path_to_string(root.path())].iter().collect());
        bd.set_library_search_first_path_suffix_list(&["lib"]);

        bd.find_dependencies_of(&app)?;

        assert_eq!(bd.dependencies().len(), 3);
        let expected: HashSet<String> = ["libA.so", "libB.so", "libC.so"].iter().map(|s| s.to_string()).collect();
        assert_eq!(found_names(&bd), expected);
        assert!(bd.last_error().is_none());
        Ok(())
    }

    #[test]
    fn absolute_and_searched_dependencies() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let app = root.path().join("app");
        let prefix = root.path().join("opt/x");
        let lib_b = prefix.join("lib/libB.so");
        touch(&app)?;
        touch(&lib_b)?;
        let lib_a = PathBuf::from("/usr/lib/libA.so");
        let inspector = FakeInspector::new()
            .with(&app, &["/usr/lib/libA.so", "libB.so"])
            .with(&lib_a, &[])
            .with(&lib_b, &[]);
        let mut bd = resolver(inspector);
        bd.set_library_search_first_path_list([path_to_string(&prefix)].iter().collect());
        bd.set_library_search_first_path_suffix_list(&["lib"]);

        bd.find_dependencies_of(&app)?;

        let found: Vec<(String, PathBuf)> = bd
            .dependencies()
            .iter()
            .map(|l| (l.library_name().full_name().to_owned(), l.absolute_file_path().to_owned()))
            .collect();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&("libA.so".to_owned(), lib_a.clone())));
        assert!(found.contains(&("libB.so".to_owned(), lib_b.clone())));
        Ok(())
    }

    #[test]
    fn missing_dependency_fails_and_keeps_partial_result() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let app = root.path().join("app");
        let lib_a = root.path().join("libA.so");
        touch(&app)?;
        touch(&lib_a)?;
        let inspector = FakeInspector::new()
            .with(&app, &["libA.so", "libDoesNotExist.so"])
            .with(&lib_a, &[]);
        let mut bd = resolver(inspector);
        bd.set_library_search_first_path_list(["/nonexistent/prefix"].iter().collect());
        bd.set_library_search_first_path_suffix_list(&["lib"]);

        let r = bd.find_dependencies_of(&app);

        assert!(matches!(r, Err(DeployError::DependencyNotResolvable { ref library, .. }) if library == "libDoesNotExist.so"));
        assert!(matches!(bd.last_error(), Some(DeployError::DependencyNotResolvable { .. })));
        assert_eq!(bd.dependencies().len(), 1);
        Ok(())
    }

    #[test]
    fn unreadable_binary_fails() {
        let mut bd = resolver(FakeInspector::new());
        let r = bd.find_dependencies_of("/nonexistent/app");
        assert!(matches!(r, Err(DeployError::UnreadableObjectFile { .. })));
        assert!(bd.dependencies().is_empty());
    }

    #[test]
    fn failing_binary_does_not_discard_others() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let good = root.path().join("good");
        let bad = root.path().join("bad");
        let lib = root.path().join("libgood.so");
        for p in [&good, &bad, &lib] {
            touch(p)?;
        }
        let inspector = FakeInspector::new()
            .with(&bad, &["libmissing.so"])
            .with(&good, &["libgood.so"])
            .with(&lib, &[]);
        let mut bd = resolver(inspector);

        let r = bd.find_dependencies_of_binaries(&[bad.clone(), good.clone()]);

        assert!(matches!(r, Err(DeployError::DependencyNotResolvable { ref binary, .. }) if binary == &bad));
        assert_eq!(bd.dependencies().len(), 1);
        Ok(())
    }

    #[test]
    fn search_path_starts_with_binary_directory_and_is_recomputed() {
        let mut bd = resolver(FakeInspector::new());
        bd.set_binary_file("/app/bin/tool");
        bd.set_library_search_first_path_list(["/opt/qt"].iter().collect());
        bd.set_library_search_first_path_suffix_list(&["lib", "qt5/lib"]);
        assert_eq!(
            bd.library_search_path_list().to_string_list(),
            vec!["/app/bin", "/opt/qt", "/opt/qt/lib", "/opt/qt/qt5/lib"]
        );
        bd.set_binary_file("/other/tool");
        assert_eq!(
            bd.library_search_path_list().iter().next().map(String::as_str),
            Some("/other")
        );
    }

    #[test]
    fn cycles_terminate() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let app = root.path().join("app");
        let a = root.path().join("libA.so");
        let b = root.path().join("libB.so");
        for p in [&app, &a, &b] {
            touch(p)?;
        }
        let inspector = FakeInspector::new()
            .with(&app, &["libA.so"])
            .with(&a, &["libB.so"])
            .with(&b, &["libA.so"]);
        let mut bd = resolver(inspector);
        bd.find_dependencies_of(&app)?;
        assert_eq!(bd.dependencies().len(), 2);
        Ok(())
    }

    #[test]
    fn windows_lookup_is_case_insensitive() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let app = root.path().join("app.exe");
        let dll = root.path().join("Qt5Core.dll");
        touch(&app)?;
        touch(&dll)?;
        let mut inspector = FakeInspector::new()
            .with(&app, &["QT5CORE.DLL", "KERNEL32.dll"])
            .with(&dll, &[]);
        inspector.operating_system = OperatingSystem::Windows;
        let mut bd = resolver(inspector);
        bd.find_dependencies_of(&app)?;
        assert_eq!(bd.dependencies().len(), 1);
        assert_eq!(
            bd.dependencies().first().map(|l| file_name_string(l.absolute_file_path())),
            Some("Qt5Core.dll".to_owned())
        );
        Ok(())
    }

    #[test]
    fn windows_api_sets_are_not_searched() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let app = root.path().join("app.exe");
        touch(&app)?;
        let mut inspector = FakeInspector::new().with(
            &app,
            &["api-ms-win-crt-runtime-l1-1-0.dll", "ext-ms-win-ntuser-window-l1-1-0.dll", "KERNEL32.dll"],
        );
        inspector.operating_system = OperatingSystem::Windows;
        let mut bd = resolver(inspector);
        bd.find_dependencies_of(&app)?;
        assert!(bd.dependencies().is_empty());
        Ok(())
    }

    #[test]
    fn each_resolution_starts_from_scratch() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let bad = root.path().join("bad");
        let good = root.path().join("good");
        let lib_a = root.path().join("libA.so");
        let lib_b = root.path().join("libB.so");
        for p in [&bad, &good, &lib_a, &lib_b] {
            touch(p)?;
        }
        let inspector = FakeInspector::new()
            .with(&bad, &["libA.so", "libmissing.so"])
            .with(&good, &["libB.so"])
            .with(&lib_a, &[])
            .with(&lib_b, &[]);
        let mut bd = resolver(inspector);

        assert!(bd.find_dependencies_of(&bad).is_err());
        assert!(bd.last_error().is_some());
        assert_eq!(bd.dependencies().len(), 1);

        bd.find_dependencies_of(&good)?;
        assert!(bd.last_error().is_none());
        let names: Vec<String> = bd
            .dependencies()
            .iter()
            .map(|l| l.library_name().full_name().to_owned())
            .collect();
        assert_eq!(names, vec!["libB.so"]);
        Ok(())
    }
}

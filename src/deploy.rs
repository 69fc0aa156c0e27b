//! Packaging run: resolve, copy, translate and patch, one stage after the other

use crate::common::{file_name_string, DeployError, DeployStage};
use crate::dependencies::BinaryDependencies;
use crate::inspector::{inspector_for, ObjectFileInspector};
use crate::library::{LibraryInfoList, OperatingSystem};
use crate::path_list::PathList;
use crate::qt::{self, QtPluginInfoList};
use crate::query::DeployQuery;
use crate::rpath::RPathPatcher;
use crate::translation::{find_all_translations_in_directory, TranslationInfoList, TranslationMerger};
use fs_err as fs;
use serde::Serialize;
use std::path::{Path, PathBuf};

const PLUGINS_DIRECTORY: &str = "plugins";
const TRANSLATIONS_DIRECTORY: &str = "translations";

const QT_CONF: &str = "[Paths]\nPrefix = .\nPlugins = plugins\nTranslations = translations\n";

/// What a packaging run produced, all paths inside the destination
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeployReport {
    pub destination: PathBuf,
    pub operating_system: Option<OperatingSystem>,
    pub binaries: Vec<PathBuf>,
    pub libraries: Vec<PathBuf>,
    pub plugins: Vec<PathBuf>,
    pub translations: Vec<PathBuf>,
    pub qt_conf: Option<PathBuf>,
    pub rpath_patched: Vec<PathBuf>,
}

/// Runs a [`DeployQuery`]
///
/// Binaries and libraries are copied directly into the destination, plugins
/// into `plugins/<directory>/` and translations into `translations/` below it.
///
/// The collaborators are looked up when the run needs them, unless they
/// were given beforehand.
#[derive(Default)]
pub struct Deployer {
    inspector: Option<Box<dyn ObjectFileInspector>>,
    system_library_path_list: Option<PathList>,
    translation_merger: Option<TranslationMerger>,
    rpath_patcher: Option<RPathPatcher>,
}

impl Deployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inspector(mut self, inspector: Box<dyn ObjectFileInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn with_system_library_path_list(mut self, path_list: PathList) -> Self {
        self.system_library_path_list = Some(path_list);
        self
    }

    pub fn with_translation_merger(mut self, merger: TranslationMerger) -> Self {
        self.translation_merger = Some(merger);
        self
    }

    pub fn with_rpath_patcher(mut self, patcher: RPathPatcher) -> Self {
        self.rpath_patcher = Some(patcher);
        self
    }

    /// Run every stage in order, stopping at the first failing one
    ///
    /// Files produced by the stages that completed stay in the destination.
    pub fn run(mut self, query: &DeployQuery) -> Result<DeployReport, DeployError> {
        query.validate()?;

        let operating_system = match &self.inspector {
            Some(inspector) => inspector.operating_system(),
            None => query.target_operating_system(),
        };
        let inspector = self
            .inspector
            .take()
            .unwrap_or_else(|| inspector_for(operating_system));
        let destination = query.destination.as_path();
        let mut report = DeployReport {
            destination: query.destination.clone(),
            operating_system: Some(operating_system),
            ..DeployReport::default()
        };

        let mut resolver = BinaryDependencies::with_inspector(inspector);
        resolver.set_library_search_first_path_list(query.search_first_path_list.clone());
        resolver.set_library_search_first_path_suffix_list(&query.path_suffixes);
        if let Some(path_list) = self.system_library_path_list.take() {
            resolver.set_system_library_path_list(path_list);
        }

        tracing::info!("{}", DeployStage::ResolveDependencies);
        resolver
            .find_dependencies_of_binaries(&query.binaries)
            .map_err(|e| e.in_stage(DeployStage::ResolveDependencies))?;
        let mut libraries = resolver.dependencies().clone();
        tracing::info!("found {} libraries", libraries.len());

        tracing::info!("{}", DeployStage::FindPlugins);
        let plugins = find_plugins(&mut resolver, &mut libraries, &query.search_first_path_list)
            .map_err(|e| e.in_stage(DeployStage::FindPlugins))?;

        tracing::info!("{}", DeployStage::CopyBinaries);
        report.binaries = copy_files_to_directory(&query.binaries, destination)
            .map_err(|e| e.in_stage(DeployStage::CopyBinaries))?;

        tracing::info!("{}", DeployStage::CopyLibraries);
        report.libraries = copy_files_to_directory(&libraries.absolute_file_paths(), destination)
            .map_err(|e| e.in_stage(DeployStage::CopyLibraries))?;

        tracing::info!("{}", DeployStage::CopyPlugins);
        report.plugins = copy_plugins(&plugins, &destination.join(PLUGINS_DIRECTORY))
            .map_err(|e| e.in_stage(DeployStage::CopyPlugins))?;

        if query.language_suffixes.is_empty() {
            tracing::debug!("no language requested, skipping translations");
        } else {
            tracing::info!("{}", DeployStage::FindTranslations);
            let translations = find_translations(query, &libraries)
                .map_err(|e| e.in_stage(DeployStage::FindTranslations))?;

            if translations.is_empty() {
                tracing::warn!(
                    "no translation found for {}",
                    query.language_suffixes.join(", ")
                );
            } else {
                tracing::info!("{}", DeployStage::JoinTranslations);
                report.translations = self
                    .join_translations(query, &translations, &destination.join(TRANSLATIONS_DIRECTORY))
                    .map_err(|e| e.in_stage(DeployStage::JoinTranslations))?;
            }
        }

        tracing::info!("{}", DeployStage::WriteQtConf);
        report.qt_conf = Some(
            write_qt_conf(destination).map_err(|e| e.in_stage(DeployStage::WriteQtConf))?,
        );

        if operating_system == OperatingSystem::Linux && query.patch_rpath {
            tracing::info!("{}", DeployStage::PatchRPath);
            report.rpath_patched = self
                .patch_rpath(query, destination, &report.plugins)
                .map_err(|e| e.in_stage(DeployStage::PatchRPath))?;
        }

        Ok(report)
    }

    fn join_translations(
        &mut self,
        query: &DeployQuery,
        translations: &TranslationInfoList,
        destination_dir: &Path,
    ) -> Result<Vec<PathBuf>, DeployError> {
        let merger = match self.translation_merger.take() {
            Some(merger) => merger,
            None => TranslationMerger::find(&query.search_first_path_list)?,
        };
        merger.join_translations(translations, &query.binaries, destination_dir)
    }

    fn patch_rpath(
        &mut self,
        query: &DeployQuery,
        destination: &Path,
        plugins: &[PathBuf],
    ) -> Result<Vec<PathBuf>, DeployError> {
        let patcher = match self.rpath_patcher.take() {
            Some(patcher) => patcher,
            None => RPathPatcher::find(&query.search_first_path_list)?,
        };

        let mut directories = vec![destination.to_owned()];
        for dir in plugins.iter().filter_map(|p| p.parent()) {
            if !directories.iter().any(|d| d == dir) {
                directories.push(dir.to_owned());
            }
        }

        let mut patched = Vec::new();
        let mut failures = Vec::new();
        for dir in directories {
            match patcher.prepend_path_for_binaries(destination, &dir) {
                Ok(p) => patched.extend(p),
                Err(DeployError::RPathPatchFailure { failures: f }) => failures.extend(f),
                Err(e) => return Err(e),
            }
        }
        if failures.is_empty() {
            Ok(patched)
        } else {
            Err(DeployError::RPathPatchFailure { failures })
        }
    }
}

/// Run a packaging with collaborators found on the host
pub fn deploy(query: &DeployQuery) -> Result<DeployReport, DeployError> {
    Deployer::new().run(query)
}

/// Plugins of the Qt libraries, their own dependencies added to `libraries`
fn find_plugins(
    resolver: &mut BinaryDependencies,
    libraries: &mut LibraryInfoList,
    path_prefix_list: &PathList,
) -> Result<QtPluginInfoList, DeployError> {
    let plugins = qt::find_libraries_plugins(libraries, path_prefix_list)?;
    if plugins.is_empty() {
        return Ok(plugins);
    }
    tracing::info!("found {} plugins", plugins.len());
    resolver.find_dependencies_of_libraries(&plugins.libraries())?;
    libraries.add_libraries(resolver.dependencies());
    Ok(plugins)
}

/// The application's translations and Qt's own, for the requested languages
fn find_translations(
    query: &DeployQuery,
    libraries: &LibraryInfoList,
) -> Result<TranslationInfoList, DeployError> {
    let mut translations = TranslationInfoList::new();
    for dir in &query.translation_dirs {
        let found = find_all_translations_in_directory(dir)?;
        translations.add_translations(&found.translations_for_file_suffixes(&query.language_suffixes));
    }

    let modules = qt::qt_modules(libraries);
    if !modules.is_empty() {
        match qt::find_qt_translations(&modules, &query.language_suffixes, &query.search_first_path_list) {
            Ok(found) => translations.add_translations(&found),
            Err(DeployError::PathNotFound(p)) => {
                tracing::warn!("skipping Qt translations: {}", p.display())
            }
            Err(e) => return Err(e),
        }
    }
    Ok(translations)
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copy `source` into `directory`, overwriting; nothing is done when both are the same file
fn copy_file_to_directory(source: &Path, directory: &Path) -> Result<PathBuf, DeployError> {
    let destination = directory.join(file_name_string(source));
    if is_same_file(source, &destination) {
        tracing::debug!("{} is already in place", destination.display());
        return Ok(destination);
    }
    tracing::debug!("copying {} to {}", source.display(), directory.display());
    // a previous copy of a read-only file cannot be overwritten
    if fs::symlink_metadata(&destination).is_ok() {
        fs::remove_file(&destination)
            .map_err(|e| DeployError::io(format!("replacing {}", destination.display()), e))?;
    }
    fs::copy(source, &destination)
        .map_err(|e| DeployError::io(format!("copying {}", source.display()), e))?;
    Ok(destination)
}

fn copy_files_to_directory(sources: &[PathBuf], directory: &Path) -> Result<Vec<PathBuf>, DeployError> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(directory)
        .map_err(|e| DeployError::io(format!("creating {}", directory.display()), e))?;
    sources
        .iter()
        .map(|s| copy_file_to_directory(s, directory))
        .collect()
}

fn copy_plugins(plugins: &QtPluginInfoList, plugins_root: &Path) -> Result<Vec<PathBuf>, DeployError> {
    let mut copied = Vec::new();
    for plugin in plugins.iter() {
        let dir = plugins_root.join(&plugin.directory_name);
        copied.extend(copy_files_to_directory(
            &[plugin.library.absolute_file_path().to_owned()],
            &dir,
        )?);
    }
    Ok(copied)
}

fn write_qt_conf(destination: &Path) -> Result<PathBuf, DeployError> {
    fs::create_dir_all(destination)
        .map_err(|e| DeployError::io(format!("creating {}", destination.display()), e))?;
    let path = destination.join("qt.conf");
    fs::write(&path, QT_CONF).map_err(|e| DeployError::io("writing qt.conf", e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::path_to_string;
    use crate::tool::ExternalTool;
    use std::collections::HashMap;

    /// Inspector answering from a table of file name -> dependencies
    struct TableInspector {
        table: HashMap<String, Vec<String>>,
    }

    impl TableInspector {
        fn new(entries: &[(&str, &[&str])]) -> Box<Self> {
            Box::new(Self {
                table: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                    .collect(),
            })
        }
    }

    impl ObjectFileInspector for TableInspector {
        fn operating_system(&self) -> OperatingSystem {
            OperatingSystem::Linux
        }

        fn direct_dependencies(&self, binary: &Path) -> Result<Vec<String>, DeployError> {
            self.table
                .get(&file_name_string(binary))
                .cloned()
                .ok_or_else(|| DeployError::UnreadableObjectFile {
                    path: binary.to_owned(),
                    reason: "unknown".to_owned(),
                })
        }
    }

    fn touch(path: &Path) -> Result<(), DeployError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, file_name_string(path))?;
        Ok(())
    }

    fn query(root: &Path) -> DeployQuery {
        DeployQuery {
            binaries: vec![root.join("src/app")],
            destination: root.join("bundle"),
            search_first_path_list: [path_to_string(root.join("src"))].iter().collect(),
            path_suffixes: vec!["lib".to_owned()],
            operating_system: Some(OperatingSystem::Linux),
            patch_rpath: false,
            ..DeployQuery::default()
        }
    }

    fn deployer(inspector: Box<TableInspector>) -> Deployer {
        Deployer::new()
            .with_inspector(inspector)
            .with_system_library_path_list(PathList::new())
    }

    #[test]
    fn application_and_libraries_are_bundled() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        touch(&root.path().join("src/app"))?;
        touch(&root.path().join("src/lib/libfoo.so.1"))?;
        touch(&root.path().join("src/lib/libbar.so"))?;
        let inspector = TableInspector::new(&[
            ("app", &["libfoo.so.1", "libc.so.6"]),
            ("libfoo.so.1", &["libbar.so"]),
            ("libbar.so", &[]),
        ]);

        let report = deployer(inspector).run(&query(root.path()))?;

        let bundle = root.path().join("bundle");
        assert_eq!(report.binaries, vec![bundle.join("app")]);
        assert_eq!(
            report.libraries,
            vec![bundle.join("libfoo.so.1"), bundle.join("libbar.so")]
        );
        assert!(report.plugins.is_empty());
        assert!(report.translations.is_empty());
        assert_eq!(fs::read_to_string(bundle.join("libbar.so"))?, "libbar.so");
        assert_eq!(fs::read_to_string(bundle.join("qt.conf"))?, QT_CONF);
        Ok(())
    }

    #[test]
    fn missing_library_fails_the_resolution_stage() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        touch(&root.path().join("src/app"))?;
        let inspector = TableInspector::new(&[("app", &["libmissing.so.3"])]);

        match deployer(inspector).run(&query(root.path())) {
            Err(DeployError::StageFailed { stage, source }) => {
                assert_eq!(stage, DeployStage::ResolveDependencies);
                assert!(matches!(*source, DeployError::DependencyNotResolvable { .. }));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!root.path().join("bundle").exists());
        Ok(())
    }

    #[test]
    fn missing_binary_is_reported_before_any_stage() {
        let q = DeployQuery {
            binaries: vec![PathBuf::from("/nonexistent/app")],
            destination: PathBuf::from("/nonexistent/bundle"),
            ..DeployQuery::default()
        };
        assert!(matches!(deployer(TableInspector::new(&[])).run(&q), Err(DeployError::PathNotFound(_))));
    }

    #[test]
    fn qt_plugins_and_their_dependencies_are_bundled() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        touch(&root.path().join("src/app"))?;
        touch(&root.path().join("src/lib/libQt5Core.so.5"))?;
        touch(&root.path().join("src/lib/libxcb-icccm.so.4"))?;
        touch(&root.path().join("src/plugins/platforms/libqxcb.so"))?;
        let inspector = TableInspector::new(&[
            ("app", &["libQt5Core.so.5"]),
            ("libQt5Core.so.5", &[]),
            ("libqxcb.so", &["libQt5Core.so.5", "libxcb-icccm.so.4"]),
            ("libxcb-icccm.so.4", &[]),
        ]);

        let report = deployer(inspector).run(&query(root.path()))?;

        let bundle = root.path().join("bundle");
        assert_eq!(report.plugins, vec![bundle.join("plugins/platforms/libqxcb.so")]);
        assert_eq!(
            report.libraries,
            vec![bundle.join("libQt5Core.so.5"), bundle.join("libxcb-icccm.so.4")]
        );
        Ok(())
    }

    #[test]
    fn binary_already_in_place_is_not_copied() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        touch(&root.path().join("bundle/app"))?;
        let q = DeployQuery {
            binaries: vec![root.path().join("bundle/app")],
            ..query(root.path())
        };
        let report = deployer(TableInspector::new(&[("app", &[])])).run(&q)?;
        assert_eq!(report.binaries, vec![root.path().join("bundle/app")]);
        assert_eq!(fs::read_to_string(root.path().join("bundle/app"))?, "app");
        Ok(())
    }

    #[test]
    fn default_destination_is_the_binary_directory() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        let build = root.path().join("build");
        touch(&build.join("app"))?;
        touch(&build.join("lib/libfoo.so.1"))?;
        let q = DeployQuery {
            search_first_path_list: [path_to_string(&build)].iter().collect(),
            path_suffixes: vec!["lib".to_owned()],
            patch_rpath: false,
            ..DeployQuery::deduce_from_binaries(&[build.join("app")])?
        };

        let report = deployer(TableInspector::new(&[("app", &["libfoo.so.1"]), ("libfoo.so.1", &[])]))
            .run(&q)?;

        assert_eq!(report.destination, build);
        assert_eq!(report.binaries, vec![build.join("app")]);
        assert_eq!(report.libraries, vec![build.join("libfoo.so.1")]);
        assert!(build.join("libfoo.so.1").is_file());
        assert!(build.join("qt.conf").is_file());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn read_only_libraries_can_be_deployed_again() -> Result<(), DeployError> {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir()?;
        touch(&root.path().join("src/app"))?;
        let lib = root.path().join("src/lib/libfoo.so.1");
        touch(&lib)?;
        fs::set_permissions(&lib, std::fs::Permissions::from_mode(0o444))?;
        let table: &[(&str, &[&str])] = &[("app", &["libfoo.so.1"]), ("libfoo.so.1", &[])];

        deployer(TableInspector::new(table)).run(&query(root.path()))?;
        let report = deployer(TableInspector::new(table)).run(&query(root.path()))?;

        let copied = root.path().join("bundle/libfoo.so.1");
        assert_eq!(report.libraries, vec![copied.clone()]);
        assert_eq!(fs::read_to_string(&copied)?, "libfoo.so.1");
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn rpath_failure_fails_the_last_stage_and_keeps_the_bundle() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("src"))?;
        fs::copy(std::env::current_exe()?, root.path().join("src/app"))?;
        let q = DeployQuery {
            patch_rpath: true,
            ..query(root.path())
        };

        let r = deployer(TableInspector::new(&[("app", &[])]))
            .with_rpath_patcher(RPathPatcher::with_tool(ExternalTool::from_path("/bin/false")))
            .run(&q);

        match r {
            Err(DeployError::StageFailed { stage, source }) => {
                assert_eq!(stage, DeployStage::PatchRPath);
                match *source {
                    DeployError::RPathPatchFailure { failures } => {
                        assert_eq!(failures.len(), 1);
                        assert_eq!(failures[0].0, root.path().join("bundle/app"));
                    }
                    other => panic!("unexpected source {:?}", other),
                }
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(root.path().join("bundle/app").is_file());
        assert!(root.path().join("bundle/qt.conf").is_file());
        Ok(())
    }

    #[test]
    fn non_elf_bundle_passes_rpath_stage() -> Result<(), DeployError> {
        let root = tempfile::tempdir()?;
        touch(&root.path().join("src/app"))?;
        let q = DeployQuery {
            patch_rpath: true,
            ..query(root.path())
        };
        let report = deployer(TableInspector::new(&[("app", &[])]))
            .with_rpath_patcher(RPathPatcher::with_tool(ExternalTool::from_path("/nonexistent/patchelf")))
            .run(&q)?;
        assert!(report.rpath_patched.is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn application_translations_are_joined() -> Result<(), DeployError> {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir()?;
        touch(&root.path().join("src/app"))?;
        touch(&root.path().join("src/translations/app_fr.qm"))?;
        touch(&root.path().join("src/translations/widgets_fr.qm"))?;
        touch(&root.path().join("src/translations/app_de.qm"))?;
        let lconvert = root.path().join("lconvert");
        fs::write(&lconvert, "#!/bin/sh\nout=\"$2\"\nshift 2\ncat \"$@\" > \"$out\"\n")?;
        fs::set_permissions(&lconvert, std::fs::Permissions::from_mode(0o755))?;

        let q = DeployQuery {
            language_suffixes: vec!["fr".to_owned()],
            translation_dirs: vec![root.path().join("src/translations")],
            ..query(root.path())
        };
        let report = deployer(TableInspector::new(&[("app", &[])]))
            .with_translation_merger(TranslationMerger::with_tool(ExternalTool::from_path(&lconvert)))
            .run(&q)?;

        let joined = root.path().join("bundle/translations/app_fr.qm");
        assert_eq!(report.translations, vec![joined.clone()]);
        assert_eq!(fs::read_to_string(&joined)?, "app_fr.qmwidgets_fr.qm");
        Ok(())
    }
}

//! Qt specific knowledge: modules, their plugins and their translations

use crate::common::{clean_path, file_name_string, path_to_string, DeployError};
use crate::library::{LibraryInfo, LibraryInfoList, LibraryName};
use crate::path_list::PathList;
use crate::search_path::SearchPathList;
use crate::translation::{find_translations_in_directory, qm_file_names, TranslationInfoList};
use fs_err as fs;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Suffixes tried below each prefix to reach the root of a Qt installation
/// (MXE installs Qt below `qt5/`, a prefix pointing at `bin/` needs the parent)
const QT_ROOT_SUFFIXES: [&str; 2] = ["qt5", ".."];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QtModule {
    Unknown,
    Core,
    Gui,
    Widgets,
    Multimedia,
    MultimediaWidgets,
    Network,
    Positioning,
    PrintSupport,
    Qml,
    Quick,
    Sensors,
    Sql,
    Svg,
    Test,
    DBus,
}

impl QtModule {
    /// Module of a Qt library (`Qt5Core`, `Qt6Gui`, `Qt5Widgetsd`...), `Unknown` for others
    pub fn from_library(library: &LibraryInfo) -> Self {
        let library_name = library.library_name();
        let name = library_name.name();
        let Some(module_name) = strip_qt_prefix(name) else {
            return Self::Unknown;
        };
        let module_name = if library_name.has_debug_suffix() {
            module_name.strip_suffix('d').unwrap_or(module_name)
        } else {
            module_name
        };
        match module_name.to_ascii_lowercase().as_str() {
            "core" => Self::Core,
            "gui" => Self::Gui,
            "widgets" => Self::Widgets,
            "multimedia" => Self::Multimedia,
            "multimediawidgets" => Self::MultimediaWidgets,
            "network" => Self::Network,
            "positioning" => Self::Positioning,
            "printsupport" => Self::PrintSupport,
            "qml" => Self::Qml,
            "quick" => Self::Quick,
            "sensors" => Self::Sensors,
            "sql" => Self::Sql,
            "svg" => Self::Svg,
            "test" => Self::Test,
            "dbus" => Self::DBus,
            _ => Self::Unknown,
        }
    }

    /// Plugin directories (relative to the plugins root) a module needs at run time
    ///
    /// Platform abstraction plugins are not a module of their own; they are
    /// attached to Core and Gui, which are the libraries that load them.
    pub fn plugin_directories(self) -> &'static [&'static str] {
        match self {
            Self::Core => &["platforms"],
            Self::Gui => &[
                "accessiblebridge",
                "imageformats",
                "pictureformats",
                "platforminputcontexts",
                "platformthemes",
            ],
            Self::Multimedia => &[
                "audio",
                "video/declarativevideobackend",
                "video/bufferpool",
                "playlistformats",
                "resourcepolicy",
                "mediaservice",
                "video/videonode",
            ],
            Self::Network => &["bearer"],
            Self::Positioning => &["position"],
            Self::PrintSupport => &["printsupport"],
            Self::Quick => &["scenegraph"],
            Self::Sensors => &["sensorgestures", "sensors"],
            Self::Sql => &["sqldrivers"],
            Self::Svg => &["iconengines"],
            Self::Widgets => &["accessible", "styles"],
            Self::Unknown
            | Self::MultimediaWidgets
            | Self::Qml
            | Self::Test
            | Self::DBus => &[],
        }
    }

    /// Base names of the Qt translation files of a module
    pub fn qm_file_base_names(self) -> &'static [&'static str] {
        match self {
            Self::Core => &["qt", "qtbase"],
            Self::Multimedia => &["qtmultimedia"],
            Self::Quick => &["qtquick1", "qtquickcontrols"],
            _ => &[],
        }
    }
}

fn strip_qt_prefix(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("Qt").or_else(|| name.strip_prefix("qt"))?;
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    (!rest.is_empty()).then_some(rest)
}

pub fn is_qt_library(library: &LibraryInfo) -> bool {
    let name = library.library_name().name();
    match name.get(..3) {
        Some(major) => {
            name.len() > 3 && (major.eq_ignore_ascii_case("qt5") || major.eq_ignore_ascii_case("qt6"))
        }
        None => false,
    }
}

pub fn qt_libraries(libraries: &LibraryInfoList) -> LibraryInfoList {
    libraries.iter().filter(|l| is_qt_library(l)).cloned().collect()
}

/// Known modules of the given libraries, without duplicates
pub fn qt_modules(libraries: &LibraryInfoList) -> Vec<QtModule> {
    let mut modules = Vec::new();
    for l in libraries {
        let m = QtModule::from_library(l);
        if m != QtModule::Unknown && !modules.contains(&m) {
            modules.push(m);
        }
    }
    modules
}

/// A Qt plugin and the plugin directory it belongs in
#[derive(Debug, Clone, Serialize)]
pub struct QtPluginInfo {
    pub library: LibraryInfo,
    pub directory_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct QtPluginInfoList {
    plugins: Vec<QtPluginInfo>,
}

impl QtPluginInfoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plugin(&mut self, plugin: QtPluginInfo) {
        let exists = self.plugins.iter().any(|p| {
            p.directory_name == plugin.directory_name && p.library == plugin.library
        });
        if !exists {
            self.plugins.push(plugin);
        }
    }

    pub fn add_plugins(&mut self, other: QtPluginInfoList) {
        for p in other.plugins {
            self.add_plugin(p);
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QtPluginInfo> {
        self.plugins.iter()
    }

    pub fn libraries(&self) -> LibraryInfoList {
        self.plugins.iter().map(|p| p.library.clone()).collect()
    }
}

fn qt_root_candidates(path_prefix_list: &PathList) -> PathList {
    let mut spl = SearchPathList::new();
    spl.set_include_path_prefixes(true);
    if path_prefix_list.is_empty() {
        spl.set_path_prefix_list(PathList::system_library_path_list());
    } else {
        spl.set_path_prefix_list(path_prefix_list.clone());
    }
    spl.set_path_suffix_list(&QT_ROOT_SUFFIXES);
    spl.path_list().clone()
}

/// First existing `plugins` directory below the prefixes (or the system library paths)
pub fn find_plugins_root(path_prefix_list: &PathList) -> Option<PathBuf> {
    qt_root_candidates(path_prefix_list)
        .iter()
        .map(|p| PathBuf::from(clean_path(&format!("{}/plugins", p))))
        .find(|dir| {
            tracing::trace!("searching plugins in {}", dir.display());
            dir.is_dir()
        })
}

/// Plugins of `qt_library` found in its plugin directories below `plugins_root`
///
/// A plugin is taken only when it is built like the library: same extension
/// and same debug flavor.
pub fn find_plugins_in_directories(
    plugins_root: &Path,
    directories: &[&str],
    qt_library: &LibraryInfo,
) -> Result<QtPluginInfoList, DeployError> {
    let library_name = qt_library.library_name();
    let operating_system = library_name.operating_system();
    let mut plugins = QtPluginInfoList::new();

    for directory in directories {
        let dir = plugins_root.join(directory);
        if !dir.is_dir() {
            continue;
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        let file_names: Vec<String> = files.iter().map(file_name_string).collect();
        for file in files {
            let plugin_name = LibraryName::new(&file_name_string(&file), operating_system);
            if plugin_name.extension().eq_ignore_ascii_case(library_name.extension())
                && is_debug_plugin(&plugin_name, &file_names) == library_name.has_debug_suffix()
            {
                tracing::debug!("found plugin {}", file.display());
                plugins.add_plugin(QtPluginInfo {
                    library: LibraryInfo::new(plugin_name, file),
                    directory_name: (*directory).to_owned(),
                });
            }
        }
    }
    Ok(plugins)
}

/// A plugin named like a debug build is one only if its release build sits next to it
///
/// Release plugins whose name ends in 'd' (`qdirect2d.dll`) have no such sibling.
/// In an installation with debug plugins only, they are taken for release ones.
fn is_debug_plugin(plugin_name: &LibraryName, file_names_in_directory: &[String]) -> bool {
    if !plugin_name.has_debug_suffix() {
        return false;
    }
    let Some(release_name) = plugin_name.name().strip_suffix('d') else {
        return false;
    };
    let release_file_name = format!(
        "{}{}.{}",
        plugin_name.prefix(),
        release_name,
        plugin_name.extension()
    );
    file_names_in_directory
        .iter()
        .any(|f| f.eq_ignore_ascii_case(&release_file_name))
}

/// Plugins needed by the Qt libraries among `libraries`
pub fn find_libraries_plugins(
    libraries: &LibraryInfoList,
    path_prefix_list: &PathList,
) -> Result<QtPluginInfoList, DeployError> {
    let mut plugins = QtPluginInfoList::new();
    let qt_libs = qt_libraries(libraries);
    if qt_libs.is_empty() {
        return Ok(plugins);
    }
    let Some(plugins_root) = find_plugins_root(path_prefix_list) else {
        tracing::warn!(
            "no Qt plugins directory found below {}",
            qt_root_candidates(path_prefix_list).join(", ")
        );
        return Ok(plugins);
    };
    for library in &qt_libs {
        tracing::info!("searching plugins for library {}", library.library_name().name());
        let module = QtModule::from_library(library);
        plugins.add_plugins(find_plugins_in_directories(
            &plugins_root,
            module.plugin_directories(),
            library,
        )?);
    }
    Ok(plugins)
}

/// `translations` directory of a Qt installation, recognized by its qtbase files
pub fn find_qt_translations_root(path_prefix_list: &PathList) -> Option<PathBuf> {
    find_directory_root("translations", "qtbase", path_prefix_list)
}

fn find_directory_root(
    directory_name: &str,
    marker_file_prefix: &str,
    path_prefix_list: &PathList,
) -> Option<PathBuf> {
    qt_root_candidates(path_prefix_list)
        .iter()
        .map(|p| PathBuf::from(clean_path(&format!("{}/{}", p, directory_name))))
        .find(|dir| {
            if !dir.is_dir() {
                return false;
            }
            let pattern = format!(
                "{}/{}*",
                glob::Pattern::escape(&path_to_string(dir)),
                marker_file_prefix
            );
            glob::glob(&pattern)
                .map(|mut paths| paths.any(|p| p.map(|p| p.is_file()).unwrap_or(false)))
                .unwrap_or(false)
        })
}

/// Qt's own translations for the given modules and languages
pub fn find_qt_translations(
    modules: &[QtModule],
    language_suffixes: &[String],
    path_prefix_list: &PathList,
) -> Result<TranslationInfoList, DeployError> {
    let mut base_names: Vec<&str> = Vec::new();
    for m in modules {
        for b in m.qm_file_base_names() {
            if !base_names.contains(b) {
                base_names.push(b);
            }
        }
    }
    let names = qm_file_names(&base_names, language_suffixes);
    let root = find_qt_translations_root(path_prefix_list).ok_or_else(|| {
        DeployError::PathNotFound(PathBuf::from(format!(
            "translations directory for Qt libraries, searched in: {}",
            qt_root_candidates(path_prefix_list).join(", ")
        )))
    })?;
    find_translations_in_directory(&names, &root)
}

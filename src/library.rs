//! Identity of shared libraries and sets of discovered libraries

use crate::common::file_name_string;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Operating system a binary was built for
///
/// Decides how library file names are decorated and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingSystem {
    Linux,
    Windows,
}

impl OperatingSystem {
    /// The system this program runs on
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Linux
        }
    }

    /// Sniff the object format of a binary: ELF is Linux, PE is Windows
    ///
    /// Returns `None` for unreadable files and other formats.
    pub fn from_binary<P: AsRef<Path>>(path: P) -> Option<Self> {
        let content = fs::read(path.as_ref()).ok()?;
        match goblin::Object::parse(&content).ok()? {
            goblin::Object::Elf(_) => Some(Self::Linux),
            goblin::Object::PE(_) => Some(Self::Windows),
            _ => None,
        }
    }

    /// Library file names are matched case-insensitively on Windows only
    pub fn is_case_insensitive(self) -> bool {
        self == Self::Windows
    }
}

/// DLLs shipped with every Windows installation
const EXCLUDED_LIBRARIES_WINDOWS: [&str; 28] = [
    "Hal", "NTDLL", "KERNEL32", "GDI32", "USER32", "COMCTL32", "WS2_32", "ADVAPI32", "NETAPI32",
    "SHSCRAP", "WINMM", "MSVCRT", "mpr", "ole32", "shell32", "version", "crypt32", "dnsapi",
    "iphlpapi", "opengl32", "UxTheme", "dwmapi", "imm32", "oleaut32", "Secur32", "odbc32",
    "shfolder", "wsock32",
];

/// Prefixes of the Windows API set contracts, resolved by the loader rather than found as files
const API_SET_PREFIXES: [&str; 2] = ["api-ms-win-", "ext-ms-"];

/// Qt modules that have their own library (`Qt5<Module>.dll`)
const QT_MODULE_NAMES: [&str; 40] = [
    "3DAnimation", "3DCore", "3DExtras", "3DInput", "3DLogic", "3DRender", "Bluetooth", "Charts",
    "Concurrent", "Core", "DBus", "Designer", "Gamepad", "Gui", "Help", "Location", "Multimedia",
    "MultimediaWidgets", "Network", "Nfc", "OpenGL", "Positioning", "PrintSupport", "Qml",
    "Quick", "QuickControls2", "QuickWidgets", "RemoteObjects", "Script", "Sensors",
    "SerialPort", "Sql", "Svg", "Test", "WebChannel", "WebEngineCore", "WebSockets", "Widgets",
    "Xml", "XmlPatterns",
];

/// C runtime, loader and display-driver libraries that must come from the target system
const EXCLUDED_LIBRARIES_LINUX: [&str; 21] = [
    "c", "m", "dl", "pthread", "rt", "resolv", "util", "nsl", "anl", "crypt", "ld-linux",
    "ld-linux-x86-64", "ld-linux-aarch64", "ld-linux-armhf", "GL", "EGL", "GLX", "GLdispatch",
    "X11", "xcb", "drm",
];

/// Logical identity of a library, independent of version and file decoration
///
/// Linux: `libfoo.so.1.2.3` has name `foo`, prefix `lib`, extension `so`
/// and version `1.2.3`.
/// Windows: `Qt5Cored.dll` has name `Qt5Cored`, extension `dll`, and a debug suffix.
/// A leading `lib` (MinGW) is stripped as well.
///
/// Names are compared case-insensitively for Windows libraries only.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct LibraryName {
    full_name: String,
    prefix: String,
    name: String,
    extension: String,
    version: String,
    has_debug_suffix: bool,
    operating_system: OperatingSystem,
}

impl LibraryName {
    /// Parse a file name (a path is accepted, its directory is ignored)
    pub fn new(full_name: &str, operating_system: OperatingSystem) -> Self {
        let full_name = match Path::new(full_name).file_name() {
            Some(_) => file_name_string(full_name),
            None => full_name.to_owned(),
        };
        let mut ret = Self {
            name: full_name.clone(),
            full_name,
            prefix: String::new(),
            extension: String::new(),
            version: String::new(),
            has_debug_suffix: false,
            operating_system,
        };
        match operating_system {
            OperatingSystem::Linux => ret.parse_linux(),
            OperatingSystem::Windows => ret.parse_windows(),
        }
        ret
    }

    fn parse_linux(&mut self) {
        let (prefix, rest) = split_lib_prefix(&self.full_name);
        // the extension is the first ".so" that ends the name or is followed by a version
        let so_pos = rest.match_indices(".so").map(|(i, _)| i).find(|&i| {
            let after = &rest[i + 3..];
            after.is_empty() || after.starts_with('.')
        });
        if let Some(i) = so_pos.filter(|&i| i > 0) {
            self.prefix = prefix.to_owned();
            self.name = rest[..i].to_owned();
            self.extension = "so".to_owned();
            self.version = rest[i + 3..].trim_start_matches('.').to_owned();
        }
    }

    fn parse_windows(&mut self) {
        let lower = self.full_name.to_ascii_lowercase();
        let Some(dot) = self.full_name.rfind('.') else {
            return;
        };
        if !(lower.ends_with(".dll") || lower.ends_with(".exe")) {
            return;
        }
        let (stem, extension) = (&self.full_name[..dot], &self.full_name[dot + 1..]);
        let (prefix, stem) = split_lib_prefix(stem);
        if stem.is_empty() {
            return;
        }
        self.prefix = prefix.to_owned();
        self.name = stem.to_owned();
        self.extension = extension.to_owned();
        self.has_debug_suffix = is_qt_debug_name(stem);
    }

    /// Name without prefix, extension and version
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name as found on disk, used when matching files
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `true` for Windows debug builds of Qt libraries and plugins (`Qt5Cored.dll`, `qwindowsd.dll`)
    pub fn has_debug_suffix(&self) -> bool {
        self.has_debug_suffix
    }

    pub fn operating_system(&self) -> OperatingSystem {
        self.operating_system
    }

    /// Compare a plain name with this library's name, honoring the platform's case rule
    pub fn matches(&self, name: &str) -> bool {
        if self.operating_system.is_case_insensitive() {
            self.name.eq_ignore_ascii_case(name)
        } else {
            self.name == name
        }
    }

    /// Libraries provided by the target operating system itself, never deployed
    pub fn is_excluded_from_deployment(&self) -> bool {
        match self.operating_system {
            OperatingSystem::Windows => {
                let lower = self.name.to_ascii_lowercase();
                API_SET_PREFIXES.iter().any(|p| lower.starts_with(p))
                    || EXCLUDED_LIBRARIES_WINDOWS
                        .iter()
                        .any(|n| self.name.eq_ignore_ascii_case(n))
            }
            OperatingSystem::Linux => EXCLUDED_LIBRARIES_LINUX.iter().any(|n| self.name == *n),
        }
    }
}

impl PartialEq for LibraryName {
    fn eq(&self, other: &Self) -> bool {
        if self.operating_system.is_case_insensitive() || other.operating_system.is_case_insensitive() {
            self.name.eq_ignore_ascii_case(&other.name)
        } else {
            self.name == other.name
        }
    }
}

fn split_lib_prefix(s: &str) -> (&str, &str) {
    match s.strip_prefix("lib") {
        Some(rest) if !rest.is_empty() && !rest.starts_with('.') => ("lib", rest),
        _ => ("", s),
    }
}

// Qt appends a 'd' to the base name of Windows debug builds.
// A Qt library is debug only when the name without the 'd' is a known module
// (`Qt5Gamepad` is release). Plugin names (`q...d`) cannot be told apart by
// name alone (`qdirect2d` is release); the plugin lookup checks for the
// release sibling file.
fn is_qt_debug_name(stem: &str) -> bool {
    let Some(release) = stem.strip_suffix('d') else {
        return false;
    };
    if let Some(module) = release.strip_prefix("Qt") {
        let module = module.strip_prefix(|c: char| c.is_ascii_digit()).unwrap_or(module);
        return QT_MODULE_NAMES.iter().any(|m| m.eq_ignore_ascii_case(module));
    }
    stem.starts_with('q') && release.len() > 1
}

/// A library found on disk
///
/// Two infos are equal when their library names are equal, whatever their paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryInfo {
    library_name: LibraryName,
    absolute_file_path: PathBuf,
}

impl LibraryInfo {
    pub fn new(library_name: LibraryName, absolute_file_path: PathBuf) -> Self {
        Self {
            library_name,
            absolute_file_path,
        }
    }

    /// Build from the path of a library file
    pub fn from_file_path<P: AsRef<Path>>(path: P, operating_system: OperatingSystem) -> Self {
        let path = path.as_ref();
        Self {
            library_name: LibraryName::new(&file_name_string(path), operating_system),
            absolute_file_path: path.to_owned(),
        }
    }

    pub fn library_name(&self) -> &LibraryName {
        &self.library_name
    }

    pub fn absolute_file_path(&self) -> &Path {
        &self.absolute_file_path
    }
}

impl PartialEq for LibraryInfo {
    fn eq(&self, other: &Self) -> bool {
        self.library_name == other.library_name
    }
}

/// Ordered set of libraries, unique by library name; the first one added wins
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct LibraryInfoList {
    libraries: Vec<LibraryInfo>,
}

impl LibraryInfoList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `library` unless a library with the same name is already listed
    ///
    /// Returns `true` if it was added.
    pub fn add_library(&mut self, library: LibraryInfo) -> bool {
        if self.contains(library.library_name()) {
            return false;
        }
        self.libraries.push(library);
        true
    }

    pub fn add_libraries(&mut self, other: &LibraryInfoList) {
        for l in other.iter() {
            self.add_library(l.clone());
        }
    }

    pub fn contains(&self, name: &LibraryName) -> bool {
        self.libraries.iter().any(|l| l.library_name() == name)
    }

    pub fn get(&self, name: &LibraryName) -> Option<&LibraryInfo> {
        self.libraries.iter().find(|l| l.library_name() == name)
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    pub fn clear(&mut self) {
        self.libraries.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LibraryInfo> {
        self.libraries.iter()
    }

    pub fn first(&self) -> Option<&LibraryInfo> {
        self.libraries.first()
    }

    pub fn absolute_file_paths(&self) -> Vec<PathBuf> {
        self.libraries
            .iter()
            .map(|l| l.absolute_file_path().to_owned())
            .collect()
    }
}

impl FromIterator<LibraryInfo> for LibraryInfoList {
    fn from_iter<I: IntoIterator<Item = LibraryInfo>>(iter: I) -> Self {
        let mut list = Self::new();
        for l in iter {
            list.add_library(l);
        }
        list
    }
}

impl<'a> IntoIterator for &'a LibraryInfoList {
    type Item = &'a LibraryInfo;
    type IntoIter = std::slice::Iter<'a, LibraryInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.libraries.iter()
    }
}

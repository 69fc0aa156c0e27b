//! Ordered list of unique filesystem paths, used wherever a search order matters

use crate::common::clean_path;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

/// Library directories of a typical Linux installation, in lookup order
#[cfg(not(windows))]
const SYSTEM_LIBRARY_DIRECTORIES: [&str; 8] = [
    "/usr/lib",
    "/usr/lib/x86_64-linux-gnu",
    "/usr/lib32",
    "/usr/libx32",
    "/lib",
    "/lib32",
    "/lib64",
    "/libx32",
];

/// Sequence of paths where the position is the search priority
///
/// Entries are compared as plain strings (case sensitive, on every platform).
/// Adding an entry that is already present moves it instead of duplicating it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct PathList {
    entries: Vec<String>,
}

impl PathList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `path` at the end of the list, removing a previous equal entry
    ///
    /// Blank paths are ignored.
    pub fn append_path(&mut self, path: &str) {
        let path = path.trim();
        if path.is_empty() {
            return;
        }
        self.remove_path(path);
        self.entries.push(path.to_owned());
    }

    /// Put `path` at the front of the list, removing a previous equal entry
    ///
    /// Blank paths are ignored.
    pub fn prepend_path(&mut self, path: &str) {
        let path = path.trim();
        if path.is_empty() {
            return;
        }
        self.remove_path(path);
        self.entries.insert(0, path.to_owned());
    }

    pub fn append_path_list(&mut self, other: &PathList) {
        for p in &other.entries {
            self.append_path(p);
        }
    }

    /// Put all entries of `other` at the front, keeping the order they have in `other`
    pub fn prepend_path_list(&mut self, other: &PathList) {
        for p in other.entries.iter().rev() {
            self.prepend_path(p);
        }
    }

    pub fn remove_path(&mut self, path: &str) {
        self.entries.retain(|e| e != path);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.entries.iter()
    }

    pub fn to_string_list(&self) -> Vec<String> {
        self.entries.clone()
    }

    pub fn to_path_bufs(&self) -> Vec<PathBuf> {
        self.entries.iter().map(PathBuf::from).collect()
    }

    pub fn join(&self, separator: &str) -> String {
        self.entries.join(separator)
    }

    /// Parse a list given on the command line, entries separated by ';'
    pub fn from_separated(s: &str) -> Self {
        s.split(';').collect()
    }

    /// Directories of the PATH environment variable, cleaned, in their original order
    pub fn system_executable_path_list() -> Self {
        std::env::var("PATH")
            .map(|path| Self::from_path_variable(&path))
            .unwrap_or_default()
    }

    fn from_path_variable(path: &str) -> Self {
        path.split(PATH_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(clean_path)
            .collect()
    }

    /// Well-known library directories of the host, the Qt libraries directory last
    #[cfg(not(windows))]
    pub fn system_library_path_list() -> Self {
        let mut list: PathList = SYSTEM_LIBRARY_DIRECTORIES.iter().copied().collect();
        if let Some(qt_libs) = qt_libraries_directory() {
            list.append_path(&qt_libs);
        }
        list
    }

    /// Well-known library directories of the host, the Qt libraries directory last
    #[cfg(windows)]
    pub fn system_library_path_list() -> Self {
        let mut list = Self::system_executable_path_list();
        for dir in [get_system_directory(), get_windows_directory()] {
            match dir {
                Ok(d) => list.append_path(&clean_path(&d)),
                Err(e) => tracing::warn!("could not query a Windows system directory: {}", e),
            }
        }
        if let Some(qt_libs) = qt_libraries_directory() {
            list.append_path(&qt_libs);
        }
        list
    }
}

impl<S: AsRef<str>> FromIterator<S> for PathList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = PathList::new();
        for p in iter {
            list.append_path(p.as_ref());
        }
        list
    }
}

// deserialized entries go through append_path like any other
impl From<Vec<String>> for PathList {
    fn from(entries: Vec<String>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<PathList> for Vec<String> {
    fn from(list: PathList) -> Self {
        list.entries
    }
}

impl<'a> IntoIterator for &'a PathList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Directory holding the Qt libraries the deployment is done against
///
/// Taken from the QTDIR environment variable.
fn qt_libraries_directory() -> Option<String> {
    let qt_dir = std::env::var("QTDIR").ok()?;
    let qt_dir = qt_dir.trim();
    if qt_dir.is_empty() {
        return None;
    }
    #[cfg(windows)]
    let libs = format!("{}/bin", qt_dir);
    #[cfg(not(windows))]
    let libs = format!("{}/lib", qt_dir);
    Some(clean_path(&libs))
}

#[cfg(windows)]
fn get_winapi_directory(
    a: unsafe extern "system" fn(
        winapi::um::winnt::LPWSTR,
        winapi::shared::minwindef::UINT,
    ) -> winapi::shared::minwindef::UINT,
) -> Result<String, std::io::Error> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;

    const BFR_SIZE: usize = 512;
    let mut bfr: [u16; BFR_SIZE] = [0; BFR_SIZE];

    let ret: u32 = unsafe { a(bfr.as_mut_ptr(), BFR_SIZE as u32) };
    if ret == 0 {
        Err(std::io::Error::last_os_error())
    } else {
        let valid_bfr = &bfr[..ret as usize];
        OsString::from_wide(valid_bfr).into_string().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "directory is not valid unicode")
        })
    }
}

#[cfg(windows)]
fn get_system_directory() -> Result<String, std::io::Error> {
    get_winapi_directory(winapi::um::sysinfoapi::GetSystemDirectoryW)
}

#[cfg(windows)]
fn get_windows_directory() -> Result<String, std::io::Error> {
    get_winapi_directory(winapi::um::sysinfoapi::GetWindowsDirectoryW)
}

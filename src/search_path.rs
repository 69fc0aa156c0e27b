//! Search path derived from prefixes and suffixes, as used to locate Qt installations and tools

use crate::common::clean_path;
use crate::path_list::PathList;

/// Expands a list of prefixes with a list of suffixes into a [`PathList`]
///
/// The resulting list is rebuilt by every setter, so [`SearchPathList::path_list`]
/// always reflects the current configuration.
///
/// For prefixes `/opt/a` and `/opt/b` and suffixes `bin` and `qt5/bin`,
/// with prefixes included, the list is
/// `/opt/a, /opt/a/bin, /opt/a/qt5/bin, /opt/b, /opt/b/bin, /opt/b/qt5/bin`.
#[derive(Debug, Clone, Default)]
pub struct SearchPathList {
    include_path_prefixes: bool,
    path_prefix_list: PathList,
    path_suffix_list: Vec<String>,
    path_list_to_prepend: PathList,
    path_list_to_append: PathList,
    path_list: PathList,
}

impl SearchPathList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include each prefix itself, right before its expansions
    pub fn set_include_path_prefixes(&mut self, include: bool) {
        self.include_path_prefixes = include;
        self.update_path_list();
    }

    pub fn set_path_prefix_list(&mut self, prefixes: PathList) {
        self.path_prefix_list = prefixes;
        self.update_path_list();
    }

    /// Set the suffixes joined to each prefix; ".." stands for the prefix's parent
    pub fn set_path_suffix_list<S: AsRef<str>>(&mut self, suffixes: &[S]) {
        self.path_suffix_list = suffixes
            .iter()
            .map(|s| s.as_ref().trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
        self.update_path_list();
    }

    /// Add a path after all expanded entries
    pub fn append_path(&mut self, path: &str) {
        self.path_list_to_append.append_path(path);
        self.update_path_list();
    }

    /// Add a path before all expanded entries
    pub fn prepend_path(&mut self, path: &str) {
        self.path_list_to_prepend.prepend_path(path);
        self.update_path_list();
    }

    pub fn path_list(&self) -> &PathList {
        &self.path_list
    }

    fn update_path_list(&mut self) {
        let mut list = PathList::new();
        // an expansion that is already listed keeps its first position,
        // otherwise a ".." suffix would reorder prefixes sharing an ancestor
        let add = |list: &mut PathList, p: String| {
            if !list.contains(&p) {
                list.append_path(&p);
            }
        };
        for prefix in &self.path_prefix_list {
            if self.include_path_prefixes {
                add(&mut list, clean_path(prefix));
            }
            for suffix in &self.path_suffix_list {
                add(&mut list, clean_path(&format!("{}/{}", prefix, suffix)));
            }
        }
        list.prepend_path_list(&self.path_list_to_prepend);
        list.append_path_list(&self.path_list_to_append);
        self.path_list = list;
    }
}

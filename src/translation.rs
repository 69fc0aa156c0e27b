//! Qt translation files (.qm): naming, grouping by language and merging per binary

use crate::common::{file_name_string, path_to_string, DeployError};
use crate::path_list::PathList;
use crate::tool::{tool_search_path_list, ExternalTool};
use fs_err as fs;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Name of a .qm file split into base name and language suffix
///
/// `foo_fr_ca.qm` has base name `foo`, language `fr`, country `ca` and suffix `fr_ca`.
/// The last one or two underscore-separated tokens of exactly two characters
/// are taken as language and country, as long as a base name remains.
/// A base name that really ends with a two letter word (`tool_ui_fr.qm`)
/// cannot be told apart and is split wrongly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QmFileName {
    full_name: String,
    base_name: String,
    language_code: String,
    country_code: String,
}

impl QmFileName {
    pub fn new(full_name: &str) -> Self {
        let stem = full_name.strip_suffix(".qm").unwrap_or(full_name);
        let tokens: Vec<&str> = stem.split('_').collect();
        let max_codes = tokens.len().saturating_sub(1).min(2);
        let code_count = tokens
            .iter()
            .rev()
            .take(max_codes)
            .take_while(|t| t.chars().count() == 2)
            .count();
        let (base, codes) = tokens.split_at(tokens.len() - code_count);

        let (language_code, country_code) = match codes {
            [language] => (language.to_string(), String::new()),
            [language, country] => (language.to_string(), country.to_string()),
            _ => (String::new(), String::new()),
        };
        Self {
            full_name: full_name.to_owned(),
            base_name: base.join("_"),
            language_code,
            country_code,
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn language_code(&self) -> &str {
        &self.language_code
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// `language_country`, or `language` alone, or empty
    pub fn suffix(&self) -> String {
        if self.country_code.is_empty() {
            self.language_code.clone()
        } else {
            format!("{}_{}", self.language_code, self.country_code)
        }
    }
}

/// A .qm file on disk
#[derive(Debug, Clone, Serialize)]
pub struct TranslationInfo {
    absolute_file_path: PathBuf,
    qm_file_name: QmFileName,
}

impl TranslationInfo {
    pub fn from_qm_file_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self {
            absolute_file_path: path.to_owned(),
            qm_file_name: QmFileName::new(&file_name_string(path)),
        }
    }

    pub fn absolute_file_path(&self) -> &Path {
        &self.absolute_file_path
    }

    pub fn qm_file_name(&self) -> &QmFileName {
        &self.qm_file_name
    }

    pub fn full_file_name(&self) -> &str {
        self.qm_file_name.full_name()
    }

    pub fn file_suffix(&self) -> String {
        self.qm_file_name.suffix()
    }
}

impl PartialEq for TranslationInfo {
    fn eq(&self, other: &Self) -> bool {
        path_to_string(&self.absolute_file_path).to_lowercase()
            == path_to_string(&other.absolute_file_path).to_lowercase()
    }
}

/// Ordered set of translation files
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct TranslationInfoList {
    translations: Vec<TranslationInfo>,
}

impl TranslationInfoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_translation(&mut self, translation: TranslationInfo) {
        if !self.translations.contains(&translation) {
            self.translations.push(translation);
        }
    }

    pub fn add_translations(&mut self, other: &TranslationInfoList) {
        for t in other.iter() {
            self.add_translation(t.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.translations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TranslationInfo> {
        self.translations.iter()
    }

    /// Distinct language suffixes, in order of first appearance
    pub fn used_file_suffixes(&self) -> Vec<String> {
        let mut suffixes: Vec<String> = Vec::new();
        for t in &self.translations {
            let suffix = t.file_suffix();
            if !suffixes.contains(&suffix) {
                suffixes.push(suffix);
            }
        }
        suffixes
    }

    pub fn translations_for_file_suffix(&self, suffix: &str) -> TranslationInfoList {
        self.translations
            .iter()
            .filter(|t| t.file_suffix() == suffix)
            .cloned()
            .collect()
    }

    pub fn translations_for_file_suffixes<S: AsRef<str>>(&self, suffixes: &[S]) -> TranslationInfoList {
        self.translations
            .iter()
            .filter(|t| {
                let suffix = t.file_suffix();
                suffixes.iter().any(|s| s.as_ref() == suffix)
            })
            .cloned()
            .collect()
    }
}

impl FromIterator<TranslationInfo> for TranslationInfoList {
    fn from_iter<I: IntoIterator<Item = TranslationInfo>>(iter: I) -> Self {
        let mut list = Self::new();
        for t in iter {
            list.add_translation(t);
        }
        list
    }
}

/// Build `<base>_<suffix>.qm` for every base name and language suffix
pub fn qm_file_names<B: AsRef<str>, S: AsRef<str>>(base_names: &[B], language_suffixes: &[S]) -> Vec<String> {
    base_names
        .iter()
        .flat_map(|b| {
            language_suffixes
                .iter()
                .map(move |s| format!("{}_{}.qm", b.as_ref(), s.as_ref()))
        })
        .collect()
}

/// Files of `directory` whose names are in `qm_file_names` (compared case-insensitively)
pub fn find_translations_in_directory<S: AsRef<str>>(
    qm_file_names: &[S],
    directory: &Path,
) -> Result<TranslationInfoList, DeployError> {
    if !directory.is_dir() {
        return Err(DeployError::PathNotFound(directory.to_owned()));
    }
    let wanted: Vec<String> = qm_file_names.iter().map(|n| n.as_ref().to_lowercase()).collect();
    let mut translations = TranslationInfoList::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_file() && wanted.contains(&file_name_string(&path).to_lowercase()) {
            translations.add_translation(TranslationInfo::from_qm_file_path(path));
        }
    }
    Ok(translations)
}

/// Every .qm file of `directory`, sorted by file name
pub fn find_all_translations_in_directory(directory: &Path) -> Result<TranslationInfoList, DeployError> {
    if !directory.is_dir() {
        return Err(DeployError::PathNotFound(directory.to_owned()));
    }
    let pattern = format!(
        "{}/*.qm",
        glob::Pattern::escape(&path_to_string(directory))
    );
    let entries = glob::glob(&pattern)
        .map_err(|e| DeployError::ConfigError(format!("invalid pattern {}: {}", pattern, e)))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths.into_iter().map(TranslationInfo::from_qm_file_path).collect())
}

/// Merges .qm files with Qt's lconvert
pub struct TranslationMerger {
    lconvert: ExternalTool,
}

impl TranslationMerger {
    /// Find lconvert under `<prefix>`, `<prefix>/bin` or `<prefix>/qt5/bin`, then in PATH
    pub fn find(path_prefix_list: &PathList) -> Result<Self, DeployError> {
        Ok(Self {
            lconvert: ExternalTool::find("lconvert", &tool_search_path_list(path_prefix_list))?,
        })
    }

    pub fn with_tool(lconvert: ExternalTool) -> Self {
        Self { lconvert }
    }

    /// Write one `<binary base name>_<suffix>.qm` per binary and language suffix
    ///
    /// `destination_dir` is created if needed. Stops at the first failing
    /// merge; files written before stay in place.
    pub fn join_translations(
        &self,
        in_translations: &TranslationInfoList,
        binary_files: &[PathBuf],
        destination_dir: &Path,
    ) -> Result<Vec<PathBuf>, DeployError> {
        fs::create_dir_all(destination_dir)
            .map_err(|e| DeployError::io("creating the translations directory", e))?;

        let suffixes = in_translations.used_file_suffixes();
        let mut written = Vec::new();
        for binary in binary_files {
            let base_name = binary
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| DeployError::ConfigError(format!("{} has no file name", binary.display())))?;
            for suffix in &suffixes {
                let out = destination_dir.join(qm_output_file_name(&base_name, suffix));
                let inputs = in_translations.translations_for_file_suffix(suffix);
                self.join_translation_files(&inputs, &out)?;
                written.push(out);
            }
        }
        Ok(written)
    }

    fn join_translation_files(
        &self,
        inputs: &TranslationInfoList,
        out: &Path,
    ) -> Result<(), DeployError> {
        tracing::info!("writing {} from {} file(s)", out.display(), inputs.len());
        let mut args = vec!["-o".into(), out.as_os_str().to_owned()];
        args.extend(inputs.iter().map(|t| t.absolute_file_path().as_os_str().to_owned()));
        self.lconvert.run(args, out)?;
        Ok(())
    }
}

fn qm_output_file_name(base_name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("{}.qm", base_name)
    } else {
        format!("{}_{}.qm", base_name, suffix)
    }
}

/// Find lconvert and merge `in_translations` for every binary into `destination_dir`
pub fn join_translations(
    in_translations: &TranslationInfoList,
    binary_files: &[PathBuf],
    destination_dir: &Path,
    path_prefix_list: &PathList,
) -> Result<Vec<PathBuf>, DeployError> {
    TranslationMerger::find(path_prefix_list)?.join_translations(in_translations, binary_files, destination_dir)
}

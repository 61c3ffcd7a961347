//! Which backtrace files belong to the project itself.

use triage_types::Project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathClass {
    Project,
    Filtered,
    Library,
}

pub trait PathClassifier: Send + Sync {
    fn classify(&self, file: &str) -> PathClass;
}

/// Path segments that mark vendored or installed third-party code.
const LIBRARY_SEGMENTS: &[&str] = &["vendor", "gems", "node_modules", "site-packages"];

/// Classifier driven by a project's filter and whitelist prefixes.
///
/// Order: whitelisted prefix, filtered prefix, library heuristics, then
/// project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPathClassifier {
    filter_paths: Vec<String>,
    whitelist_paths: Vec<String>,
}

impl ProjectPathClassifier {
    #[must_use]
    pub fn new(filter_paths: Vec<String>, whitelist_paths: Vec<String>) -> Self {
        Self {
            filter_paths,
            whitelist_paths,
        }
    }

    #[must_use]
    pub fn for_project(project: &Project) -> Self {
        Self::new(project.filter_paths.clone(), project.whitelist_paths.clone())
    }

    fn is_library(file: &str) -> bool {
        if file.starts_with('/') || file.contains(".cargo/registry/") {
            return true;
        }
        let mut segments = file.split('/');
        // The last segment is the file name itself.
        segments.next_back();
        segments.any(|segment| LIBRARY_SEGMENTS.contains(&segment))
    }
}

impl PathClassifier for ProjectPathClassifier {
    fn classify(&self, file: &str) -> PathClass {
        if self
            .whitelist_paths
            .iter()
            .any(|prefix| file.starts_with(prefix.as_str()))
        {
            return PathClass::Project;
        }
        if self
            .filter_paths
            .iter()
            .any(|prefix| file.starts_with(prefix.as_str()))
        {
            return PathClass::Filtered;
        }
        if Self::is_library(file) {
            return PathClass::Library;
        }
        PathClass::Project
    }
}

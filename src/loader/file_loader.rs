//! Filesystem-backed loader. Grounded on `filetemplateloader.cpp`: an
//! ordered list of search directories, a configurable suffix appended when
//! the name doesn't already carry one, traversal prevention, a `:`-prefixed
//! convention for immutable in-process resources, and mtime-based staleness
//! detection.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ahash::AHashMap;

use super::Loader;
use crate::error::LoaderError;

pub struct FileLoader {
    search_paths: Vec<PathBuf>,
    suffix: String,
    resources: AHashMap<String, String>,
    mtimes: RefCell<AHashMap<String, SystemTime>>,
}

impl FileLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths, suffix: ".twig".to_string(), resources: AHashMap::new(), mtimes: RefCell::new(AHashMap::new()) }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Registers an immutable in-process resource, addressed as `:name`.
    pub fn add_resource(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.resources.insert(name.into(), source.into());
    }

    fn is_traversal_safe(name: &str) -> bool {
        !Path::new(name).components().any(|c| matches!(c, std::path::Component::ParentDir))
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let candidate = if name.ends_with(&self.suffix) { name.to_string() } else { format!("{name}{}", self.suffix) };
        for dir in &self.search_paths {
            let path = dir.join(&candidate);
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }
}

impl Loader for FileLoader {
    fn exists(&self, name: &str) -> bool {
        if let Some(resource_name) = name.strip_prefix(':') {
            return self.resources.contains_key(resource_name);
        }
        Self::is_traversal_safe(name) && self.resolve(name).is_some()
    }

    fn load(&self, name: &str) -> Result<String, LoaderError> {
        if let Some(resource_name) = name.strip_prefix(':') {
            return self
                .resources
                .get(resource_name)
                .cloned()
                .ok_or_else(|| LoaderError { message: format!("no such resource '{name}'") });
        }

        if !Self::is_traversal_safe(name) {
            return Err(LoaderError { message: format!("template name '{name}' escapes the search root") });
        }

        let path = self.resolve(name).ok_or_else(|| LoaderError { message: format!("template '{name}' not found") })?;
        let source = fs::read_to_string(&path).map_err(|e| LoaderError { message: format!("reading '{name}': {e}") })?;

        if let Ok(meta) = fs::metadata(&path) {
            if let Ok(modified) = meta.modified() {
                self.mtimes.borrow_mut().insert(name.to_string(), modified);
            }
        }

        Ok(source)
    }

    fn has_changed(&self, name: &str, _since_version: i64) -> bool {
        if name.starts_with(':') {
            return false;
        }
        let Some(path) = self.resolve(name) else { return true };
        let Ok(meta) = fs::metadata(&path) else { return true };
        let Ok(modified) = meta.modified() else { return false };
        match self.mtimes.borrow().get(name) {
            Some(recorded) => modified > *recorded,
            None => true,
        }
    }
}

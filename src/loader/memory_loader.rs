//! In-memory loader, mainly for tests and embedded snippets. Grounded on the
//! reference `MemoryTemplateLoader`: a name→source map whose mutators
//! (`add`/`remove`) have asymmetric effects on staleness — adding a template
//! never invalidates existing cached Programs (it couldn't have been a
//! dependency before it existed), removing one always does.

use std::cell::RefCell;

use ahash::AHashMap;

use super::Loader;
use crate::error::LoaderError;

#[derive(Default)]
pub struct MemoryLoader {
    templates: RefCell<AHashMap<String, String>>,
    removed: RefCell<Vec<String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.borrow_mut().insert(name.into(), source.into());
    }

    pub fn remove(&self, name: &str) {
        if self.templates.borrow_mut().remove(name).is_some() {
            self.removed.borrow_mut().push(name.to_string());
        }
    }
}

impl Loader for MemoryLoader {
    fn exists(&self, name: &str) -> bool {
        self.templates.borrow().contains_key(name)
    }

    fn load(&self, name: &str) -> Result<String, LoaderError> {
        self.templates
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| LoaderError { message: format!("template '{name}' not found") })
    }

    fn has_changed(&self, name: &str, _since_version: i64) -> bool {
        self.removed.borrow().iter().any(|n| n == name)
    }
}

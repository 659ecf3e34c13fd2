//! The engine façade (spec §7): owns the loader, the caller's environment
//! map, the user function table, and a Program cache keyed by template name.
//! Grounded on `templateengine.cpp`/`templateengine_p.hpp`'s
//! `TemplateEngine`/`TemplateEnginePrivate` in full.
//!
//! Unlike the original, a cached [`Program`] never needs its own
//! lazily-refreshed copy of the caller's variable values (the original's
//! `updateProgramVariables`/`versionId` copy-on-write dance): [`Engine::render`]
//! passes the live environment into [`renderer::render`] fresh on every call,
//! so the cache only ever has to decide whether the *compiled tree* is still
//! valid, via [`Loader::has_changed`] over each dependency.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::builtins;
use crate::compiler;
use crate::error::TemplateError;
use crate::loader::Loader;
use crate::program::{Function, Program};
use crate::renderer::{self, RenderOutcome};
use crate::value::Value;

pub struct Engine {
    loader: Box<dyn Loader>,
    values: IndexMap<String, Value>,
    functions: IndexMap<String, Function>,
    cache: RefCell<IndexMap<String, Rc<Program>>>,
    max_cache_size: usize,
    version_id: i64,
    last_error: RefCell<TemplateError>,
}

impl Engine {
    pub fn new(loader: Box<dyn Loader>) -> Self {
        let mut functions = IndexMap::new();
        builtins::register(&mut functions);
        Self {
            loader,
            values: IndexMap::new(),
            functions,
            cache: RefCell::new(IndexMap::new()),
            max_cache_size: 128,
            version_id: 0,
            last_error: RefCell::new(TemplateError::none()),
        }
    }

    pub fn set_loader(&mut self, loader: Box<dyn Loader>) {
        self.loader = loader;
        self.flush_cache();
    }

    pub fn max_cache_size(&self) -> usize {
        self.max_cache_size
    }

    pub fn set_max_cache_size(&mut self, size: usize) {
        self.max_cache_size = size;
    }

    pub fn current_cache_size(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_template_in_cache(&self, name: &str) -> bool {
        self.cache.borrow().contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: Value) {
        self.version_id += 1;
        self.values.insert(name.into(), value);
    }

    pub fn set_values(&mut self, values: IndexMap<String, Value>) {
        self.version_id += 1;
        self.values = values;
    }

    pub fn merge_values(&mut self, values: IndexMap<String, Value>) {
        self.version_id += 1;
        for (name, value) in values {
            self.values.insert(name, value);
        }
    }

    pub fn add_function(&mut self, name: impl Into<String>, callback: crate::program::Callback, is_constant: bool) {
        self.version_id += 1;
        self.functions.insert(name.into(), Function { callback, is_constant });
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn last_error(&self) -> TemplateError {
        self.last_error.borrow().clone()
    }

    /// Returns the compiled, up-to-date [`Program`] for `name`, compiling
    /// (and caching) it if this is the first request or a dependency has
    /// changed since the cached copy was built.
    pub fn program(&self, name: &str) -> Result<Rc<Program>, TemplateError> {
        if let Some(cached) = self.cache.borrow().get(name) {
            if !self.is_outdated(cached) {
                return Ok(cached.clone());
            }
        }

        let program = Rc::new(self.create_program(name)?);
        if self.max_cache_size > 0 {
            self.cache.borrow_mut().insert(name.to_string(), program.clone());
            self.evict_overflow();
        }

        Ok(program)
    }

    /// Renders `name` against the engine's own environment map. Mirrors
    /// `TemplateEngine::render`: the last observed error is always stored,
    /// whether this call failed or a prior one did.
    pub fn render(&self, name: &str) -> Result<String, TemplateError> {
        let program = match self.program(name) {
            Ok(p) => p,
            Err(e) => {
                *self.last_error.borrow_mut() = e.clone();
                return Err(e);
            }
        };

        match renderer::render(&program, &self.values) {
            Ok(RenderOutcome { output, error: None }) => {
                *self.last_error.borrow_mut() = TemplateError::none();
                Ok(output)
            }
            Ok(RenderOutcome { output, error: Some(error) }) => {
                *self.last_error.borrow_mut() = error.clone().into();
                let _ = output;
                Err(error.into())
            }
            Err(error) => {
                *self.last_error.borrow_mut() = error.clone().into();
                Err(error.into())
            }
        }
    }

    /// Drops `name` from the cache along with every cached program that
    /// depends on it, matching `removeChangedTemplateFromCache`.
    pub fn remove_changed_template_from_cache(&self, name: &str) {
        let mut cache = self.cache.borrow_mut();
        cache.shift_remove(name);
        cache.retain(|_, program| !program.dependencies.iter().any(|d| d == name));
    }

    pub fn flush_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    fn is_outdated(&self, program: &Program) -> bool {
        program.dependencies.iter().any(|dep| self.loader.has_changed(dep, program.version_id))
    }

    fn evict_overflow(&self) {
        let mut cache = self.cache.borrow_mut();
        while cache.len() > self.max_cache_size {
            cache.shift_remove_index(0);
        }
    }

    fn create_program(&self, name: &str) -> Result<Program, TemplateError> {
        let mut program = Program { functions: self.functions.clone(), version_id: self.version_id, ..Program::default() };

        compiler::compile_template(name, &mut program, self.loader.as_ref()).map_err(|e| {
            let error: TemplateError = e.into();
            program.error = error.clone();
            error
        })?;

        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;

    #[test]
    fn caches_compiled_program_across_renders() {
        let loader = MemoryLoader::new();
        loader.add("greet", "Hello {{ name }}!");
        let mut engine = Engine::new(Box::new(loader));
        engine.set_value("name", Value::Str("World".to_string()));

        assert_eq!(engine.render("greet").unwrap(), "Hello World!");
        assert!(engine.is_template_in_cache("greet"));
        assert_eq!(engine.render("greet").unwrap(), "Hello World!");
    }

    #[test]
    fn recompiles_after_the_loader_reports_a_change() {
        let loader = Rc::new(MemoryLoader::new());
        loader.add("greet", "Hello {{ name }}!");
        let mut engine = Engine::new(Box::new(SharedLoader(loader.clone())));
        engine.set_value("name", Value::Str("World".to_string()));
        engine.render("greet").unwrap();
        assert!(engine.is_template_in_cache("greet"));

        loader.remove("greet");
        loader.add("greet", "Hi {{ name }}!!");
        assert_eq!(engine.render("greet").unwrap(), "Hi World!!");
    }

    struct SharedLoader(Rc<MemoryLoader>);

    impl Loader for SharedLoader {
        fn exists(&self, name: &str) -> bool {
            self.0.exists(name)
        }

        fn load(&self, name: &str) -> Result<String, crate::error::LoaderError> {
            self.0.load(name)
        }

        fn has_changed(&self, name: &str, since_version: i64) -> bool {
            self.0.has_changed(name, since_version)
        }
    }

    #[test]
    fn missing_template_surfaces_as_last_error() {
        let loader = MemoryLoader::new();
        let engine = Engine::new(Box::new(loader));
        assert!(engine.render("missing").is_err());
        assert!(engine.last_error().has_failed());
    }
}

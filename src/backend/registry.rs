//! Named storage engines with reference-counted handles
//!
//! Engines are compiled in and created by name. Each category collection asks
//! the registry for a handle with [`BackendRegistry::setup`]; every call for
//! the same name shares one engine instance and bumps its count. When the last
//! holder calls [`BackendRegistry::release`], the engine is closed and dropped.

use super::{
    Backend, BackendHandle, BackendSettings, Category, MemoryBackend, TextdirBackend,
};
use crate::core::error::BackendError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use strum::IntoEnumIterator;

/// Engines this build knows about
pub const ENGINES: &[&str] = &["textdir", "memory"];

#[derive(Debug)]
struct Loaded {
    handle: BackendHandle,
    refcnt: usize,
}

#[derive(Debug, Default)]
pub struct BackendRegistry {
    loaded: HashMap<String, Loaded>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(name: &str) -> Result<Box<dyn Backend>, BackendError> {
        match name {
            "textdir" => Ok(Box::new(TextdirBackend::default())),
            "memory" => Ok(Box::new(MemoryBackend::new())),
            other => Err(BackendError::UnknownBackend(other.to_string())),
        }
    }

    /// Returns a handle to the engine called `name`, creating and configuring
    /// it on first use.
    ///
    /// # Errors
    ///
    /// [`BackendError::UnknownBackend`] for names outside [`ENGINES`], or the
    /// engine's own error from `conf`.
    pub fn setup(
        &mut self,
        name: &str,
        settings: &BackendSettings,
    ) -> Result<BackendHandle, BackendError> {
        if let Some(loaded) = self.loaded.get_mut(name) {
            loaded.refcnt += 1;
            return Ok(Rc::clone(&loaded.handle));
        }
        let mut engine = Self::create(name)?;
        engine.conf(settings)?;
        tracing::debug!("Loaded backend '{}'", name);
        Ok(self.insert(name, engine))
    }

    /// Registers an already built engine under `name` (count starts at one).
    ///
    /// Replaces nothing: if `name` is loaded, its count is bumped and the
    /// existing handle is returned.
    pub fn register(&mut self, name: &str, engine: Box<dyn Backend>) -> BackendHandle {
        if let Some(loaded) = self.loaded.get_mut(name) {
            loaded.refcnt += 1;
            return Rc::clone(&loaded.handle);
        }
        self.insert(name, engine)
    }

    fn insert(&mut self, name: &str, engine: Box<dyn Backend>) -> BackendHandle {
        let handle: BackendHandle = Rc::new(RefCell::new(engine));
        self.loaded.insert(
            name.to_string(),
            Loaded {
                handle: Rc::clone(&handle),
                refcnt: 1,
            },
        );
        handle
    }

    /// Drops one reference; the engine is closed and unloaded at zero.
    ///
    /// # Errors
    ///
    /// [`BackendError::NotLoaded`] if `name` holds no references.
    pub fn release(&mut self, name: &str) -> Result<(), BackendError> {
        let loaded = self
            .loaded
            .get_mut(name)
            .ok_or_else(|| BackendError::NotLoaded(name.to_string()))?;
        loaded.refcnt -= 1;
        if loaded.refcnt > 0 {
            return Ok(());
        }
        if let Some(loaded) = self.loaded.remove(name) {
            let mut engine = loaded.handle.borrow_mut();
            for category in Category::iter() {
                engine.close(category)?;
            }
            tracing::debug!("Unloaded backend '{}'", name);
        }
        Ok(())
    }

    /// Current number of holders of `name` (zero when not loaded).
    pub fn refcount(&self, name: &str) -> usize {
        self.loaded.get(name).map_or(0, |l| l.refcnt)
    }
}

//! In-memory storage engine
//!
//! Keeps every category as an ordered list of records. Used by the test
//! suite and for dry runs; it honours the same open/write discipline as the
//! file based engine and can be told to fail writes to exercise error paths.

use super::{Backend, BackendSettings, Category, ListEntry, ListIter, ObjectKind, OpenMode};
use crate::core::error::BackendError;
use std::collections::{BTreeMap, HashSet};
use strum::IntoEnumIterator;

#[derive(Debug, Clone)]
struct Record {
    name: String,
    kind: ObjectKind,
    attributes: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    stores: BTreeMap<Category, Vec<Record>>,
    writable: HashSet<Category>,
    failing: HashSet<Category>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until switched off again.
    pub fn fail_writes(&mut self, fail: bool) {
        for category in Category::iter() {
            self.fail_writes_in(category, fail);
        }
    }

    /// Like [`MemoryBackend::fail_writes`], limited to one category.
    pub fn fail_writes_in(&mut self, category: Category, fail: bool) {
        if fail {
            self.failing.insert(category);
        } else {
            self.failing.remove(&category);
        }
    }

    /// Seeds an object without the open/write ceremony (fixtures).
    pub fn seed(&mut self, category: Category, name: &str, kind: ObjectKind) -> &mut Self {
        let store = self.stores.entry(category).or_default();
        if !store.iter().any(|r| r.name == name) {
            store.push(Record {
                name: name.to_string(),
                kind,
                attributes: BTreeMap::new(),
            });
        }
        self
    }

    /// Seeds one attribute value (appending) without the write ceremony.
    pub fn seed_attr(
        &mut self,
        category: Category,
        name: &str,
        attribute: &str,
        value: &str,
    ) -> &mut Self {
        if let Some(record) = self
            .stores
            .entry(category)
            .or_default()
            .iter_mut()
            .find(|r| r.name == name)
        {
            record
                .attributes
                .entry(attribute.to_string())
                .or_default()
                .push(value.to_string());
        }
        self
    }

    /// Names of every stored object of `category`, in storage order.
    pub fn names(&self, category: Category) -> Vec<String> {
        self.stores
            .get(&category)
            .map(|s| s.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }

    fn check_writable(&self, category: Category) -> Result<(), BackendError> {
        if !self.writable.contains(&category) {
            return Err(BackendError::NotOpen {
                category: category.to_string(),
            });
        }
        if self.failing.contains(&category) {
            return Err(BackendError::Other(format!(
                "simulated write failure in {category}"
            )));
        }
        Ok(())
    }

    fn record_mut(&mut self, name: &str, category: Category) -> Result<&mut Record, BackendError> {
        self.stores
            .get_mut(&category)
            .and_then(|s| s.iter_mut().find(|r| r.name == name))
            .ok_or_else(|| BackendError::NoSuchObject {
                name: name.to_string(),
                category: category.to_string(),
            })
    }
}

/// `true` if `child` is nested below `parent` in dotted zone notation.
fn is_descendant(child: &str, parent: &str) -> bool {
    child.len() > parent.len() + 1
        && child.ends_with(parent)
        && child.as_bytes()[child.len() - parent.len() - 1] == b'.'
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn conf(&mut self, _settings: &BackendSettings) -> Result<(), BackendError> {
        Ok(())
    }

    fn open(&mut self, mode: OpenMode, category: Category) -> Result<(), BackendError> {
        if mode == OpenMode::Write {
            self.writable.insert(category);
        }
        Ok(())
    }

    fn close(&mut self, category: Category) -> Result<(), BackendError> {
        self.writable.remove(&category);
        Ok(())
    }

    fn init(&mut self, category: Category) -> Result<(), BackendError> {
        self.stores.entry(category).or_default();
        Ok(())
    }

    fn list(&mut self, category: Category) -> Result<ListIter<'_>, BackendError> {
        let entries: Vec<ListEntry> = self
            .stores
            .get(&category)
            .map(|s| {
                s.iter()
                    .map(|r| ListEntry::new(r.name.clone(), r.kind))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(entries.into_iter()))
    }

    fn ask(
        &mut self,
        name: &str,
        attribute: &str,
        category: Category,
    ) -> Result<Vec<String>, BackendError> {
        let record = self.record_mut(name, category)?;
        Ok(record.attributes.get(attribute).cloned().unwrap_or_default())
    }

    fn attributes(&mut self, name: &str, category: Category) -> Result<Vec<String>, BackendError> {
        let record = self.record_mut(name, category)?;
        Ok(record.attributes.keys().cloned().collect())
    }

    fn tell(
        &mut self,
        name: &str,
        attribute: &str,
        value: &str,
        overwrite: bool,
        category: Category,
    ) -> Result<(), BackendError> {
        self.check_writable(category)?;
        let record = self.record_mut(name, category)?;
        let values = record.attributes.entry(attribute.to_string()).or_default();
        if overwrite {
            values.clear();
        }
        if !value.is_empty() || !overwrite {
            values.push(value.to_string());
        }
        if values.is_empty() {
            record.attributes.remove(attribute);
        }
        Ok(())
    }

    fn add(&mut self, name: &str, kind: ObjectKind, category: Category) -> Result<(), BackendError> {
        self.check_writable(category)?;
        let store = self.stores.entry(category).or_default();
        if store.iter().any(|r| r.name == name) {
            return Err(BackendError::ObjectExists {
                name: name.to_string(),
                category: category.to_string(),
            });
        }
        store.push(Record {
            name: name.to_string(),
            kind,
            attributes: BTreeMap::new(),
        });
        Ok(())
    }

    fn del(&mut self, name: &str, category: Category, recursive: bool) -> Result<(), BackendError> {
        self.check_writable(category)?;
        let store = self.stores.entry(category).or_default();
        if !store.iter().any(|r| r.name == name) {
            return Err(BackendError::NoSuchObject {
                name: name.to_string(),
                category: category.to_string(),
            });
        }
        let nested = category == Category::Zones;
        if nested && !recursive && store.iter().any(|r| is_descendant(&r.name, name)) {
            return Err(BackendError::HasChildren {
                name: name.to_string(),
                category: category.to_string(),
            });
        }
        store.retain(|r| r.name != name && !(nested && is_descendant(&r.name, name)));
        Ok(())
    }

    fn rename(&mut self, name: &str, new_name: &str, category: Category) -> Result<(), BackendError> {
        self.check_writable(category)?;
        let store = self.stores.entry(category).or_default();
        if store.iter().any(|r| r.name == new_name) {
            return Err(BackendError::ObjectExists {
                name: new_name.to_string(),
                category: category.to_string(),
            });
        }
        if !store.iter().any(|r| r.name == name) {
            return Err(BackendError::NoSuchObject {
                name: name.to_string(),
                category: category.to_string(),
            });
        }
        let nested = category == Category::Zones;
        for record in store.iter_mut() {
            if record.name == name {
                record.name = new_name.to_string();
            } else if nested && is_descendant(&record.name, name) {
                let prefix = &record.name[..record.name.len() - name.len()];
                record.name = format!("{prefix}{new_name}");
            }
        }
        Ok(())
    }
}

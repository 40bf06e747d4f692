//! Storage backend protocol
//!
//! Every object collection reads and writes its category through the
//! [`Backend`] trait. Engines are statically linked and picked by name at
//! startup through the [`registry::BackendRegistry`], which hands out
//! reference-counted [`BackendHandle`]s.
//!
//! - [`memory`]: in-memory engine (tests, dry runs)
//! - [`textdir`]: directory-of-text-files engine
//! - [`lock`]: bounded-retry exclusive lock used by the textdir engine

pub mod lock;
pub mod memory;
pub mod registry;
pub mod textdir;

use crate::core::error::BackendError;
use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

pub use memory::MemoryBackend;
pub use registry::BackendRegistry;
pub use textdir::TextdirBackend;

/// Logical data category an object lives in
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Category {
    #[strum(serialize = "zones")]
    Zones,
    #[strum(serialize = "services")]
    Services,
    #[strum(serialize = "interfaces")]
    Interfaces,
    #[strum(serialize = "rules")]
    Rules,
}

/// Subtype reported by `list` and required by `add`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ObjectKind {
    Zone,
    Network,
    Host,
    Group,
    Service,
    Interface,
    Rule,
}

/// One item yielded by [`Backend::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub kind: ObjectKind,
}

impl ListEntry {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Finite, single-pass sequence of listed objects
pub type ListIter<'a> = Box<dyn Iterator<Item = ListEntry> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// Engine-wide settings applied by [`Backend::conf`]
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Root directory for file based engines
    pub root: PathBuf,
    /// Ceiling for lock acquisition
    pub lock_timeout: Duration,
    /// Delay between lock attempts
    pub lock_retry: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            lock_timeout: Duration::from_secs(10),
            lock_retry: Duration::from_millis(250),
        }
    }
}

/// The storage protocol every engine implements.
///
/// Read operations (`list`, `ask`) work without `open`; every write
/// (`tell`, `add`, `del`, `rename`) requires the category to be open in
/// [`OpenMode::Write`].
pub trait Backend: fmt::Debug {
    /// Engine name as used in the configuration
    fn name(&self) -> &'static str;

    /// Applies engine-wide configuration.
    fn conf(&mut self, settings: &BackendSettings) -> Result<(), BackendError>;

    fn open(&mut self, mode: OpenMode, category: Category) -> Result<(), BackendError>;

    fn close(&mut self, category: Category) -> Result<(), BackendError>;

    /// Creates empty storage for `category`; running it twice is harmless.
    fn init(&mut self, category: Category) -> Result<(), BackendError>;

    /// Enumerates the objects of `category`.
    fn list(&mut self, category: Category) -> Result<ListIter<'_>, BackendError>;

    /// Every value stored for `attribute` of `name`, in storage order.
    ///
    /// Single-valued attributes yield at most one element; repeating ones
    /// (`RULE`, `MEMBER`, `INTERFACE`) yield one per stored line. An
    /// attribute that was never set yields an empty vector.
    fn ask(
        &mut self,
        name: &str,
        attribute: &str,
        category: Category,
    ) -> Result<Vec<String>, BackendError>;

    /// Names of the attributes stored for `name`, each listed once.
    fn attributes(&mut self, name: &str, category: Category) -> Result<Vec<String>, BackendError>;

    /// Stores `value` for `attribute`; `overwrite` replaces every previous
    /// value, otherwise `value` is appended. Overwriting with an empty value
    /// clears the attribute.
    fn tell(
        &mut self,
        name: &str,
        attribute: &str,
        value: &str,
        overwrite: bool,
        category: Category,
    ) -> Result<(), BackendError>;

    fn add(&mut self, name: &str, kind: ObjectKind, category: Category)
    -> Result<(), BackendError>;

    fn del(&mut self, name: &str, category: Category, recursive: bool)
    -> Result<(), BackendError>;

    fn rename(
        &mut self,
        name: &str,
        new_name: &str,
        category: Category,
    ) -> Result<(), BackendError>;

    /// First stored value of `attribute`, if any.
    fn ask_one(
        &mut self,
        name: &str,
        attribute: &str,
        category: Category,
    ) -> Result<Option<String>, BackendError> {
        Ok(self.ask(name, attribute, category)?.into_iter().next())
    }

    /// Replaces all values of a repeating attribute with `values`.
    fn tell_all(
        &mut self,
        name: &str,
        attribute: &str,
        values: &[String],
        category: Category,
    ) -> Result<(), BackendError> {
        self.tell(name, attribute, "", true, category)?;
        for value in values {
            self.tell(name, attribute, value, false, category)?;
        }
        Ok(())
    }
}

/// Shared handle to a loaded engine
pub type BackendHandle = Rc<RefCell<Box<dyn Backend>>>;

/// Runs `f` with `category` opened for writing and closes it afterwards,
/// whether `f` succeeded or not.
pub fn with_write<T>(
    handle: &BackendHandle,
    category: Category,
    f: impl FnOnce(&mut dyn Backend) -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    let mut backend = handle.borrow_mut();
    backend.open(OpenMode::Write, category)?;
    let result = f(&mut **backend);
    let closed = backend.close(category);
    let value = result?;
    closed?;
    Ok(value)
}

/// Parses the `Yes`/`No` flags used by persisted attributes.
pub fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value.map(str::trim) {
        Some(v) if v.eq_ignore_ascii_case("yes") || v == "1" || v.eq_ignore_ascii_case("true") => {
            true
        }
        Some(v) if v.eq_ignore_ascii_case("no") || v == "0" || v.eq_ignore_ascii_case("false") => {
            false
        }
        _ => default,
    }
}

pub const fn flag(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some("Yes"), false));
        assert!(parse_flag(Some("yes "), false));
        assert!(!parse_flag(Some("No"), true));
        assert!(parse_flag(None, true));
        assert!(!parse_flag(Some("maybe"), false));
    }

    #[test]
    fn test_object_kind_names() {
        assert_eq!(ObjectKind::Network.as_ref(), "network");
        assert_eq!("group".parse::<ObjectKind>().unwrap(), ObjectKind::Group);
        assert_eq!(Category::Services.to_string(), "services");
    }

    #[test]
    fn test_with_write_closes_on_error() {
        let mut memory = MemoryBackend::new();
        memory.init(Category::Zones).unwrap();
        let handle: BackendHandle = Rc::new(RefCell::new(Box::new(memory)));

        let result = with_write(&handle, Category::Zones, |b| {
            b.tell("missing", "ACTIVE", "Yes", true, Category::Zones)
        });
        assert!(matches!(result, Err(BackendError::NoSuchObject { .. })));

        // closed again: a bare write must be refused
        let result = handle
            .borrow_mut()
            .add("dmz", ObjectKind::Zone, Category::Zones);
        assert!(matches!(result, Err(BackendError::NotOpen { .. })));
    }
}

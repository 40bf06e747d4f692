//! Directory-of-text-files storage engine
//!
//! # Layout
//!
//! ```text
//! <root>/zones/<zone>/zone.config
//! <root>/zones/<zone>/networks/<net>/network.config
//! <root>/zones/<zone>/networks/<net>/hosts/<host>.host
//! <root>/zones/<zone>/networks/<net>/groups/<group>.group
//! <root>/services/<service>
//! <root>/interfaces/<interface>.conf
//! <root>/rules/<name>.conf
//! ```
//!
//! Every file is a list of `KEY="value"` lines. A key may repeat, which is how
//! multi-valued attributes (rules, members, interfaces) are stored. Lines
//! starting with `#` are comments and survive rewrites.
//!
//! # Safety
//!
//! - Writes go through a temp file in the same directory followed by an
//!   atomic rename, with mode 0o600
//! - Rule files carry a SHA-256 sidecar; a mismatch on read is logged, not fatal
//! - Write sessions hold an exclusive lock on `<root>/.lock`

use super::lock::DirLock;
use super::{Backend, BackendSettings, Category, ListEntry, ListIter, ObjectKind, OpenMode};
use crate::core::error::BackendError;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

#[derive(Debug, Default)]
pub struct TextdirBackend {
    settings: BackendSettings,
    writable: HashSet<Category>,
    lock: Option<DirLock>,
}

/// Resolved location of one object
#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    /// File holding the attributes
    file: PathBuf,
    /// Directory owned by the object (zones and networks), removed on delete
    dir: Option<PathBuf>,
}

impl TextdirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            settings: BackendSettings {
                root: root.into(),
                ..BackendSettings::default()
            },
            writable: HashSet::new(),
            lock: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    fn category_dir(&self, category: Category) -> PathBuf {
        self.settings.root.join(category.as_ref())
    }

    fn no_such(name: &str, category: Category) -> BackendError {
        BackendError::NoSuchObject {
            name: name.to_string(),
            category: category.to_string(),
        }
    }

    /// Maps an object name onto its files. `kind` disambiguates hosts from
    /// groups when the object does not exist yet.
    fn locate(
        &self,
        name: &str,
        category: Category,
        kind: Option<ObjectKind>,
    ) -> Result<Location, BackendError> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(BackendError::Other(format!("invalid object name '{name}'")));
        }
        let base = self.category_dir(category);
        match category {
            Category::Services => Ok(Location {
                file: base.join(name),
                dir: None,
            }),
            Category::Interfaces | Category::Rules => Ok(Location {
                file: base.join(format!("{name}.conf")),
                dir: None,
            }),
            Category::Zones => {
                let parts: Vec<&str> = name.split('.').collect();
                match parts.as_slice() {
                    [zone] => {
                        let dir = base.join(zone);
                        Ok(Location {
                            file: dir.join("zone.config"),
                            dir: Some(dir),
                        })
                    }
                    [net, zone] => {
                        let dir = base.join(zone).join("networks").join(net);
                        Ok(Location {
                            file: dir.join("network.config"),
                            dir: Some(dir),
                        })
                    }
                    [leaf, net, zone] => {
                        let net_dir = base.join(zone).join("networks").join(net);
                        let host = net_dir.join("hosts").join(format!("{leaf}.host"));
                        let group = net_dir.join("groups").join(format!("{leaf}.group"));
                        let file = match kind {
                            Some(ObjectKind::Host) => host,
                            Some(ObjectKind::Group) => group,
                            _ if group.exists() && !host.exists() => group,
                            _ => host,
                        };
                        Ok(Location { file, dir: None })
                    }
                    _ => Err(BackendError::Other(format!("invalid zone name '{name}'"))),
                }
            }
        }
    }

    fn existing(&self, name: &str, category: Category) -> Result<Location, BackendError> {
        let location = self.locate(name, category, None)?;
        if location.file.is_file() {
            Ok(location)
        } else {
            Err(Self::no_such(name, category))
        }
    }

    fn check_writable(&self, category: Category) -> Result<(), BackendError> {
        if self.writable.contains(&category) {
            Ok(())
        } else {
            Err(BackendError::NotOpen {
                category: category.to_string(),
            })
        }
    }

    fn list_zones(&self) -> Result<Vec<ListEntry>, BackendError> {
        let mut entries = Vec::new();
        for zone in sorted_dirs(&self.category_dir(Category::Zones))? {
            let zone_dir = self.category_dir(Category::Zones).join(&zone);
            if !zone_dir.join("zone.config").is_file() {
                continue;
            }
            entries.push(ListEntry::new(zone.clone(), ObjectKind::Zone));
            for net in sorted_dirs(&zone_dir.join("networks"))? {
                let net_dir = zone_dir.join("networks").join(&net);
                if !net_dir.join("network.config").is_file() {
                    continue;
                }
                entries.push(ListEntry::new(format!("{net}.{zone}"), ObjectKind::Network));
                for host in sorted_files(&net_dir.join("hosts"), Some("host"))? {
                    entries.push(ListEntry::new(
                        format!("{host}.{net}.{zone}"),
                        ObjectKind::Host,
                    ));
                }
                for group in sorted_files(&net_dir.join("groups"), Some("group"))? {
                    entries.push(ListEntry::new(
                        format!("{group}.{net}.{zone}"),
                        ObjectKind::Group,
                    ));
                }
            }
        }
        Ok(entries)
    }

    fn write_lines(&self, path: &Path, lines: &[String], category: Category) -> Result<(), BackendError> {
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        atomic_write(path, content.as_bytes())?;
        if category == Category::Rules {
            let checksum = sha256_hex(content.as_bytes());
            atomic_write(&checksum_path(path), checksum.as_bytes())?;
        }
        Ok(())
    }

    fn read_lines(&self, path: &Path, category: Category) -> Result<Vec<String>, BackendError> {
        let content = fs::read_to_string(path)?;
        if category == Category::Rules {
            verify_checksum(path, &content);
        }
        Ok(content.lines().map(str::to_string).collect())
    }
}

impl Backend for TextdirBackend {
    fn name(&self) -> &'static str {
        "textdir"
    }

    fn conf(&mut self, settings: &BackendSettings) -> Result<(), BackendError> {
        if self.lock.is_some() {
            return Err(BackendError::Other(
                "cannot reconfigure while a write session is open".into(),
            ));
        }
        self.settings = settings.clone();
        tracing::debug!("textdir root set to {}", self.settings.root.display());
        Ok(())
    }

    fn open(&mut self, mode: OpenMode, category: Category) -> Result<(), BackendError> {
        if mode == OpenMode::Read {
            return if self.category_dir(category).is_dir() {
                Ok(())
            } else {
                Err(Self::no_such(category.as_ref(), category))
            };
        }
        if self.lock.is_none() {
            fs::create_dir_all(&self.settings.root)?;
            let lock = DirLock::acquire(
                &self.settings.root.join(LOCK_FILE),
                self.settings.lock_timeout,
                self.settings.lock_retry,
            )?;
            self.lock = Some(lock);
        }
        self.writable.insert(category);
        Ok(())
    }

    fn close(&mut self, category: Category) -> Result<(), BackendError> {
        self.writable.remove(&category);
        if self.writable.is_empty() && self.lock.take().is_some() {
            tracing::debug!("Released textdir lock");
        }
        Ok(())
    }

    fn init(&mut self, category: Category) -> Result<(), BackendError> {
        let dir = self.category_dir(category);
        fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    fn list(&mut self, category: Category) -> Result<ListIter<'_>, BackendError> {
        let dir = self.category_dir(category);
        let entries = match category {
            Category::Zones => self.list_zones()?,
            Category::Services => sorted_files(&dir, None)?
                .into_iter()
                .map(|n| ListEntry::new(n, ObjectKind::Service))
                .collect(),
            Category::Interfaces => sorted_files(&dir, Some("conf"))?
                .into_iter()
                .map(|n| ListEntry::new(n, ObjectKind::Interface))
                .collect(),
            Category::Rules => sorted_files(&dir, Some("conf"))?
                .into_iter()
                .map(|n| ListEntry::new(n, ObjectKind::Rule))
                .collect(),
        };
        Ok(Box::new(entries.into_iter()))
    }

    fn ask(
        &mut self,
        name: &str,
        attribute: &str,
        category: Category,
    ) -> Result<Vec<String>, BackendError> {
        let location = self.existing(name, category)?;
        let lines = self.read_lines(&location.file, category)?;
        Ok(lines
            .iter()
            .filter_map(|line| parse_line(line))
            .filter(|(key, _)| *key == attribute)
            .map(|(_, value)| value.to_string())
            .collect())
    }

    fn attributes(&mut self, name: &str, category: Category) -> Result<Vec<String>, BackendError> {
        let location = self.existing(name, category)?;
        let lines = self.read_lines(&location.file, category)?;
        let mut keys: Vec<String> = Vec::new();
        for (key, _) in lines.iter().filter_map(|line| parse_line(line)) {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
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
        if value.contains('\n') || attribute.contains('=') || attribute.is_empty() {
            return Err(BackendError::Other(format!(
                "refusing to store malformed {attribute} for '{name}'"
            )));
        }
        let location = self.existing(name, category)?;
        let mut lines = self.read_lines(&location.file, category)?;
        let is_key = |line: &String| parse_line(line).is_some_and(|(k, _)| k == attribute);
        let new_line = format!("{attribute}=\"{value}\"");

        if overwrite {
            let first = lines.iter().position(is_key);
            lines.retain(|l| !is_key(l));
            if !value.is_empty() {
                let at = first.unwrap_or(lines.len()).min(lines.len());
                lines.insert(at, new_line);
            }
        } else {
            let at = lines.iter().rposition(is_key).map_or(lines.len(), |p| p + 1);
            lines.insert(at, new_line);
        }
        self.write_lines(&location.file, &lines, category)
    }

    fn add(&mut self, name: &str, kind: ObjectKind, category: Category) -> Result<(), BackendError> {
        self.check_writable(category)?;
        let location = self.locate(name, category, Some(kind))?;
        let exists = match category {
            Category::Zones => {
                let alt = self.locate(name, category, None)?;
                location.file.exists() || alt.file.exists()
            }
            _ => location.file.exists(),
        };
        if exists {
            return Err(BackendError::ObjectExists {
                name: name.to_string(),
                category: category.to_string(),
            });
        }
        if category == Category::Zones && name.contains('.') {
            let parent = name.split_once('.').map_or("", |(_, p)| p);
            self.existing(parent, category)?;
        }
        if let Some(parent) = location.file.parent() {
            fs::create_dir_all(parent)?;
        }
        let header = vec![format!("# {} {}", kind.as_ref(), name)];
        self.write_lines(&location.file, &header, category)?;
        tracing::debug!("textdir: added {} '{}'", kind.as_ref(), name);
        Ok(())
    }

    fn del(&mut self, name: &str, category: Category, recursive: bool) -> Result<(), BackendError> {
        self.check_writable(category)?;
        let location = self.existing(name, category)?;
        if let Some(dir) = &location.dir {
            let has_children = fs::read_dir(dir)?
                .flatten()
                .any(|e| e.path().is_dir() && dir_has_files(&e.path()));
            if has_children && !recursive {
                return Err(BackendError::HasChildren {
                    name: name.to_string(),
                    category: category.to_string(),
                });
            }
            fs::remove_dir_all(dir)?;
        } else {
            fs::remove_file(&location.file)?;
            let sidecar = checksum_path(&location.file);
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
        }
        tracing::debug!("textdir: deleted '{}' from {}", name, category);
        Ok(())
    }

    fn rename(&mut self, name: &str, new_name: &str, category: Category) -> Result<(), BackendError> {
        self.check_writable(category)?;
        let from = self.existing(name, category)?;
        if category == Category::Zones
            && name.split_once('.').map(|(_, p)| p) != new_name.split_once('.').map(|(_, p)| p)
        {
            return Err(BackendError::Other(format!(
                "'{name}' can only be renamed within its parent"
            )));
        }
        let kind = if from.file.extension().is_some_and(|e| e == "group") {
            Some(ObjectKind::Group)
        } else {
            Some(ObjectKind::Host)
        };
        let to = self.locate(new_name, category, kind)?;
        if to.file.exists() || to.dir.as_ref().is_some_and(|d| d.exists()) {
            return Err(BackendError::ObjectExists {
                name: new_name.to_string(),
                category: category.to_string(),
            });
        }
        match (&from.dir, &to.dir) {
            (Some(old_dir), Some(new_dir)) => fs::rename(old_dir, new_dir)?,
            _ => {
                fs::rename(&from.file, &to.file)?;
                let sidecar = checksum_path(&from.file);
                if sidecar.exists() {
                    fs::rename(sidecar, checksum_path(&to.file))?;
                }
            }
        }
        tracing::debug!("textdir: renamed '{}' to '{}' in {}", name, new_name, category);
        Ok(())
    }
}

/// Splits `KEY="value"` (quotes optional); comments and blank lines yield `None`.
///
/// The value runs from the first quote to the last one on the line, so
/// quotes inside the value need no escaping at this layer.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, raw) = line.split_once('=')?;
    let raw = raw.trim();
    let value = match (raw.find('"'), raw.rfind('"')) {
        (Some(first), Some(last)) if first == 0 && last > first => &raw[first + 1..last],
        _ => raw,
    };
    Some((key.trim(), value))
}

fn sorted_dirs(dir: &Path) -> Result<Vec<String>, BackendError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(dir)?
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    Ok(names)
}

/// Plain files in `dir`, optionally filtered by extension (which is stripped).
fn sorted_files(dir: &Path, extension: Option<&str>) -> Result<Vec<String>, BackendError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') || file_name.ends_with(".tmp") || file_name.ends_with(".sha256") {
            continue;
        }
        match extension {
            Some(ext) => {
                if path.extension().and_then(|s| s.to_str()) == Some(ext)
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                {
                    names.push(stem.to_string());
                }
            }
            None => names.push(file_name.to_string()),
        }
    }
    names.sort();
    Ok(names)
}

fn dir_has_files(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn verify_checksum(path: &Path, content: &str) {
    if let Ok(expected) = fs::read_to_string(checksum_path(path)) {
        let actual = sha256_hex(content.as_bytes());
        if expected.trim() != actual {
            // Don't fail - the file may have been edited by hand
            tracing::warn!(
                "{} checksum mismatch (expected: {}, got: {})",
                path.display(),
                expected.trim(),
                actual
            );
        }
    }
}

/// Temp file in the target directory, restrictive permissions, then rename.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), BackendError> {
    let dir = path
        .parent()
        .ok_or_else(|| BackendError::Other(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| BackendError::Io(e.error))?;
    Ok(())
}

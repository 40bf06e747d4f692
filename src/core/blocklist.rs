//! Always-blocked addresses and hosts/groups
//!
//! Persisted as `RULE` lines of the `blocklist` object in the rules
//! category, one `block <item>` per entry. Blocking a host or group bumps its
//! `refcnt_blocklist`, which keeps it from being deleted.

use crate::collections::NodeRef;
use crate::core::error::{Error, Result};
use crate::core::zones::{ZoneKind, Zones};
use ipnetwork::IpNetwork;
use std::fmt;
use tracing::warn;

/// Keyword prefixing every persisted blocklist line
pub const BLOCK_KEYWORD: &str = "block";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEntry {
    /// Address or network
    Ip(IpNetwork),
    /// Host or group, by full name
    Zone { name: String, handle: NodeRef },
}

impl BlockEntry {
    pub fn item(&self) -> String {
        match self {
            BlockEntry::Ip(net) if net.prefix() == max_prefix(net) => net.ip().to_string(),
            BlockEntry::Ip(net) => net.to_string(),
            BlockEntry::Zone { name, .. } => name.clone(),
        }
    }

    /// `true` if `item` (an address, network or zone name) denotes this entry.
    pub fn matches(&self, item: &str) -> bool {
        let item = item.trim();
        match self {
            BlockEntry::Ip(net) => item.parse::<IpNetwork>().is_ok_and(|other| other == *net),
            BlockEntry::Zone { name, .. } => name == item,
        }
    }
}

fn max_prefix(net: &IpNetwork) -> u8 {
    match net {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    }
}

impl fmt::Display for BlockEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BLOCK_KEYWORD} {}", self.item())
    }
}

#[derive(Debug, Default)]
pub struct Blocklist {
    entries: Vec<BlockEntry>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads persisted lines. Entries that don't resolve are logged and
    /// skipped; returns how many were skipped.
    pub fn load<I, S>(&mut self, lines: I, zones: &mut Zones) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut skipped = 0;
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let item = line
                .strip_prefix(BLOCK_KEYWORD)
                .map_or(line, str::trim_start);
            match self.resolve(item, zones) {
                Ok(entry) => self.insert(entry, zones),
                Err(e) => {
                    warn!("Skipping blocklist entry '{}': {}", line, e);
                    skipped += 1;
                }
            }
        }
        skipped
    }

    /// Turns `item` into an entry without changing anything.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyExists`] if the item is already blocked
    /// - [`Error::NotFound`] if it's neither an address nor a known zone
    /// - [`Error::Validation`] if it names a zone or network
    pub fn resolve(&self, item: &str, zones: &Zones) -> Result<BlockEntry> {
        let item = item.trim();
        if item.is_empty() {
            return Err(Error::validation("blocklist", "empty item"));
        }
        if self.contains(item) {
            return Err(Error::AlreadyExists {
                what: "blocklist entry",
                name: item.to_string(),
            });
        }
        if let Ok(net) = item.parse::<IpNetwork>() {
            return Ok(BlockEntry::Ip(net));
        }
        let (handle, zone) = zones.lookup(item).ok_or_else(|| Error::NotFound {
            what: "host or group",
            name: item.to_string(),
        })?;
        if !matches!(zone.kind, ZoneKind::Host | ZoneKind::Group) {
            return Err(Error::validation(
                "blocklist",
                format!("'{item}' is a {}, only hosts and groups can be blocked", zone.kind),
            ));
        }
        Ok(BlockEntry::Zone {
            name: zone.name.clone(),
            handle,
        })
    }

    /// Stores a resolved entry, taking a blocklist reference on zones.
    pub fn insert(&mut self, entry: BlockEntry, zones: &mut Zones) {
        if let BlockEntry::Zone { handle, .. } = &entry
            && let Some(zone) = zones.get_mut(*handle)
        {
            zone.refcnt_blocklist += 1;
        }
        self.entries.push(entry);
    }

    /// Removes `item`, releasing its blocklist reference.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the item is not blocked.
    pub fn remove(&mut self, item: &str, zones: &mut Zones) -> Result<BlockEntry> {
        let index = self
            .position(item.trim())
            .ok_or_else(|| Error::NotFound {
                what: "blocklist entry",
                name: item.to_string(),
            })?;
        let entry = self.entries.remove(index);
        if let BlockEntry::Zone { handle, .. } = &entry
            && let Some(zone) = zones.get_mut(*handle)
        {
            zone.refcnt_blocklist = zone.refcnt_blocklist.saturating_sub(1);
        }
        Ok(entry)
    }

    fn position(&self, item: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.matches(item))
    }

    pub fn contains(&self, item: &str) -> bool {
        self.position(item.trim()).is_some()
    }

    /// Follows a zone rename; returns `true` if an entry changed.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for entry in &mut self.entries {
            if let BlockEntry::Zone { name, .. } = entry
                && name == old
            {
                *name = new.to_string();
                changed = true;
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

//! Zone-family objects and their scoped ordering
//!
//! Names are dotted, innermost first: `host.network.zone`. The collection
//! keeps every entry in hierarchy order so a plain walk visits a zone, then
//! each of its networks with that network's hosts and groups:
//!
//! ```text
//! dmz
//! lan.dmz
//! srv1.lan.dmz      (hosts, alphabetical)
//! srv2.lan.dmz
//! web.lan.dmz       (groups, alphabetical)
//! wan.dmz
//! ext
//! firewall(eth0)    (pseudo-zones last)
//! ```
//!
//! Parents are non-owning [`NodeRef`]s into the same list. Activity is never
//! cached: [`Zones::is_active`] walks the parent chain every time.

use crate::collections::{List, NodeRef};
use crate::core::Status;
use crate::core::error::{Error, Result};
use crate::core::interfaces::Interfaces;
use crate::core::rules::Rule;
use ipnetwork::{Ipv4Network, Ipv6Network};
use std::cmp::Ordering;
use std::net::IpAddr;

/// Prefix used for the pseudo-zones that stand for the firewall itself
pub const FIREWALL_PREFIX: &str = "firewall";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum ZoneKind {
    Zone,
    Network,
    Host,
    Group,
    Firewall,
}

impl ZoneKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ZoneKind::Zone => "zone",
            ZoneKind::Network => "network",
            ZoneKind::Host => "host",
            ZoneKind::Group => "group",
            ZoneKind::Firewall => "firewall",
        }
    }

    /// Number of dotted components a name of this kind has
    pub const fn depth(self) -> usize {
        match self {
            ZoneKind::Zone | ZoneKind::Firewall => 1,
            ZoneKind::Network => 2,
            ZoneKind::Host | ZoneKind::Group => 3,
        }
    }
}

impl From<ZoneKind> for crate::backend::ObjectKind {
    fn from(kind: ZoneKind) -> Self {
        use crate::backend::ObjectKind;
        match kind {
            ZoneKind::Zone | ZoneKind::Firewall => ObjectKind::Zone,
            ZoneKind::Network => ObjectKind::Network,
            ZoneKind::Host => ObjectKind::Host,
            ZoneKind::Group => ObjectKind::Group,
        }
    }
}

#[derive(Debug)]
pub struct Zone {
    pub name: String,
    pub kind: ZoneKind,
    pub active: bool,
    pub status: Status,

    /// Network address for networks, `/32` for hosts and firewall entries
    pub ipv4: Option<Ipv4Network>,
    pub ipv6: Option<Ipv6Network>,
    pub mac: Option<String>,
    pub comment: String,

    pub zone_parent: Option<NodeRef>,
    pub network_parent: Option<NodeRef>,

    /// Groups: member hosts
    pub members: List<NodeRef>,
    /// Networks: attached interfaces (handles into [`Interfaces`])
    pub interfaces: List<NodeRef>,
    /// Networks: protect rules
    pub protect_rules: List<Rule>,
    /// Firewall pseudo-zones: the interface they stand for
    pub interface: Option<NodeRef>,

    pub refcnt_group: u32,
    pub refcnt_blocklist: u32,
}

impl Zone {
    pub fn new(name: impl Into<String>, kind: ZoneKind) -> Self {
        Self {
            name: name.into(),
            kind,
            active: true,
            status: Status::Unknown,
            ipv4: None,
            ipv6: None,
            mac: None,
            comment: String::new(),
            zone_parent: None,
            network_parent: None,
            members: List::new(),
            interfaces: List::new(),
            protect_rules: List::new(),
            interface: None,
            refcnt_group: 0,
            refcnt_blocklist: 0,
        }
    }

    /// First dotted component (the host, group, network or zone itself)
    pub fn short_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Name of the enclosing network/zone, `None` for top-level entries
    pub fn parent_name(&self) -> Option<&str> {
        match self.kind {
            ZoneKind::Zone | ZoneKind::Firewall => None,
            _ => self.name.split_once('.').map(|(_, parent)| parent),
        }
    }

    /// `(zone, network, leaf)` components, absent parts empty
    pub fn components(&self) -> (&str, &str, &str) {
        let parts: Vec<&str> = self.name.split('.').collect();
        match parts.as_slice() {
            [leaf, net, zone] => (zone, net, leaf),
            [net, zone] => (zone, net, ""),
            _ => (self.name.as_str(), "", ""),
        }
    }

    /// Every address the lookup index keys this entry under
    pub fn addresses(&self) -> Vec<IpAddr> {
        if !matches!(self.kind, ZoneKind::Host | ZoneKind::Firewall) {
            return Vec::new();
        }
        let mut out = Vec::new();
        if let Some(v4) = self.ipv4 {
            out.push(IpAddr::V4(v4.ip()));
        }
        if let Some(v6) = self.ipv6 {
            out.push(IpAddr::V6(v6.ip()));
        }
        out
    }

    pub fn is_firewall(&self) -> bool {
        self.kind == ZoneKind::Firewall
    }
}

/// Sort key mirroring the nested scope layout
fn order_key(zone: &Zone) -> (u8, &str, &str, u8, &str) {
    if zone.kind == ZoneKind::Firewall {
        return (1, zone.name.as_str(), "", 0, "");
    }
    let (z, net, leaf) = zone.components();
    let rank = match zone.kind {
        ZoneKind::Host => 1,
        ZoneKind::Group => 2,
        _ => 0,
    };
    (0, z, net, rank, leaf)
}

fn scope_order(a: &Zone, b: &Zone) -> Ordering {
    order_key(a).cmp(&order_key(b))
}

/// Builds the pseudo-zone name for an interface
pub fn firewall_zone_name(interface: &str) -> String {
    format!("{FIREWALL_PREFIX}({interface})")
}

/// Ordered collection of zone-family objects
#[derive(Debug, Default)]
pub struct Zones {
    list: List<Zone>,
}

impl Zones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, handle: NodeRef) -> Option<&Zone> {
        self.list.get(handle)
    }

    pub fn get_mut(&mut self, handle: NodeRef) -> Option<&mut Zone> {
        self.list.get_mut(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &Zone)> + '_ {
        self.list.iter()
    }

    /// Linear scan by full name.
    pub fn search(&self, name: &str) -> Option<NodeRef> {
        self.list.find(|z| z.name == name)
    }

    /// Like [`Zones::search`], failing with [`Error::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no entry has that name.
    pub fn require(&self, name: &str) -> Result<NodeRef> {
        self.search(name).ok_or_else(|| Error::NotFound {
            what: "zone",
            name: name.to_string(),
        })
    }

    /// Handle and value in one step, for callers that need both.
    pub fn lookup(&self, name: &str) -> Option<(NodeRef, &Zone)> {
        self.list.iter().find(|(_, z)| z.name == name)
    }

    fn link_parents(&self, zone: &mut Zone) -> Result<()> {
        match zone.kind {
            ZoneKind::Zone | ZoneKind::Firewall => {}
            ZoneKind::Network => {
                let parent = zone.parent_name().unwrap_or_default();
                let (handle, parent_zone) = self.lookup(parent).ok_or_else(|| Error::NotFound {
                    what: "zone",
                    name: parent.to_string(),
                })?;
                if parent_zone.kind != ZoneKind::Zone {
                    return Err(Error::validation(&zone.name, "parent is not a zone"));
                }
                zone.zone_parent = Some(handle);
            }
            ZoneKind::Host | ZoneKind::Group => {
                let network = zone.parent_name().unwrap_or_default();
                let (net_handle, net) = self.lookup(network).ok_or_else(|| Error::NotFound {
                    what: "network",
                    name: network.to_string(),
                })?;
                if net.kind != ZoneKind::Network {
                    return Err(Error::validation(&zone.name, "parent is not a network"));
                }
                zone.network_parent = Some(net_handle);
                zone.zone_parent = net.zone_parent;
            }
        }
        Ok(())
    }

    /// Inserts `zone` at its scope position, linking it to its parents.
    ///
    /// The scan stops at the first entry that sorts after the new one, which
    /// is always the first entry that either leaves the new entry's scope or
    /// is a same-kind sibling with a greater name. Pseudo-zones go last.
    ///
    /// # Errors
    ///
    /// Fails without mutating anything if a parent can't be resolved, or
    /// if the name is taken.
    pub fn insert_sorted(&mut self, mut zone: Zone) -> Result<NodeRef> {
        if self.search(&zone.name).is_some() {
            return Err(Error::AlreadyExists {
                what: zone.kind.as_str(),
                name: zone.name,
            });
        }
        self.link_parents(&mut zone)?;

        let key = order_key(&zone);
        let before = self
            .list
            .iter()
            .find(|(_, existing)| order_key(existing) > key)
            .map(|(handle, _)| handle);

        let handle = match before {
            Some(at) => self.list.insert_before(Some(at), zone)?,
            None => self.list.append(zone),
        };
        Ok(handle)
    }

    /// Removes an entry and hands it back. Reference counts are the
    /// caller's responsibility.
    ///
    /// # Errors
    ///
    /// Returns an error for stale handles.
    pub fn take(&mut self, handle: NodeRef) -> Result<Zone> {
        Ok(self.list.take(handle)?)
    }

    /// `true` only if the entry and every ancestor are active.
    pub fn is_active(&self, handle: NodeRef) -> bool {
        let Some(zone) = self.list.get(handle) else {
            return false;
        };
        if !zone.active {
            return false;
        }
        match zone.network_parent.or(zone.zone_parent) {
            Some(parent) => self.is_active(parent),
            None => true,
        }
    }

    /// Every entry nested below `handle`, deepest first.
    pub fn descendants(&self, handle: NodeRef) -> Vec<NodeRef> {
        let mut out: Vec<(usize, NodeRef)> = self
            .list
            .iter()
            .filter(|(h, z)| {
                *h != handle && (z.zone_parent == Some(handle) || z.network_parent == Some(handle))
            })
            .map(|(h, z)| (z.kind.depth(), h))
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0));
        out.into_iter().map(|(_, h)| h).collect()
    }

    /// Hosts living in the given network.
    pub fn hosts_in(&self, network: NodeRef) -> Vec<NodeRef> {
        self.list
            .iter()
            .filter(|(_, z)| z.kind == ZoneKind::Host && z.network_parent == Some(network))
            .map(|(h, _)| h)
            .collect()
    }

    /// Groups that list `host` as a member.
    pub fn groups_containing(&self, host: NodeRef) -> Vec<NodeRef> {
        self.list
            .iter()
            .filter(|(_, z)| z.kind == ZoneKind::Group && z.members.values().any(|m| *m == host))
            .map(|(h, _)| h)
            .collect()
    }

    /// Checks that `host` may join `group` without changing anything.
    ///
    /// # Errors
    ///
    /// Fails if the handles have the wrong kinds, the host lives in another
    /// network, or it is already a member.
    pub fn check_member(&self, group: NodeRef, host: NodeRef) -> Result<()> {
        let host_zone = self.get(host).ok_or_else(|| Error::Parameter("stale host handle".into()))?;
        let group_zone = self.get(group).ok_or_else(|| Error::Parameter("stale group handle".into()))?;
        if host_zone.kind != ZoneKind::Host || group_zone.kind != ZoneKind::Group {
            return Err(Error::validation(
                &group_zone.name,
                format!("'{}' is not a host", host_zone.name),
            ));
        }
        if host_zone.network_parent != group_zone.network_parent {
            return Err(Error::validation(
                &group_zone.name,
                format!("'{}' is not in the group's network", host_zone.name),
            ));
        }
        if group_zone.members.values().any(|m| *m == host) {
            return Err(Error::AlreadyExists {
                what: "member",
                name: host_zone.name.clone(),
            });
        }
        Ok(())
    }

    /// Adds `host` to `group`, bumping the host's `refcnt_group`.
    ///
    /// # Errors
    ///
    /// See [`Zones::check_member`].
    pub fn add_member(&mut self, group: NodeRef, host: NodeRef) -> Result<()> {
        self.check_member(group, host)?;
        if let Some(g) = self.get_mut(group) {
            g.members.append(host);
        }
        if let Some(h) = self.get_mut(host) {
            h.refcnt_group += 1;
        }
        Ok(())
    }

    /// Drops `host` from `group`, releasing one `refcnt_group`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `host` is not a member.
    pub fn remove_member(&mut self, group: NodeRef, host: NodeRef) -> Result<()> {
        let group_zone = self
            .get_mut(group)
            .ok_or_else(|| Error::Parameter("stale group handle".into()))?;
        let node = group_zone
            .members
            .find(|m| *m == host)
            .ok_or_else(|| Error::NotFound {
                what: "member",
                name: host.to_string(),
            })?;
        group_zone.members.remove(node)?;
        if let Some(h) = self.get_mut(host) {
            h.refcnt_group = h.refcnt_group.saturating_sub(1);
        }
        Ok(())
    }

    /// Short names of a group's members, in membership order.
    pub fn member_names(&self, group: NodeRef) -> Vec<String> {
        self.get(group)
            .map(|g| {
                g.members
                    .values()
                    .filter_map(|m| self.get(*m))
                    .map(|h| h.short_name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Renames an entry and every descendant, then restores scope order.
    ///
    /// Handles stay valid. Returns `(old, new)` for every renamed entry.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] if the new name is taken.
    pub fn rename(&mut self, handle: NodeRef, new_name: &str) -> Result<Vec<(String, String)>> {
        if self.search(new_name).is_some() {
            return Err(Error::AlreadyExists {
                what: "zone",
                name: new_name.to_string(),
            });
        }
        let old_name = self
            .get(handle)
            .map(|z| z.name.clone())
            .ok_or_else(|| Error::Parameter("stale zone handle".into()))?;

        let mut renamed = Vec::new();
        for node in std::iter::once(handle).chain(self.descendants(handle)) {
            if let Some(zone) = self.get_mut(node) {
                let prefix_len = zone.name.len() - old_name.len();
                let new_full = format!("{}{}", &zone.name[..prefix_len], new_name);
                renamed.push((std::mem::replace(&mut zone.name, new_full.clone()), new_full));
                zone.status = Status::Changed;
            }
        }
        self.list.sort_by(scope_order);
        Ok(renamed)
    }

    /// Rebuilds the `firewall(<iface>)` pseudo-zones from the interfaces.
    ///
    /// One entry per interface that has an IPv4 address, placed after every
    /// regular scope. Returns the handles that were dropped so callers can
    /// purge them from lookup indexes first.
    pub fn sync_firewall_zones(&mut self, interfaces: &Interfaces) -> Vec<NodeRef> {
        let stale: Vec<NodeRef> = self
            .list
            .iter()
            .filter(|(_, z)| z.is_firewall())
            .map(|(h, _)| h)
            .collect();
        for handle in &stale {
            // handles come straight from the list
            let _ = self.list.take(*handle);
        }

        for (handle, iface) in interfaces.iter() {
            let Some(ip) = iface.ipv4 else {
                continue;
            };
            let mut zone = Zone::new(firewall_zone_name(&iface.name), ZoneKind::Firewall);
            zone.active = iface.active;
            zone.ipv4 = Ipv4Network::new(ip, 32).ok();
            zone.ipv6 = iface.ipv6.and_then(|v6| Ipv6Network::new(v6, 128).ok());
            zone.interface = Some(handle);
            zone.status = Status::Active;
            if let Err(e) = self.insert_sorted(zone) {
                tracing::warn!("Could not add firewall zone for '{}': {}", iface.name, e);
            }
        }
        stale
    }
}

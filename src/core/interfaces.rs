//! Firewall interfaces
//!
//! An interface names a kernel device and the addresses the firewall owns on
//! it. Networks attach interfaces (tracked by `refcnt_network`); interfaces
//! with an IPv4 address also appear as `firewall(<name>)` pseudo-zones.
//!
//! Interfaces marked `dynamic` take their addresses from the running system
//! via [`Interfaces::refresh_addresses`].

use crate::collections::{List, NodeRef};
use crate::core::Status;
use crate::core::error::{Error, Result};
use crate::core::rules::Rule;
use crate::utils::SystemInterface;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Value of `IPADDRESS` for interfaces whose address is assigned at runtime
pub const DYNAMIC_ADDRESS: &str = "dynamic";

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub active: bool,
    pub status: Status,
    /// Kernel device name, e.g. `eth0` or `eth0:1`
    pub device: String,
    pub is_virtual: bool,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub dynamic: bool,
    /// Device was present at the last refresh
    pub up: bool,
    pub protect_rules: List<Rule>,
    pub refcnt_network: u32,
    pub comment: String,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            status: Status::Unknown,
            device: String::new(),
            is_virtual: false,
            ipv4: None,
            ipv6: None,
            dynamic: false,
            up: false,
            protect_rules: List::new(),
            refcnt_network: 0,
            comment: String::new(),
        }
    }

    /// Applies a persisted `IPADDRESS` value (`dynamic`, an address, or empty).
    ///
    /// # Errors
    ///
    /// Returns a validation error for values that are none of the above.
    pub fn set_ipv4_text(&mut self, value: &str) -> Result<()> {
        let value = value.trim();
        if value.eq_ignore_ascii_case(DYNAMIC_ADDRESS) {
            self.dynamic = true;
            self.ipv4 = None;
        } else if value.is_empty() {
            self.dynamic = false;
            self.ipv4 = None;
        } else {
            let ip: Ipv4Addr = value
                .parse()
                .map_err(|_| Error::validation(&self.name, format!("invalid IPv4 address '{value}'")))?;
            self.dynamic = false;
            self.ipv4 = Some(ip);
        }
        Ok(())
    }

    /// Persisted form of the IPv4 address
    pub fn ipv4_text(&self) -> String {
        if self.dynamic {
            DYNAMIC_ADDRESS.to_string()
        } else {
            self.ipv4.map(|ip| ip.to_string()).unwrap_or_default()
        }
    }
}

/// Alphabetically ordered interface collection
#[derive(Debug, Default)]
pub struct Interfaces {
    list: List<Interface>,
}

impl Interfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, handle: NodeRef) -> Option<&Interface> {
        self.list.get(handle)
    }

    pub fn get_mut(&mut self, handle: NodeRef) -> Option<&mut Interface> {
        self.list.get_mut(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &Interface)> + '_ {
        self.list.iter()
    }

    pub fn search(&self, name: &str) -> Option<NodeRef> {
        self.list.find(|i| i.name == name)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no interface has that name.
    pub fn require(&self, name: &str) -> Result<NodeRef> {
        self.search(name).ok_or_else(|| Error::NotFound {
            what: "interface",
            name: name.to_string(),
        })
    }

    /// # Errors
    ///
    /// [`Error::AlreadyExists`] if the name is taken.
    pub fn insert_sorted(&mut self, interface: Interface) -> Result<NodeRef> {
        if self.search(&interface.name).is_some() {
            return Err(Error::AlreadyExists {
                what: "interface",
                name: interface.name,
            });
        }
        let before = self.list.find(|i| i.name > interface.name);
        Ok(match before {
            Some(at) => self.list.insert_before(Some(at), interface)?,
            None => self.list.append(interface),
        })
    }

    /// # Errors
    ///
    /// Returns an error for stale handles.
    pub fn take(&mut self, handle: NodeRef) -> Result<Interface> {
        Ok(self.list.take(handle)?)
    }

    /// # Errors
    ///
    /// [`Error::AlreadyExists`] if the new name is taken.
    pub fn rename(&mut self, handle: NodeRef, new_name: &str) -> Result<()> {
        if self.search(new_name).is_some() {
            return Err(Error::AlreadyExists {
                what: "interface",
                name: new_name.to_string(),
            });
        }
        let iface = self
            .list
            .get_mut(handle)
            .ok_or_else(|| Error::Parameter("stale interface handle".into()))?;
        iface.name = new_name.to_string();
        iface.status = Status::Changed;
        let before = self
            .list
            .iter()
            .find(|(h, i)| *h != handle && i.name.as_str() > new_name)
            .map(|(h, _)| h);
        self.list.move_before(handle, before)?;
        Ok(())
    }

    /// Updates `up` for every interface and the addresses of dynamic ones.
    ///
    /// Returns how many interfaces changed an address.
    pub fn refresh_addresses(&mut self, system: &[SystemInterface]) -> usize {
        let mut changed = 0;
        for iface in self.list.values_mut() {
            let found = system.iter().find(|s| s.device == iface.device);
            iface.up = found.is_some();
            if !iface.dynamic {
                continue;
            }
            let (ipv4, ipv6) = found.map_or((None, None), |s| (s.ipv4, s.ipv6));
            if iface.ipv4 != ipv4 || iface.ipv6 != ipv6 {
                tracing::info!(
                    "Dynamic interface '{}' ({}) now has {:?}",
                    iface.name,
                    iface.device,
                    ipv4
                );
                iface.ipv4 = ipv4;
                iface.ipv6 = ipv6;
                changed += 1;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_text() {
        let mut iface = Interface::new("lan");
        iface.set_ipv4_text("dynamic").unwrap();
        assert!(iface.dynamic);
        assert_eq!(iface.ipv4_text(), "dynamic");
        iface.set_ipv4_text("192.168.1.1").unwrap();
        assert!(!iface.dynamic);
        assert_eq!(iface.ipv4, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(iface.set_ipv4_text("300.1.1.1").is_err());
        iface.set_ipv4_text("").unwrap();
        assert_eq!(iface.ipv4_text(), "");
    }

    #[test]
    fn test_refresh_dynamic_addresses() {
        let mut interfaces = Interfaces::new();
        let mut wan = Interface::new("wan");
        wan.device = "ppp0".into();
        wan.dynamic = true;
        let wan = interfaces.insert_sorted(wan).unwrap();
        let mut lan = Interface::new("lan");
        lan.device = "eth1".into();
        lan.ipv4 = Some(Ipv4Addr::new(10, 0, 0, 1));
        let lan = interfaces.insert_sorted(lan).unwrap();

        let system = vec![
            SystemInterface {
                device: "ppp0".into(),
                ipv4: Some(Ipv4Addr::new(203, 0, 113, 7)),
                ipv6: None,
            },
            SystemInterface {
                device: "eth1".into(),
                ipv4: Some(Ipv4Addr::new(10, 9, 9, 9)),
                ipv6: None,
            },
        ];
        assert_eq!(interfaces.refresh_addresses(&system), 1);
        assert_eq!(
            interfaces.get(wan).unwrap().ipv4,
            Some(Ipv4Addr::new(203, 0, 113, 7))
        );
        // static addresses are never overwritten
        assert_eq!(
            interfaces.get(lan).unwrap().ipv4,
            Some(Ipv4Addr::new(10, 0, 0, 1))
        );
        assert!(interfaces.get(lan).unwrap().up);

        assert_eq!(interfaces.refresh_addresses(&[]), 1);
        assert!(!interfaces.get(wan).unwrap().up);
        assert_eq!(interfaces.get(wan).unwrap().ipv4, None);
    }

    #[test]
    fn test_sorted_and_rename() {
        let mut interfaces = Interfaces::new();
        for name in ["wan", "dmz", "lan"] {
            interfaces.insert_sorted(Interface::new(name)).unwrap();
        }
        let lan = interfaces.search("lan").unwrap();
        interfaces.rename(lan, "a-lan").unwrap();
        let order: Vec<_> = interfaces.iter().map(|(_, i)| i.name.clone()).collect();
        assert_eq!(order, ["a-lan", "dmz", "wan"]);
        assert!(interfaces.require("lan").is_err());
    }
}

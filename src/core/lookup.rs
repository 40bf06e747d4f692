//! Hash indexes over the object store
//!
//! Both indexes hold small keys pointing at store handles, never the objects
//! themselves. They are built on demand by the session and must have an
//! object's keys removed before that object leaves the store.
//!
//! Services are keyed by protocol plus a "hash port": the destination port
//! for TCP/UDP, the type for ICMP and the protocol number for everything
//! else. A port range contributes one key per port so any port in range
//! resolves in a single bucket scan.
//!
//! Entries that can't be keyed (hosts without an address, port 0) are
//! skipped without error.

use crate::collections::hash::fx_hash;
use crate::collections::{HashTable, NodeRef};
use crate::core::services::{PROTO_ICMP, PROTO_TCP, PROTO_UDP, Service, ServicePort, Services};
use crate::core::zones::{Zone, Zones};
use std::net::IpAddr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ServiceKey {
    protocol: u8,
    hash_port: u16,
    /// `None` in lookups that match any service
    service: Option<NodeRef>,
}

fn hash_service_key(key: &ServiceKey) -> u32 {
    fx_hash(&(key.protocol, key.hash_port))
}

fn compare_service_key(candidate: &ServiceKey, wanted: &ServiceKey) -> bool {
    candidate.protocol == wanted.protocol
        && candidate.hash_port == wanted.hash_port
        && (wanted.service.is_none() || candidate.service == wanted.service)
}

/// Hash ports one service entry is indexed under.
fn hash_ports(port: &ServicePort) -> Vec<u16> {
    match port.protocol {
        PROTO_TCP | PROTO_UDP => {
            if port.dst_low == 0 {
                return Vec::new();
            }
            let high = port.dst_high.max(port.dst_low);
            (port.dst_low..=high).collect()
        }
        PROTO_ICMP if port.dst_low <= 255 => vec![port.dst_low],
        PROTO_ICMP => Vec::new(),
        other => vec![u16::from(other)],
    }
}

/// Service lookup by protocol and port
#[derive(Debug)]
pub struct ServiceIndex {
    table: HashTable<ServiceKey>,
}

impl ServiceIndex {
    pub fn new(rows: usize) -> Self {
        Self {
            table: HashTable::new(rows, hash_service_key, compare_service_key),
        }
    }

    /// Indexes every service in the collection.
    pub fn build(services: &Services, rows: usize) -> Self {
        let mut index = Self::new(rows);
        for (handle, service) in services.iter() {
            index.insert_service(handle, service);
        }
        debug!(
            "Service index: {} keys in {} rows (longest chain {})",
            index.table.cells(),
            index.table.rows(),
            index.table.max_chain()
        );
        index
    }

    pub fn insert_service(&mut self, handle: NodeRef, service: &Service) {
        for port in service.ports.values() {
            for hash_port in hash_ports(port) {
                self.table.insert(ServiceKey {
                    protocol: port.protocol,
                    hash_port,
                    service: Some(handle),
                });
            }
        }
    }

    /// Drops every key of `service`; returns how many were removed.
    pub fn remove_service(&mut self, handle: NodeRef, service: &Service) -> usize {
        let mut removed = 0;
        for port in service.ports.values() {
            for hash_port in hash_ports(port) {
                let wanted = ServiceKey {
                    protocol: port.protocol,
                    hash_port,
                    service: Some(handle),
                };
                if self.table.remove(&wanted).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// First service covering `port` for `protocol`. For protocols without
    /// ports the `port` argument is ignored.
    pub fn search_service(&self, protocol: u8, port: u16) -> Option<NodeRef> {
        let hash_port = match protocol {
            PROTO_TCP | PROTO_UDP | PROTO_ICMP => port,
            other => u16::from(other),
        };
        let wanted = ServiceKey {
            protocol,
            hash_port,
            service: None,
        };
        self.table.search(&wanted).and_then(|key| key.service)
    }

    pub fn len(&self) -> usize {
        self.table.cells()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ZoneKey {
    ip: IpAddr,
    zone: Option<NodeRef>,
}

fn hash_zone_key(key: &ZoneKey) -> u32 {
    fx_hash(&key.ip)
}

fn compare_zone_key(candidate: &ZoneKey, wanted: &ZoneKey) -> bool {
    candidate.ip == wanted.ip && (wanted.zone.is_none() || candidate.zone == wanted.zone)
}

/// Host and firewall lookup by address
#[derive(Debug)]
pub struct ZoneIndex {
    table: HashTable<ZoneKey>,
}

impl ZoneIndex {
    pub fn new(rows: usize) -> Self {
        Self {
            table: HashTable::new(rows, hash_zone_key, compare_zone_key),
        }
    }

    /// Indexes every host and firewall pseudo-zone that has an address.
    pub fn build(zones: &Zones, rows: usize) -> Self {
        let mut index = Self::new(rows);
        for (handle, zone) in zones.iter() {
            index.insert_zone(handle, zone);
        }
        debug!("Zone index: {} addresses", index.table.cells());
        index
    }

    pub fn insert_zone(&mut self, handle: NodeRef, zone: &Zone) {
        for ip in zone.addresses() {
            self.table.insert(ZoneKey {
                ip,
                zone: Some(handle),
            });
        }
    }

    pub fn remove_zone(&mut self, handle: NodeRef, zone: &Zone) -> usize {
        zone.addresses()
            .into_iter()
            .filter(|ip| {
                self.table
                    .remove(&ZoneKey {
                        ip: *ip,
                        zone: Some(handle),
                    })
                    .is_some()
            })
            .count()
    }

    pub fn search_ip(&self, ip: IpAddr) -> Option<NodeRef> {
        self.table
            .search(&ZoneKey { ip, zone: None })
            .and_then(|key| key.zone)
    }

    pub fn len(&self) -> usize {
        self.table.cells()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

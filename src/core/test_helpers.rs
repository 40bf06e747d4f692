//! Shared fixtures for core module tests
//!
//! This module is only compiled in test mode.

use crate::backend::{Category, MemoryBackend, ObjectKind};
use crate::config::AppConfig;
use crate::core::interfaces::{Interface, Interfaces};
use crate::core::services::{Service, ServicePort, Services};
use crate::core::session::{BLOCKLIST_OBJECT, RULES_OBJECT, Session};
use crate::core::zones::{Zone, ZoneKind, Zones};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

fn v4(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> Option<Ipv4Network> {
    Ipv4Network::new(Ipv4Addr::new(a, b, c, d), prefix).ok()
}

fn zone(zones: &mut Zones, name: &str, kind: ZoneKind, ipv4: Option<Ipv4Network>) {
    let mut z = Zone::new(name, kind);
    z.ipv4 = ipv4;
    zones.insert_sorted(z).unwrap();
}

fn interface(interfaces: &mut Interfaces, name: &str, device: &str, ipv4: &str) {
    let mut iface = Interface::new(name);
    iface.device = device.to_string();
    iface.set_ipv4_text(ipv4).unwrap();
    interfaces.insert_sorted(iface).unwrap();
}

/// A small object store built directly in memory.
///
/// - zones `dmz`, `lan`, `old` (inactive) and `wan`
/// - networks `web.dmz` (10.1.0.0/24), `office.lan` (192.168.1.0/24), `net.old`
/// - hosts `www.web.dmz` (10.1.0.10) and `h.net.old`
/// - interfaces `lan` (192.168.1.1), `wan` (203.0.113.1), `wan-dyn` (dynamic)
///   and their `firewall(...)` pseudo-zones
/// - services `ssh`, `http`, `dns` and `ident`
pub fn sample_store() -> (Zones, Services, Interfaces) {
    let mut interfaces = Interfaces::new();
    interface(&mut interfaces, "lan", "eth1", "192.168.1.1");
    interface(&mut interfaces, "wan", "eth0", "203.0.113.1");
    interface(&mut interfaces, "wan-dyn", "ppp0", "dynamic");

    let mut zones = Zones::new();
    zone(&mut zones, "dmz", ZoneKind::Zone, None);
    zone(&mut zones, "lan", ZoneKind::Zone, None);
    zone(&mut zones, "wan", ZoneKind::Zone, None);
    zone(&mut zones, "old", ZoneKind::Zone, None);
    zone(&mut zones, "web.dmz", ZoneKind::Network, v4(10, 1, 0, 0, 24));
    zone(&mut zones, "office.lan", ZoneKind::Network, v4(192, 168, 1, 0, 24));
    zone(&mut zones, "net.old", ZoneKind::Network, None);
    zone(&mut zones, "www.web.dmz", ZoneKind::Host, v4(10, 1, 0, 10, 32));
    zone(&mut zones, "h.net.old", ZoneKind::Host, None);
    let old = zones.search("old").unwrap();
    zones.get_mut(old).unwrap().active = false;
    zones.sync_firewall_zones(&interfaces);

    let mut services = Services::new();
    for (name, ports) in [
        ("ssh", vec![ServicePort::tcp(22, 22)]),
        ("http", vec![ServicePort::tcp(80, 80)]),
        ("dns", vec![ServicePort::udp(53, 53), ServicePort::tcp(53, 53)]),
        ("ident", vec![ServicePort::tcp(113, 113)]),
    ] {
        let mut svc = Service::new(name);
        svc.ports.extend(ports);
        services.insert_sorted(svc).unwrap();
    }

    (zones, services, interfaces)
}

/// A memory engine holding a persisted policy, seeded out of load order.
///
/// - zones `dmz` > `web.dmz` > `www.web.dmz` (10.1.0.10) plus group
///   `servers.web.dmz` holding `www`
/// - zones `lan` > `office.lan` (attached to interface `lan`) > `pc1.office.lan`
/// - interface `lan` on `eth1` with 192.168.1.1
/// - services `ssh` (TCP 22) and `http` (TCP 80)
/// - three rules, the third naming the unknown service `ftp`
/// - `www.web.dmz` on the blocklist
pub fn seeded_backend() -> MemoryBackend {
    let mut b = MemoryBackend::new();
    b.seed(Category::Interfaces, "lan", ObjectKind::Interface)
        .seed_attr(Category::Interfaces, "lan", "ACTIVE", "Yes")
        .seed_attr(Category::Interfaces, "lan", "DEVICE", "eth1")
        .seed_attr(Category::Interfaces, "lan", "VIRTUAL", "No")
        .seed_attr(Category::Interfaces, "lan", "IPADDRESS", "192.168.1.1");

    b.seed(Category::Zones, "servers.web.dmz", ObjectKind::Group)
        .seed_attr(Category::Zones, "servers.web.dmz", "MEMBER", "www")
        .seed(Category::Zones, "pc1.office.lan", ObjectKind::Host)
        .seed_attr(Category::Zones, "pc1.office.lan", "IPADDRESS", "192.168.1.50")
        .seed(Category::Zones, "www.web.dmz", ObjectKind::Host)
        .seed_attr(Category::Zones, "www.web.dmz", "IPADDRESS", "10.1.0.10")
        .seed(Category::Zones, "office.lan", ObjectKind::Network)
        .seed_attr(Category::Zones, "office.lan", "NETWORK", "192.168.1.0")
        .seed_attr(Category::Zones, "office.lan", "NETMASK", "255.255.255.0")
        .seed_attr(Category::Zones, "office.lan", "INTERFACE", "lan")
        .seed(Category::Zones, "web.dmz", ObjectKind::Network)
        .seed_attr(Category::Zones, "web.dmz", "NETWORK", "10.1.0.0")
        .seed_attr(Category::Zones, "web.dmz", "NETMASK", "255.255.255.0")
        .seed(Category::Zones, "lan", ObjectKind::Zone)
        .seed_attr(Category::Zones, "lan", "ACTIVE", "Yes")
        .seed(Category::Zones, "dmz", ObjectKind::Zone)
        .seed_attr(Category::Zones, "dmz", "ACTIVE", "Yes");

    b.seed(Category::Services, "ssh", ObjectKind::Service)
        .seed_attr(Category::Services, "ssh", "TCP", "22")
        .seed(Category::Services, "http", ObjectKind::Service)
        .seed_attr(Category::Services, "http", "TCP", "80");

    b.seed(Category::Rules, RULES_OBJECT, ObjectKind::Rule)
        .seed_attr(Category::Rules, RULES_OBJECT, "RULE", "accept service ssh from office.lan to firewall")
        .seed_attr(Category::Rules, RULES_OBJECT, "RULE", "accept service http from any to www.web.dmz")
        .seed_attr(Category::Rules, RULES_OBJECT, "RULE", "accept service ftp from dmz to firewall")
        .seed(Category::Rules, BLOCKLIST_OBJECT, ObjectKind::Rule)
        .seed_attr(Category::Rules, BLOCKLIST_OBJECT, "RULE", "block www.web.dmz");
    b
}

/// Session over `backend` with default configuration (not yet loaded).
pub fn session_with(backend: MemoryBackend) -> Session {
    Session::with_backend(AppConfig::default(), Box::new(backend)).unwrap()
}

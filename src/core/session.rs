//! Editing session
//!
//! A [`Session`] owns everything one load/edit cycle needs: the configuration,
//! the compiled name rules, the backend registry with one handle per
//! category, the object collections, the rule list, the blocklist and the
//! lazily built lookup indexes.
//!
//! Every mutation follows the same order:
//!
//! 1. validate against the in-memory model (names, parents, references)
//! 2. write through the backend
//! 3. apply the change in memory
//!
//! A failing step leaves the in-memory model as it was.
//!
//! # Examples
//!
//! ```
//! use zonefw::backend::MemoryBackend;
//! use zonefw::config::AppConfig;
//! use zonefw::core::session::Session;
//! use zonefw::core::zones::ZoneKind;
//!
//! let mut session = Session::with_backend(AppConfig::default(), Box::new(MemoryBackend::new())).unwrap();
//! session.init_storage().unwrap();
//! session.new_zone("dmz", ZoneKind::Zone).unwrap();
//! session.new_zone("web.dmz", ZoneKind::Network).unwrap();
//! assert!(session.zones().search("web.dmz").is_some());
//! ```

use crate::backend::{
    Backend, BackendHandle, BackendRegistry, Category, ListEntry, ObjectKind, flag, parse_flag,
    with_write,
};
use crate::collections::NodeRef;
use crate::config::AppConfig;
use crate::core::Status;
use crate::core::blocklist::Blocklist;
use crate::core::error::{BackendError, Error, Result};
use crate::core::interfaces::{DYNAMIC_ADDRESS, Interface, Interfaces};
use crate::core::lookup::{ServiceIndex, ZoneIndex};
use crate::core::rules::analyze::ProtectTarget;
use crate::core::rules::{
    Action, Resolver, Rule, RuleCache, RuleSet, analyze_rule, assemble_rule, parse_line,
};
use crate::core::services::{PORT_ATTRIBUTES, Service, Services, parse_port_attribute};
use crate::core::zones::{Zone, ZoneKind, Zones, firewall_zone_name};
use crate::utils::{SystemInterface, system_interfaces};
use crate::validators::{NameRules, sanitize_comment, validate_device};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use strum::IntoEnumIterator;
use tracing::{debug, error, info, warn};

/// Object in the rules category holding the rule list
pub const RULES_OBJECT: &str = "rules";

/// Object in the rules category holding the blocklist
pub const BLOCKLIST_OBJECT: &str = "blocklist";

/// Counts gathered by [`Session::load`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub interfaces: usize,
    pub zones: usize,
    pub services: usize,
    pub rules: usize,
    pub blocked: usize,
    /// Objects, rule lines and attribute values that were skipped
    pub skipped: usize,
}

#[derive(Debug)]
pub struct Session {
    config: AppConfig,
    names: NameRules,
    registry: BackendRegistry,
    engine: String,

    zones_db: BackendHandle,
    services_db: BackendHandle,
    interfaces_db: BackendHandle,
    rules_db: BackendHandle,

    zones: Zones,
    services: Services,
    interfaces: Interfaces,
    rules: RuleSet,
    blocklist: Blocklist,

    zone_index: Option<ZoneIndex>,
    service_index: Option<ServiceIndex>,
}

fn zone_kind(kind: ObjectKind) -> Option<ZoneKind> {
    match kind {
        ObjectKind::Zone => Some(ZoneKind::Zone),
        ObjectKind::Network => Some(ZoneKind::Network),
        ObjectKind::Host => Some(ZoneKind::Host),
        ObjectKind::Group => Some(ZoneKind::Group),
        _ => None,
    }
}

/// Load order inside the zones category: parents first, groups after hosts.
fn load_rank(entry: &ListEntry) -> u8 {
    match entry.kind {
        ObjectKind::Zone => 0,
        ObjectKind::Network => 1,
        ObjectKind::Host => 2,
        ObjectKind::Group => 3,
        _ => 4,
    }
}

/// Parses a persisted protect rule.
fn parse_protect(line: &str) -> Result<Rule> {
    let rule = parse_line(line)?;
    if rule.action != Action::Protect {
        return Err(Error::validation(
            "RULE",
            format!("'{}' rules can't be attached here", rule.action),
        ));
    }
    Ok(rule)
}

/// Creates `name` in the rules category unless it is already there.
fn ensure_rules_object(db: &mut dyn Backend, name: &str) -> std::result::Result<(), BackendError> {
    match db.ask(name, "RULE", Category::Rules) {
        Ok(_) => Ok(()),
        Err(BackendError::NoSuchObject { .. }) => db.add(name, ObjectKind::Rule, Category::Rules),
        Err(e) => Err(e),
    }
}

fn still_referenced(what: &'static str, name: &str, holders: &[String]) -> Error {
    Error::StillReferenced {
        what,
        name: name.to_string(),
        holders: holders.join(", "),
    }
}

impl Session {
    /// Opens the storage engine named in `config`.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or an engine that can't be set up.
    pub fn open(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let settings = config.backend_settings();
        let engine = config.backend.clone();
        let mut registry = BackendRegistry::new();
        let handles = [
            registry.setup(&engine, &settings)?,
            registry.setup(&engine, &settings)?,
            registry.setup(&engine, &settings)?,
            registry.setup(&engine, &settings)?,
        ];
        Self::from_parts(config, registry, engine, handles)
    }

    /// Uses an already built engine instead of the configured one.
    ///
    /// # Errors
    ///
    /// Fails if the engine rejects the configured settings.
    pub fn with_backend(config: AppConfig, mut backend: Box<dyn Backend>) -> Result<Self> {
        let settings = config.backend_settings();
        backend.conf(&settings)?;
        let engine = backend.name().to_string();
        let mut registry = BackendRegistry::new();
        let first = registry.register(&engine, backend);
        let handles = [
            first,
            registry.setup(&engine, &settings)?,
            registry.setup(&engine, &settings)?,
            registry.setup(&engine, &settings)?,
        ];
        Self::from_parts(config, registry, engine, handles)
    }

    fn from_parts(
        config: AppConfig,
        registry: BackendRegistry,
        engine: String,
        handles: [BackendHandle; 4],
    ) -> Result<Self> {
        let names = NameRules::new().map_err(|e| Error::Resource(format!("name patterns: {e}")))?;
        let [zones_db, services_db, interfaces_db, rules_db] = handles;
        debug!("Session opened on backend '{}'", engine);
        Ok(Self {
            config,
            names,
            registry,
            engine,
            zones_db,
            services_db,
            interfaces_db,
            rules_db,
            zones: Zones::new(),
            services: Services::new(),
            interfaces: Interfaces::new(),
            rules: RuleSet::new(),
            blocklist: Blocklist::new(),
            zone_index: None,
            service_index: None,
        })
    }

    /// Releases every backend handle; the engine is closed with the last one.
    ///
    /// # Errors
    ///
    /// Propagates the engine's `close` failures.
    pub fn close(self) -> Result<()> {
        let Session {
            mut registry,
            engine,
            ..
        } = self;
        for _ in 0..4 {
            registry.release(&engine)?;
        }
        debug!("Session closed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn interfaces(&self) -> &Interfaces {
        &self.interfaces
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    /// Number of live handles on this session's engine
    pub fn backend_refcount(&self) -> usize {
        self.registry.refcount(&self.engine)
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.zones, &self.services, &self.interfaces)
    }

    fn handle(&self, category: Category) -> &BackendHandle {
        match category {
            Category::Zones => &self.zones_db,
            Category::Services => &self.services_db,
            Category::Interfaces => &self.interfaces_db,
            Category::Rules => &self.rules_db,
        }
    }

    fn write<T>(
        &self,
        category: Category,
        f: impl FnOnce(&mut dyn Backend) -> std::result::Result<T, BackendError>,
    ) -> Result<T> {
        Ok(with_write(self.handle(category), category, f)?)
    }

    fn list_entries(&self, category: Category) -> Result<Vec<ListEntry>> {
        let mut db = self.handle(category).borrow_mut();
        let entries: Vec<ListEntry> = db.list(category)?.collect();
        Ok(entries)
    }

    fn ask(&self, category: Category, name: &str, attribute: &str) -> Result<Vec<String>> {
        Ok(self
            .handle(category)
            .borrow_mut()
            .ask(name, attribute, category)?)
    }

    fn ask_one(&self, category: Category, name: &str, attribute: &str) -> Result<Option<String>> {
        Ok(self
            .handle(category)
            .borrow_mut()
            .ask_one(name, attribute, category)?
            .filter(|v| !v.is_empty()))
    }

    /// Like [`Session::ask`], treating a missing object as empty.
    fn ask_optional(&self, category: Category, name: &str, attribute: &str) -> Result<Vec<String>> {
        match self.ask(category, name, attribute) {
            Err(Error::Backend(BackendError::NoSuchObject { .. })) => {
                debug!("No '{}' object in {}", name, category);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Creates empty storage for every category plus the rule and
    /// blocklist objects. Safe to run on existing storage.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn init_storage(&mut self) -> Result<()> {
        for category in Category::iter() {
            self.handle(category).borrow_mut().init(category)?;
        }
        self.write(Category::Rules, |db| {
            ensure_rules_object(db, RULES_OBJECT)?;
            ensure_rules_object(db, BLOCKLIST_OBJECT)
        })?;
        info!("Initialized storage on backend '{}'", self.engine);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Loading
    // ═══════════════════════════════════════════════════════════════════════

    /// Replaces the in-memory model with the backend's content.
    ///
    /// Interfaces load first (networks attach them), then zones parent
    /// first, then services, rules and the blocklist. Objects and lines that
    /// fail parsing or validation are logged and skipped.
    ///
    /// # Errors
    ///
    /// Backend failures abort the load.
    pub fn load(&mut self) -> Result<LoadReport> {
        self.zone_index = None;
        self.service_index = None;
        self.blocklist = Blocklist::new();
        self.rules = RuleSet::new();
        self.zones = Zones::new();
        self.services = Services::new();
        self.interfaces = Interfaces::new();

        let mut report = LoadReport::default();
        self.load_interfaces(&mut report)?;
        if self.interfaces.iter().any(|(_, i)| i.dynamic) {
            let system = system_interfaces();
            self.interfaces.refresh_addresses(&system);
        }
        self.load_zones(&mut report)?;
        self.load_services(&mut report)?;
        self.load_rules(&mut report)?;

        info!(
            "Loaded {} interfaces, {} zones, {} services, {} rules, {} blocklist entries ({} skipped)",
            report.interfaces,
            report.zones,
            report.services,
            report.rules,
            report.blocked,
            report.skipped
        );
        Ok(report)
    }

    fn load_interfaces(&mut self, report: &mut LoadReport) -> Result<()> {
        for entry in self.list_entries(Category::Interfaces)? {
            let loaded = self
                .read_interface(&entry.name, report)
                .and_then(|iface| self.interfaces.insert_sorted(iface));
            match loaded {
                Ok(_) => report.interfaces += 1,
                Err(e) if e.is_skippable() => {
                    warn!("Skipping interface '{}': {}", entry.name, e);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn read_interface(&self, name: &str, report: &mut LoadReport) -> Result<Interface> {
        const CAT: Category = Category::Interfaces;
        self.names
            .validate_interface_name(name)
            .map_err(|m| Error::validation(name, m))?;

        let mut iface = Interface::new(name);
        iface.active = parse_flag(self.ask_one(CAT, name, "ACTIVE")?.as_deref(), true);
        iface.is_virtual = parse_flag(self.ask_one(CAT, name, "VIRTUAL")?.as_deref(), false);
        let device = self.ask_one(CAT, name, "DEVICE")?.unwrap_or_default();
        iface.device = validate_device(&device, iface.is_virtual).map_err(|m| Error::validation(name, m))?;
        if let Some(ip) = self.ask_one(CAT, name, "IPADDRESS")? {
            iface.set_ipv4_text(&ip)?;
        }
        if let Some(ip6) = self.ask_one(CAT, name, "IPV6ADDRESS")? {
            let parsed: Ipv6Addr = ip6
                .parse()
                .map_err(|_| Error::validation(name, format!("invalid IPv6 address '{ip6}'")))?;
            iface.ipv6 = Some(parsed);
        }
        iface.comment = self.ask_one(CAT, name, "COMMENT")?.unwrap_or_default();
        for line in self.ask(CAT, name, "RULE")? {
            match parse_protect(&line) {
                Ok(mut rule) => {
                    rule.number = u32::try_from(iface.protect_rules.len() + 1).unwrap_or(u32::MAX);
                    iface.protect_rules.append(rule);
                }
                Err(e) => {
                    warn!("Interface '{}': skipping rule '{}': {}", name, line, e);
                    report.skipped += 1;
                }
            }
        }
        iface.status = Status::Active;
        Ok(iface)
    }

    fn load_zones(&mut self, report: &mut LoadReport) -> Result<()> {
        let mut entries = self.list_entries(Category::Zones)?;
        entries.sort_by_key(load_rank);

        for entry in entries {
            let Some(kind) = zone_kind(entry.kind) else {
                warn!("Skipping '{}': {} is not a zone type", entry.name, entry.kind);
                report.skipped += 1;
                continue;
            };
            match self.load_zone(&entry.name, kind, report) {
                Ok(()) => report.zones += 1,
                Err(e) if e.is_skippable() => {
                    warn!("Skipping {} '{}': {}", kind, entry.name, e);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        self.zones.sync_firewall_zones(&self.interfaces);
        Ok(())
    }

    fn load_zone(&mut self, name: &str, kind: ZoneKind, report: &mut LoadReport) -> Result<()> {
        const CAT: Category = Category::Zones;
        self.names
            .validate_zone_name(name, kind)
            .map_err(|m| Error::validation(name, m))?;

        let mut zone = Zone::new(name, kind);
        zone.active = parse_flag(self.ask_one(CAT, name, "ACTIVE")?.as_deref(), true);
        zone.comment = self.ask_one(CAT, name, "COMMENT")?.unwrap_or_default();

        let mut attached = Vec::new();
        let mut members = Vec::new();
        match kind {
            ZoneKind::Network => {
                if let Some(address) = self.ask_one(CAT, name, "NETWORK")? {
                    let mask = self
                        .ask_one(CAT, name, "NETMASK")?
                        .unwrap_or_else(|| "255.255.255.255".to_string());
                    zone.ipv4 = Some(parse_ipv4_network(name, &address, &mask)?);
                }
                if let Some(address) = self.ask_one(CAT, name, "IPV6NETWORK")? {
                    let cidr = self.ask_one(CAT, name, "IPV6CIDR")?.unwrap_or_else(|| "64".into());
                    zone.ipv6 = Some(parse_ipv6_network(name, &address, &cidr)?);
                }
                attached = self.ask(CAT, name, "INTERFACE")?;
                for line in self.ask(CAT, name, "RULE")? {
                    match parse_protect(&line) {
                        Ok(mut rule) => {
                            rule.number =
                                u32::try_from(zone.protect_rules.len() + 1).unwrap_or(u32::MAX);
                            zone.protect_rules.append(rule);
                        }
                        Err(e) => {
                            warn!("Network '{}': skipping rule '{}': {}", name, line, e);
                            report.skipped += 1;
                        }
                    }
                }
            }
            ZoneKind::Host => {
                if let Some(address) = self.ask_one(CAT, name, "IPADDRESS")? {
                    let ip: Ipv4Addr = address.parse().map_err(|_| {
                        Error::validation(name, format!("invalid IPv4 address '{address}'"))
                    })?;
                    zone.ipv4 = Ipv4Network::new(ip, 32).ok();
                }
                if let Some(address) = self.ask_one(CAT, name, "IPV6ADDRESS")? {
                    let ip: Ipv6Addr = address.parse().map_err(|_| {
                        Error::validation(name, format!("invalid IPv6 address '{address}'"))
                    })?;
                    zone.ipv6 = Ipv6Network::new(ip, 128).ok();
                }
                zone.mac = self.ask_one(CAT, name, "MAC")?;
            }
            ZoneKind::Group => members = self.ask(CAT, name, "MEMBER")?,
            ZoneKind::Zone | ZoneKind::Firewall => {}
        }
        zone.status = Status::Active;
        let handle = self.zones.insert_sorted(zone)?;

        for iface in attached {
            match self.interfaces.search(&iface) {
                Some(ih) => self.link_interface(handle, ih),
                None => {
                    warn!("Network '{}': unknown interface '{}'", name, iface);
                    report.skipped += 1;
                }
            }
        }
        let network = name.split_once('.').map(|(_, n)| n).unwrap_or_default();
        for member in members {
            let full = format!("{member}.{network}");
            let added = self
                .zones
                .require(&full)
                .and_then(|host| self.zones.add_member(handle, host));
            if let Err(e) = added {
                warn!("Group '{}': skipping member '{}': {}", name, member, e);
                report.skipped += 1;
            }
        }
        Ok(())
    }

    fn link_interface(&mut self, network: NodeRef, interface: NodeRef) {
        if let Some(net) = self.zones.get_mut(network) {
            net.interfaces.append(interface);
        }
        if let Some(iface) = self.interfaces.get_mut(interface) {
            iface.refcnt_network += 1;
        }
    }

    fn load_services(&mut self, report: &mut LoadReport) -> Result<()> {
        for entry in self.list_entries(Category::Services)? {
            let loaded = self
                .read_service(&entry.name, report)
                .and_then(|svc| self.services.insert_sorted(svc));
            match loaded {
                Ok(_) => report.services += 1,
                Err(e) if e.is_skippable() => {
                    warn!("Skipping service '{}': {}", entry.name, e);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn read_service(&self, name: &str, report: &mut LoadReport) -> Result<Service> {
        const CAT: Category = Category::Services;
        self.names
            .validate_service_name(name)
            .map_err(|m| Error::validation(name, m))?;

        let mut service = Service::new(name);
        service.active = parse_flag(self.ask_one(CAT, name, "ACTIVE")?.as_deref(), true);
        service.broadcast = parse_flag(self.ask_one(CAT, name, "BROADCAST")?.as_deref(), false);
        service.helper = self.ask_one(CAT, name, "HELPER")?;
        service.comment = self.ask_one(CAT, name, "COMMENT")?.unwrap_or_default();

        let attributes = self.handle(CAT).borrow_mut().attributes(name, CAT)?;
        for attribute in attributes
            .iter()
            .filter(|a| PORT_ATTRIBUTES.contains(&a.as_str()) || a.starts_with("PROTO_"))
        {
            for value in self.ask(CAT, name, attribute)? {
                match parse_port_attribute(attribute, &value) {
                    Ok(ports) => service.ports.extend(ports),
                    Err(e) => {
                        warn!("Service '{}': skipping {}=\"{}\": {}", name, attribute, value, e);
                        report.skipped += 1;
                    }
                }
            }
        }
        service.status = Status::Active;
        Ok(service)
    }

    fn load_rules(&mut self, report: &mut LoadReport) -> Result<()> {
        let lines = self.ask_optional(Category::Rules, RULES_OBJECT, "RULE")?;
        let (rules, skipped) = RuleSet::from_lines(lines);
        report.rules = rules.len();
        report.skipped += skipped;
        self.rules = rules;

        let lines = self.ask_optional(Category::Rules, BLOCKLIST_OBJECT, "RULE")?;
        report.skipped += self.blocklist.load(lines, &mut self.zones);
        report.blocked = self.blocklist.len();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lookup indexes
    // ═══════════════════════════════════════════════════════════════════════

    /// Host or firewall entry owning `ip`; builds the index on first use.
    pub fn zone_by_ip(&mut self, ip: IpAddr) -> Option<NodeRef> {
        let rows = self.config.hash_rows;
        let zones = &self.zones;
        self.zone_index
            .get_or_insert_with(|| ZoneIndex::build(zones, rows))
            .search_ip(ip)
    }

    /// Service covering `protocol`/`port`; builds the index on first use.
    pub fn service_by_port(&mut self, protocol: u8, port: u16) -> Option<NodeRef> {
        let rows = self.config.hash_rows;
        let services = &self.services;
        self.service_index
            .get_or_insert_with(|| ServiceIndex::build(services, rows))
            .search_service(protocol, port)
    }

    fn unindex_zone(&mut self, handle: NodeRef) {
        if let Some(index) = self.zone_index.as_mut()
            && let Some(zone) = self.zones.get(handle)
        {
            index.remove_zone(handle, zone);
        }
    }

    fn index_zone(&mut self, handle: NodeRef) {
        if let Some(index) = self.zone_index.as_mut()
            && let Some(zone) = self.zones.get(handle)
        {
            index.insert_zone(handle, zone);
        }
    }

    fn unindex_service(&mut self, handle: NodeRef) {
        if let Some(index) = self.service_index.as_mut()
            && let Some(service) = self.services.get(handle)
        {
            index.remove_service(handle, service);
        }
    }

    fn index_service(&mut self, handle: NodeRef) {
        if let Some(index) = self.service_index.as_mut()
            && let Some(service) = self.services.get(handle)
        {
            index.insert_service(handle, service);
        }
    }

    /// Rebuilds the firewall pseudo-zones, keeping the address index in step.
    fn resync_firewall_zones(&mut self) {
        let firewall: Vec<NodeRef> = self
            .zones
            .iter()
            .filter(|(_, z)| z.is_firewall())
            .map(|(h, _)| h)
            .collect();
        for handle in firewall {
            self.unindex_zone(handle);
        }
        self.zones.sync_firewall_zones(&self.interfaces);
        let firewall: Vec<NodeRef> = self
            .zones
            .iter()
            .filter(|(_, z)| z.is_firewall())
            .map(|(h, _)| h)
            .collect();
        for handle in firewall {
            self.index_zone(handle);
        }
    }

    /// Applies a system address snapshot to the dynamic interfaces.
    ///
    /// Returns how many interfaces changed address.
    pub fn refresh_addresses_from(&mut self, system: &[SystemInterface]) -> usize {
        let changed = self.interfaces.refresh_addresses(system);
        if changed > 0 {
            self.resync_firewall_zones();
        }
        changed
    }

    /// Re-reads dynamic interface addresses from the running system.
    pub fn refresh_dynamic(&mut self) -> usize {
        let system = system_interfaces();
        self.refresh_addresses_from(&system)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reference helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn rule_holders(&self, names: &[&str]) -> Vec<String> {
        let mut numbers: Vec<u32> = names
            .iter()
            .flat_map(|n| self.rules.references(n))
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers.into_iter().map(|n| format!("rule {n}")).collect()
    }

    /// Rule lines after applying `renames`, or `None` if nothing changes.
    fn renamed_rule_lines(&self, renames: &[(String, String)]) -> Option<Vec<String>> {
        let mut changed = false;
        let lines = self
            .rules
            .iter()
            .map(|rule| {
                let mut rule = rule.clone();
                for (old, new) in renames {
                    changed |= rule.rename_references(old, new);
                }
                assemble_rule(&rule)
            })
            .collect();
        changed.then_some(lines)
    }

    /// Blocklist lines after applying `renames`, or `None` if nothing changes.
    fn renamed_block_lines(&self, renames: &[(String, String)]) -> Option<Vec<String>> {
        let mut changed = false;
        let lines = self
            .blocklist
            .iter()
            .map(|entry| {
                let item = entry.item();
                match renames.iter().find(|(old, _)| *old == item) {
                    Some((_, new)) => {
                        changed = true;
                        format!("{} {new}", crate::core::blocklist::BLOCK_KEYWORD)
                    }
                    None => entry.to_string(),
                }
            })
            .collect();
        changed.then_some(lines)
    }

    fn persist_rule_objects(
        &self,
        rules: Option<&[String]>,
        blocklist: Option<&[String]>,
    ) -> Result<()> {
        if rules.is_none() && blocklist.is_none() {
            return Ok(());
        }
        self.write(Category::Rules, |db| {
            if let Some(lines) = rules {
                ensure_rules_object(db, RULES_OBJECT)?;
                db.tell_all(RULES_OBJECT, "RULE", lines, Category::Rules)?;
            }
            if let Some(lines) = blocklist {
                ensure_rules_object(db, BLOCKLIST_OBJECT)?;
                db.tell_all(BLOCKLIST_OBJECT, "RULE", lines, Category::Rules)?;
            }
            Ok(())
        })
    }

    /// Passes `result` through; on failure first reverts an already committed
    /// write in `category` with `undo`.
    fn undo_on_failure(
        &self,
        result: Result<()>,
        category: Category,
        undo: impl FnOnce(&mut dyn Backend) -> std::result::Result<(), BackendError>,
    ) -> Result<()> {
        let Err(e) = result else {
            return Ok(());
        };
        if let Err(undo_err) = self.write(category, undo) {
            error!("Could not revert {} after a failed write: {}", category, undo_err);
        }
        Err(e)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Zones, networks, hosts, groups
    // ═══════════════════════════════════════════════════════════════════════

    fn check_zone_parent(&self, name: &str, kind: ZoneKind) -> Result<()> {
        let (expected, what) = match kind {
            ZoneKind::Network => (ZoneKind::Zone, "zone"),
            ZoneKind::Host | ZoneKind::Group => (ZoneKind::Network, "network"),
            ZoneKind::Zone | ZoneKind::Firewall => return Ok(()),
        };
        let parent = name.split_once('.').map(|(_, p)| p).unwrap_or_default();
        match self.zones.lookup(parent) {
            Some((_, zone)) if zone.kind == expected => Ok(()),
            Some(_) => Err(Error::validation(name, format!("'{parent}' is not a {what}"))),
            None => Err(Error::NotFound {
                what,
                name: parent.to_string(),
            }),
        }
    }

    fn require_regular_zone(&self, name: &str) -> Result<(NodeRef, ZoneKind)> {
        let (handle, zone) = self.zones.lookup(name).ok_or_else(|| Error::NotFound {
            what: "zone",
            name: name.to_string(),
        })?;
        if zone.is_firewall() {
            return Err(Error::validation(
                name,
                "firewall zones follow the interfaces and can't be edited",
            ));
        }
        Ok((handle, zone.kind))
    }

    /// Creates a zone, network, host or group.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for malformed names
    /// - [`Error::AlreadyExists`] if the name is taken
    /// - [`Error::NotFound`] if the parent is missing
    /// - [`Error::Backend`] if the write fails
    pub fn new_zone(&mut self, name: &str, kind: ZoneKind) -> Result<NodeRef> {
        self.names
            .validate_zone_name(name, kind)
            .map_err(|m| Error::validation(name, m))?;
        if self.zones.search(name).is_some() {
            return Err(Error::AlreadyExists {
                what: kind.as_str(),
                name: name.to_string(),
            });
        }
        self.check_zone_parent(name, kind)?;

        self.write(Category::Zones, |db| {
            db.add(name, kind.into(), Category::Zones)?;
            db.tell(name, "ACTIVE", flag(true), true, Category::Zones)
        })?;

        let mut zone = Zone::new(name, kind);
        zone.status = Status::Added;
        let handle = self.zones.insert_sorted(zone)?;
        info!("Added {} '{}'", kind, name);
        Ok(handle)
    }

    /// Deletes a zone-family object, and with `recursive` everything nested
    /// below it.
    ///
    /// Refused while a host is in a group outside the deleted set, while an
    /// entry is on the blocklist or while a rule names any of them.
    ///
    /// # Errors
    ///
    /// [`Error::StillReferenced`] for the cases above, [`Error::Backend`] if
    /// the delete fails.
    pub fn delete_zone(&mut self, name: &str, recursive: bool) -> Result<()> {
        let (handle, kind) = self.require_regular_zone(name)?;
        let mut targets = self.zones.descendants(handle);
        if !targets.is_empty() && !recursive {
            return Err(still_referenced(
                kind.as_str(),
                name,
                &[format!("{} nested object(s)", targets.len())],
            ));
        }
        targets.push(handle);

        for &target in &targets {
            self.check_zone_unreferenced(target, &targets)?;
        }

        self.write(Category::Zones, |db| db.del(name, Category::Zones, recursive))?;

        for target in targets {
            self.free_zone(target)?;
        }
        info!("Deleted {} '{}'", kind, name);
        Ok(())
    }

    fn check_zone_unreferenced(&self, handle: NodeRef, deleting: &[NodeRef]) -> Result<()> {
        let Some(zone) = self.zones.get(handle) else {
            return Ok(());
        };
        let mut holders: Vec<String> = Vec::new();
        if zone.refcnt_group > 0 {
            holders.extend(
                self.zones
                    .groups_containing(handle)
                    .into_iter()
                    .filter(|g| !deleting.contains(g))
                    .filter_map(|g| self.zones.get(g).map(|z| format!("group {}", z.name))),
            );
        }
        if zone.refcnt_blocklist > 0 {
            holders.push("blocklist".to_string());
        }
        holders.extend(self.rule_holders(&[zone.name.as_str()]));
        if holders.is_empty() {
            Ok(())
        } else {
            Err(still_referenced(zone.kind.as_str(), &zone.name, &holders))
        }
    }

    fn free_zone(&mut self, handle: NodeRef) -> Result<()> {
        self.unindex_zone(handle);
        let Some(zone) = self.zones.get(handle) else {
            return Ok(());
        };
        let members: Vec<NodeRef> = zone.members.values().copied().collect();
        let attached: Vec<NodeRef> = zone.interfaces.values().copied().collect();
        for member in members {
            self.zones.remove_member(handle, member)?;
        }
        for iface in attached {
            if let Some(i) = self.interfaces.get_mut(iface) {
                i.refcnt_network = i.refcnt_network.saturating_sub(1);
            }
        }
        let zone = self.zones.take(handle)?;
        debug!("Freed {} '{}'", zone.kind, zone.name);
        Ok(())
    }

    /// Renames a zone-family object within its parent. Nested objects, rule
    /// operands, blocklist entries and group memberships follow.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for malformed names or a different parent
    /// - [`Error::AlreadyExists`] if the new name is taken
    /// - [`Error::Backend`] if a write fails
    pub fn rename_zone(&mut self, name: &str, new_name: &str) -> Result<()> {
        let (handle, kind) = self.require_regular_zone(name)?;
        self.names
            .validate_zone_name(new_name, kind)
            .map_err(|m| Error::validation(new_name, m))?;
        let old_parent = name.split_once('.').map(|(_, p)| p);
        let new_parent = new_name.split_once('.').map(|(_, p)| p);
        if old_parent != new_parent {
            return Err(Error::validation(
                new_name,
                "objects can only be renamed within their parent",
            ));
        }
        if self.zones.search(new_name).is_some() {
            return Err(Error::AlreadyExists {
                what: kind.as_str(),
                name: new_name.to_string(),
            });
        }

        let renames: Vec<(String, String)> = std::iter::once(handle)
            .chain(self.zones.descendants(handle))
            .filter_map(|h| self.zones.get(h))
            .map(|z| {
                let prefix = &z.name[..z.name.len() - name.len()];
                (z.name.clone(), format!("{prefix}{new_name}"))
            })
            .collect();

        // (group, members before, members after)
        let mut member_updates: Vec<(String, Vec<String>, Vec<String>)> = Vec::new();
        if kind == ZoneKind::Host {
            let old_short = name.split('.').next().unwrap_or_default();
            let new_short = new_name.split('.').next().unwrap_or_default();
            for group in self.zones.groups_containing(handle) {
                let before = self.zones.member_names(group);
                let after = before
                    .iter()
                    .map(|m| if m == old_short { new_short.to_string() } else { m.clone() })
                    .collect();
                if let Some(g) = self.zones.get(group) {
                    member_updates.push((g.name.clone(), before, after));
                }
            }
        }
        let rule_lines = self.renamed_rule_lines(&renames);
        let block_lines = self.renamed_block_lines(&renames);

        self.write(Category::Zones, |db| {
            db.rename(name, new_name, Category::Zones)?;
            for (group, _, after) in &member_updates {
                db.tell_all(group, "MEMBER", after, Category::Zones)?;
            }
            Ok(())
        })?;
        let persisted = self.persist_rule_objects(rule_lines.as_deref(), block_lines.as_deref());
        self.undo_on_failure(persisted, Category::Zones, |db| {
            for (group, before, _) in &member_updates {
                db.tell_all(group, "MEMBER", before, Category::Zones)?;
            }
            db.rename(new_name, name, Category::Zones)
        })?;

        self.zones.rename(handle, new_name)?;
        for (old, new) in &renames {
            self.rules.rename_references(old, new);
            self.blocklist.rename(old, new);
        }
        info!("Renamed {} '{}' to '{}'", kind, name, new_name);
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown names, [`Error::Backend`] if the write
    /// fails.
    pub fn set_zone_active(&mut self, name: &str, active: bool) -> Result<()> {
        let (handle, kind) = self.require_regular_zone(name)?;
        self.write(Category::Zones, |db| {
            db.tell(name, "ACTIVE", flag(active), true, Category::Zones)
        })?;
        if let Some(zone) = self.zones.get_mut(handle) {
            zone.active = active;
            zone.status = Status::Changed;
        }
        info!("{} '{}' is now {}", kind, name, if active { "active" } else { "inactive" });
        Ok(())
    }

    /// Sets the address of a host (`10.0.0.5`, `2001:db8::5`) or a network
    /// (`10.0.0.0/24`, `2001:db8::/64`).
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for malformed addresses or objects that don't
    /// carry one, [`Error::Backend`] if the write fails.
    pub fn set_zone_address(&mut self, name: &str, address: &str) -> Result<()> {
        let (handle, kind) = self.require_regular_zone(name)?;
        let address = address.trim();
        let invalid = || Error::validation(name, format!("invalid address '{address}'"));

        let (attributes, v4, v6): (Vec<(&str, String)>, Option<Ipv4Network>, Option<Ipv6Network>) =
            match kind {
                ZoneKind::Host => match address.parse::<IpAddr>().map_err(|_| invalid())? {
                    IpAddr::V4(ip) => (
                        vec![("IPADDRESS", ip.to_string())],
                        Ipv4Network::new(ip, 32).ok(),
                        None,
                    ),
                    IpAddr::V6(ip) => (
                        vec![("IPV6ADDRESS", ip.to_string())],
                        None,
                        Ipv6Network::new(ip, 128).ok(),
                    ),
                },
                ZoneKind::Network => match address.parse::<IpNetwork>().map_err(|_| invalid())? {
                    IpNetwork::V4(net) => (
                        vec![
                            ("NETWORK", net.network().to_string()),
                            ("NETMASK", net.mask().to_string()),
                        ],
                        Some(net),
                        None,
                    ),
                    IpNetwork::V6(net) => (
                        vec![
                            ("IPV6NETWORK", net.network().to_string()),
                            ("IPV6CIDR", net.prefix().to_string()),
                        ],
                        None,
                        Some(net),
                    ),
                },
                _ => {
                    return Err(Error::validation(
                        name,
                        format!("a {kind} has no address"),
                    ));
                }
            };

        self.write(Category::Zones, |db| {
            for (attribute, value) in &attributes {
                db.tell(name, attribute, value, true, Category::Zones)?;
            }
            Ok(())
        })?;

        self.unindex_zone(handle);
        if let Some(zone) = self.zones.get_mut(handle) {
            if v4.is_some() {
                zone.ipv4 = v4;
            }
            if v6.is_some() {
                zone.ipv6 = v6;
            }
            zone.status = Status::Changed;
        }
        self.index_zone(handle);
        info!("Set address of {} '{}' to {}", kind, name, address);
        Ok(())
    }

    /// Sets the free-text comment of any stored object.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown objects, [`Error::Backend`] if the
    /// write fails.
    pub fn set_comment(&mut self, category: Category, name: &str, comment: &str) -> Result<()> {
        let comment = sanitize_comment(comment);
        let exists = match category {
            Category::Zones => self.require_regular_zone(name).is_ok(),
            Category::Services => self.services.search(name).is_some(),
            Category::Interfaces => self.interfaces.search(name).is_some(),
            Category::Rules => false,
        };
        if !exists {
            return Err(Error::NotFound {
                what: "object",
                name: name.to_string(),
            });
        }
        self.write(category, |db| db.tell(name, "COMMENT", &comment, true, category))?;
        match category {
            Category::Zones => {
                if let Some(h) = self.zones.search(name)
                    && let Some(z) = self.zones.get_mut(h)
                {
                    z.comment = comment;
                }
            }
            Category::Services => {
                if let Some(h) = self.services.search(name)
                    && let Some(s) = self.services.get_mut(h)
                {
                    s.comment = comment;
                }
            }
            Category::Interfaces => {
                if let Some(h) = self.interfaces.search(name)
                    && let Some(i) = self.interfaces.get_mut(h)
                {
                    i.comment = comment;
                }
            }
            Category::Rules => {}
        }
        Ok(())
    }

    fn resolve_member(&self, group: &str, host: &str) -> Result<(NodeRef, NodeRef)> {
        let (group_handle, _) = self.require_regular_zone(group)?;
        let full = if host.contains('.') {
            host.to_string()
        } else {
            let network = group.split_once('.').map(|(_, n)| n).unwrap_or_default();
            format!("{host}.{network}")
        };
        let host_handle = self.zones.require(&full)?;
        Ok((group_handle, host_handle))
    }

    /// Adds a host (short or full name) to a group in the same network.
    ///
    /// # Errors
    ///
    /// Validation failures from [`Zones::check_member`], [`Error::Backend`]
    /// if the write fails.
    pub fn add_group_member(&mut self, group: &str, host: &str) -> Result<()> {
        let (group_handle, host_handle) = self.resolve_member(group, host)?;
        self.zones.check_member(group_handle, host_handle)?;
        let short = self
            .zones
            .get(host_handle)
            .map(|h| h.short_name().to_string())
            .unwrap_or_default();

        self.write(Category::Zones, |db| {
            db.tell(group, "MEMBER", &short, false, Category::Zones)
        })?;
        self.zones.add_member(group_handle, host_handle)?;
        if let Some(g) = self.zones.get_mut(group_handle) {
            g.status = Status::Changed;
        }
        info!("Added '{}' to group '{}'", short, group);
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] if the host is not a member, [`Error::Backend`] if
    /// the write fails.
    pub fn remove_group_member(&mut self, group: &str, host: &str) -> Result<()> {
        let (group_handle, host_handle) = self.resolve_member(group, host)?;
        let is_member = self
            .zones
            .get(group_handle)
            .is_some_and(|g| g.members.values().any(|m| *m == host_handle));
        if !is_member {
            return Err(Error::NotFound {
                what: "member",
                name: host.to_string(),
            });
        }
        let remaining: Vec<String> = self
            .zones
            .get(group_handle)
            .map(|g| {
                g.members
                    .values()
                    .filter(|m| **m != host_handle)
                    .filter_map(|m| self.zones.get(*m))
                    .map(|h| h.short_name().to_string())
                    .collect()
            })
            .unwrap_or_default();

        self.write(Category::Zones, |db| {
            db.tell_all(group, "MEMBER", &remaining, Category::Zones)
        })?;
        self.zones.remove_member(group_handle, host_handle)?;
        if let Some(g) = self.zones.get_mut(group_handle) {
            g.status = Status::Changed;
        }
        info!("Removed '{}' from group '{}'", host, group);
        Ok(())
    }

    fn require_network(&self, name: &str) -> Result<NodeRef> {
        let (handle, kind) = self.require_regular_zone(name)?;
        if kind != ZoneKind::Network {
            return Err(Error::validation(name, format!("'{name}' is not a network")));
        }
        Ok(handle)
    }

    /// Attaches an interface to a network, taking a network reference on it.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] if it is already attached,
    /// [`Error::Backend`] if the write fails.
    pub fn attach_interface(&mut self, network: &str, interface: &str) -> Result<()> {
        let net = self.require_network(network)?;
        let iface = self.interfaces.require(interface)?;
        if self
            .zones
            .get(net)
            .is_some_and(|n| n.interfaces.values().any(|i| *i == iface))
        {
            return Err(Error::AlreadyExists {
                what: "interface attachment",
                name: format!("{interface} on {network}"),
            });
        }
        self.write(Category::Zones, |db| {
            db.tell(network, "INTERFACE", interface, false, Category::Zones)
        })?;
        self.link_interface(net, iface);
        info!("Attached interface '{}' to '{}'", interface, network);
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] if it isn't attached, [`Error::Backend`] if the
    /// write fails.
    pub fn detach_interface(&mut self, network: &str, interface: &str) -> Result<()> {
        let net = self.require_network(network)?;
        let iface = self.interfaces.require(interface)?;
        let node = self
            .zones
            .get(net)
            .and_then(|n| n.interfaces.find(|i| *i == iface))
            .ok_or_else(|| Error::NotFound {
                what: "interface attachment",
                name: format!("{interface} on {network}"),
            })?;
        let remaining: Vec<String> = self
            .zones
            .get(net)
            .map(|n| {
                n.interfaces
                    .values()
                    .filter(|i| **i != iface)
                    .filter_map(|i| self.interfaces.get(*i))
                    .map(|i| i.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        self.write(Category::Zones, |db| {
            db.tell_all(network, "INTERFACE", &remaining, Category::Zones)
        })?;
        if let Some(n) = self.zones.get_mut(net) {
            n.interfaces.remove(node)?;
        }
        if let Some(i) = self.interfaces.get_mut(iface) {
            i.refcnt_network = i.refcnt_network.saturating_sub(1);
        }
        info!("Detached interface '{}' from '{}'", interface, network);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Services
    // ═══════════════════════════════════════════════════════════════════════

    /// # Errors
    ///
    /// [`Error::Validation`] for malformed names, [`Error::AlreadyExists`] if
    /// taken, [`Error::Backend`] if the write fails.
    pub fn new_service(&mut self, name: &str) -> Result<NodeRef> {
        self.names
            .validate_service_name(name)
            .map_err(|m| Error::validation(name, m))?;
        if self.services.search(name).is_some() {
            return Err(Error::AlreadyExists {
                what: "service",
                name: name.to_string(),
            });
        }
        self.write(Category::Services, |db| {
            db.add(name, ObjectKind::Service, Category::Services)?;
            db.tell(name, "ACTIVE", flag(true), true, Category::Services)
        })?;
        let mut service = Service::new(name);
        service.status = Status::Added;
        let handle = self.services.insert_sorted(service)?;
        info!("Added service '{}'", name);
        Ok(handle)
    }

    /// # Errors
    ///
    /// [`Error::StillReferenced`] while a rule uses the service,
    /// [`Error::Backend`] if the delete fails.
    pub fn delete_service(&mut self, name: &str) -> Result<()> {
        let handle = self.services.require(name)?;
        let holders = self.rule_holders(&[name]);
        if !holders.is_empty() {
            return Err(still_referenced("service", name, &holders));
        }
        self.write(Category::Services, |db| {
            db.del(name, Category::Services, false)
        })?;
        self.unindex_service(handle);
        self.services.take(handle)?;
        info!("Deleted service '{}'", name);
        Ok(())
    }

    /// Renames a service; rules naming it follow.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for malformed names, [`Error::AlreadyExists`] if
    /// taken, [`Error::Backend`] if a write fails.
    pub fn rename_service(&mut self, name: &str, new_name: &str) -> Result<()> {
        let handle = self.services.require(name)?;
        self.names
            .validate_service_name(new_name)
            .map_err(|m| Error::validation(new_name, m))?;
        if self.services.search(new_name).is_some() {
            return Err(Error::AlreadyExists {
                what: "service",
                name: new_name.to_string(),
            });
        }
        let renames = [(name.to_string(), new_name.to_string())];
        let rule_lines = self.renamed_rule_lines(&renames);

        self.write(Category::Services, |db| {
            db.rename(name, new_name, Category::Services)
        })?;
        let persisted = self.persist_rule_objects(rule_lines.as_deref(), None);
        self.undo_on_failure(persisted, Category::Services, |db| {
            db.rename(new_name, name, Category::Services)
        })?;

        self.services.rename(handle, new_name)?;
        self.rules.rename_references(name, new_name);
        info!("Renamed service '{}' to '{}'", name, new_name);
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown services, [`Error::Backend`] if the
    /// write fails.
    pub fn set_service_active(&mut self, name: &str, active: bool) -> Result<()> {
        let handle = self.services.require(name)?;
        self.write(Category::Services, |db| {
            db.tell(name, "ACTIVE", flag(active), true, Category::Services)
        })?;
        if let Some(service) = self.services.get_mut(handle) {
            service.active = active;
            service.status = Status::Changed;
        }
        Ok(())
    }

    /// Replaces the entries of one port attribute (`TCP`, `UDP`, `ICMP`,
    /// `GRE`, `PROTO_<n>`, ...). An empty value clears it.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for malformed values, [`Error::Backend`] if the
    /// write fails.
    pub fn set_service_ports(&mut self, name: &str, attribute: &str, value: &str) -> Result<()> {
        let handle = self.services.require(name)?;
        let attribute = attribute.trim().to_ascii_uppercase();
        let ports =
            parse_port_attribute(&attribute, value).map_err(|m| Error::validation(name, m))?;

        self.write(Category::Services, |db| {
            db.tell(name, &attribute, value.trim(), true, Category::Services)
        })?;

        self.unindex_service(handle);
        if let Some(service) = self.services.get_mut(handle) {
            let stale: Vec<NodeRef> = service
                .ports
                .iter()
                .filter(|(_, p)| p.attribute() == attribute)
                .map(|(h, _)| h)
                .collect();
            for node in stale {
                service.ports.remove(node)?;
            }
            service.ports.extend(ports);
            service.status = Status::Changed;
        }
        self.index_service(handle);
        info!("Set {} of service '{}' to '{}'", attribute, name, value.trim());
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Interfaces
    // ═══════════════════════════════════════════════════════════════════════

    /// # Errors
    ///
    /// [`Error::Validation`] for malformed names or devices,
    /// [`Error::AlreadyExists`] if taken, [`Error::Backend`] if the write
    /// fails.
    pub fn new_interface(&mut self, name: &str, device: &str) -> Result<NodeRef> {
        self.names
            .validate_interface_name(name)
            .map_err(|m| Error::validation(name, m))?;
        let is_virtual = device.contains(':');
        let device = validate_device(device.trim(), is_virtual).map_err(|m| Error::validation(name, m))?;
        if self.interfaces.search(name).is_some() {
            return Err(Error::AlreadyExists {
                what: "interface",
                name: name.to_string(),
            });
        }
        self.write(Category::Interfaces, |db| {
            db.add(name, ObjectKind::Interface, Category::Interfaces)?;
            db.tell(name, "ACTIVE", flag(true), true, Category::Interfaces)?;
            db.tell(name, "DEVICE", &device, true, Category::Interfaces)?;
            db.tell(name, "VIRTUAL", flag(is_virtual), true, Category::Interfaces)
        })?;
        let mut iface = Interface::new(name);
        iface.device = device;
        iface.is_virtual = is_virtual;
        iface.status = Status::Added;
        let handle = self.interfaces.insert_sorted(iface)?;
        info!("Added interface '{}'", name);
        Ok(handle)
    }

    fn networks_with(&self, interface: NodeRef) -> Vec<NodeRef> {
        self.zones
            .iter()
            .filter(|(_, z)| z.interfaces.values().any(|i| *i == interface))
            .map(|(h, _)| h)
            .collect()
    }

    /// # Errors
    ///
    /// [`Error::StillReferenced`] while a network or rule uses the interface,
    /// [`Error::Backend`] if the delete fails.
    pub fn delete_interface(&mut self, name: &str) -> Result<()> {
        let handle = self.interfaces.require(name)?;
        let mut holders: Vec<String> = self
            .networks_with(handle)
            .into_iter()
            .filter_map(|n| self.zones.get(n).map(|z| format!("network {}", z.name)))
            .collect();
        let firewall = firewall_zone_name(name);
        holders.extend(self.rule_holders(&[name, firewall.as_str()]));
        if !holders.is_empty() {
            return Err(still_referenced("interface", name, &holders));
        }

        self.write(Category::Interfaces, |db| {
            db.del(name, Category::Interfaces, false)
        })?;
        self.interfaces.take(handle)?;
        self.resync_firewall_zones();
        info!("Deleted interface '{}'", name);
        Ok(())
    }

    /// Renames an interface; attaching networks, rule operands and its
    /// firewall pseudo-zone follow.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for malformed names, [`Error::AlreadyExists`] if
    /// taken, [`Error::Backend`] if a write fails.
    pub fn rename_interface(&mut self, name: &str, new_name: &str) -> Result<()> {
        let handle = self.interfaces.require(name)?;
        self.names
            .validate_interface_name(new_name)
            .map_err(|m| Error::validation(new_name, m))?;
        if self.interfaces.search(new_name).is_some() {
            return Err(Error::AlreadyExists {
                what: "interface",
                name: new_name.to_string(),
            });
        }

        let renames = [
            (name.to_string(), new_name.to_string()),
            (firewall_zone_name(name), firewall_zone_name(new_name)),
        ];
        // (network, attached names before, attached names after)
        let network_updates: Vec<(String, Vec<String>, Vec<String>)> = self
            .networks_with(handle)
            .into_iter()
            .filter_map(|n| self.zones.get(n))
            .map(|net| {
                let before: Vec<String> = net
                    .interfaces
                    .values()
                    .filter_map(|i| self.interfaces.get(*i))
                    .map(|i| i.name.clone())
                    .collect();
                let after = before
                    .iter()
                    .map(|n| if n == name { new_name.to_string() } else { n.clone() })
                    .collect();
                (net.name.clone(), before, after)
            })
            .collect();
        let rule_lines = self.renamed_rule_lines(&renames);

        let undo_rename = |db: &mut dyn Backend| db.rename(new_name, name, Category::Interfaces);
        self.write(Category::Interfaces, |db| {
            db.rename(name, new_name, Category::Interfaces)
        })?;
        if !network_updates.is_empty() {
            let attached = self.write(Category::Zones, |db| {
                for (network, _, after) in &network_updates {
                    db.tell_all(network, "INTERFACE", after, Category::Zones)?;
                }
                Ok(())
            });
            self.undo_on_failure(attached, Category::Interfaces, undo_rename)?;
        }
        let persisted = self.persist_rule_objects(rule_lines.as_deref(), None);
        if persisted.is_err()
            && !network_updates.is_empty()
            && let Err(e) = self.write(Category::Zones, |db| {
                for (network, before, _) in &network_updates {
                    db.tell_all(network, "INTERFACE", before, Category::Zones)?;
                }
                Ok(())
            })
        {
            error!("Could not revert network attachments of '{}': {}", name, e);
        }
        self.undo_on_failure(persisted, Category::Interfaces, undo_rename)?;

        self.interfaces.rename(handle, new_name)?;
        for (old, new) in &renames {
            self.rules.rename_references(old, new);
        }
        self.resync_firewall_zones();
        info!("Renamed interface '{}' to '{}'", name, new_name);
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown interfaces, [`Error::Backend`] if the
    /// write fails.
    pub fn set_interface_active(&mut self, name: &str, active: bool) -> Result<()> {
        let handle = self.interfaces.require(name)?;
        self.write(Category::Interfaces, |db| {
            db.tell(name, "ACTIVE", flag(active), true, Category::Interfaces)
        })?;
        if let Some(iface) = self.interfaces.get_mut(handle) {
            iface.active = active;
            iface.status = Status::Changed;
        }
        self.resync_firewall_zones();
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::Validation`] for invalid device names, [`Error::Backend`] if
    /// the write fails.
    pub fn set_interface_device(&mut self, name: &str, device: &str) -> Result<()> {
        let handle = self.interfaces.require(name)?;
        let is_virtual = device.contains(':');
        let device = validate_device(device.trim(), is_virtual).map_err(|m| Error::validation(name, m))?;
        self.write(Category::Interfaces, |db| {
            db.tell(name, "DEVICE", &device, true, Category::Interfaces)?;
            db.tell(name, "VIRTUAL", flag(is_virtual), true, Category::Interfaces)
        })?;
        if let Some(iface) = self.interfaces.get_mut(handle) {
            iface.device = device;
            iface.is_virtual = is_virtual;
            iface.status = Status::Changed;
        }
        Ok(())
    }

    /// Sets the IPv4 address: an address, `dynamic`, or empty to clear it.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for malformed values, [`Error::Backend`] if the
    /// write fails.
    pub fn set_interface_ipv4(&mut self, name: &str, value: &str) -> Result<()> {
        let handle = self.interfaces.require(name)?;
        let value = value.trim();
        if !value.is_empty()
            && !value.eq_ignore_ascii_case(DYNAMIC_ADDRESS)
            && value.parse::<Ipv4Addr>().is_err()
        {
            return Err(Error::validation(name, format!("invalid IPv4 address '{value}'")));
        }
        self.write(Category::Interfaces, |db| {
            db.tell(name, "IPADDRESS", value, true, Category::Interfaces)
        })?;
        if let Some(iface) = self.interfaces.get_mut(handle) {
            iface.set_ipv4_text(value)?;
            iface.status = Status::Changed;
        }
        self.resync_firewall_zones();
        info!("Set address of interface '{}' to '{}'", name, value);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Blocklist
    // ═══════════════════════════════════════════════════════════════════════

    /// Blocks an address, network, host or group.
    ///
    /// # Errors
    ///
    /// See [`Blocklist::resolve`]; [`Error::Backend`] if the write fails.
    pub fn block(&mut self, item: &str) -> Result<()> {
        let entry = self.blocklist.resolve(item, &self.zones)?;
        let line = entry.to_string();
        self.write(Category::Rules, |db| {
            ensure_rules_object(db, BLOCKLIST_OBJECT)?;
            db.tell(BLOCKLIST_OBJECT, "RULE", &line, false, Category::Rules)
        })?;
        self.blocklist.insert(entry, &mut self.zones);
        info!("Blocked '{}'", item.trim());
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] if the item isn't blocked, [`Error::Backend`] if
    /// the write fails.
    pub fn unblock(&mut self, item: &str) -> Result<()> {
        if !self.blocklist.contains(item) {
            return Err(Error::NotFound {
                what: "blocklist entry",
                name: item.trim().to_string(),
            });
        }
        let remaining: Vec<String> = self
            .blocklist
            .iter()
            .filter(|e| !e.matches(item))
            .map(ToString::to_string)
            .collect();
        self.persist_rule_objects(None, Some(&remaining))?;
        self.blocklist.remove(item, &mut self.zones)?;
        info!("Unblocked '{}'", item.trim());
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Rules
    // ═══════════════════════════════════════════════════════════════════════

    /// Parses, checks and stores a rule so it becomes number `place`.
    ///
    /// Inactive rules and separators are stored without resolution.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] for malformed lines, analysis errors for rules that
    /// don't resolve, [`Error::Backend`] if the write fails.
    pub fn insert_rule(&mut self, place: u32, line: &str) -> Result<u32> {
        let rule = parse_line(line)?;
        analyze_rule(&rule, &self.resolver())?;

        let mut lines = self.rules.to_lines();
        let index = usize::try_from(place.max(1) - 1)
            .unwrap_or(usize::MAX)
            .min(lines.len());
        lines.insert(index, assemble_rule(&rule));
        self.persist_rule_objects(Some(&lines), None)?;

        let number = self.rules.insert_at(place, rule)?;
        info!("Inserted rule {}", number);
        Ok(number)
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown numbers, [`Error::Backend`] if the
    /// write fails.
    pub fn remove_rule(&mut self, place: u32) -> Result<Rule> {
        if self.rules.get(place).is_none() {
            return Err(Error::NotFound {
                what: "rule",
                name: place.to_string(),
            });
        }
        let lines: Vec<String> = self
            .rules
            .iter()
            .filter(|r| r.number != place)
            .map(assemble_rule)
            .collect();
        self.persist_rule_objects(Some(&lines), None)?;
        let rule = self.rules.remove_at(place)?;
        info!("Removed rule {}", place);
        Ok(rule)
    }

    /// Writes the whole rule list and blocklist back.
    ///
    /// # Errors
    ///
    /// [`Error::Backend`] if the write fails.
    pub fn save_rules(&self) -> Result<()> {
        let rules = self.rules.to_lines();
        let blocked = self.blocklist.to_lines();
        self.persist_rule_objects(Some(&rules), Some(&blocked))?;
        debug!("Saved {} rules", rules.len());
        Ok(())
    }

    /// Analyzes every rule; failing rules are reported, not fatal.
    pub fn analyze_rules(&self) -> (Vec<RuleCache>, Vec<(u32, Error)>) {
        self.rules.analyze_all(&self.resolver())
    }

    /// Analyzes the protect rules stored on networks and interfaces.
    ///
    /// A rule without an explicit target protects its owner. Returns the
    /// caches and `(owner, error)` for every failing rule.
    pub fn analyze_protect_rules(&self) -> (Vec<RuleCache>, Vec<(String, Error)>) {
        let resolver = self.resolver();
        let owned = self
            .zones
            .iter()
            .flat_map(|(h, z)| {
                z.protect_rules
                    .values()
                    .map(move |r| (z.name.as_str(), ProtectTarget::Zone(h), r))
            })
            .chain(self.interfaces.iter().flat_map(|(h, i)| {
                i.protect_rules
                    .values()
                    .map(move |r| (i.name.as_str(), ProtectTarget::Interface(h), r))
            }));

        let mut caches = Vec::new();
        let mut errors = Vec::new();
        for (owner, target, rule) in owned {
            match analyze_rule(rule, &resolver) {
                Ok(Some(mut cache)) => {
                    cache.who.get_or_insert(target);
                    caches.push(cache);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Protect rule on '{}' skipped: {}", owner, e);
                    errors.push((owner.to_string(), e));
                }
            }
        }
        (caches, errors)
    }
}

fn parse_ipv4_network(name: &str, address: &str, mask: &str) -> Result<Ipv4Network> {
    let invalid = || Error::validation(name, format!("invalid network '{address}/{mask}'"));
    let ip: Ipv4Addr = address.trim().parse().map_err(|_| invalid())?;
    let mask: Ipv4Addr = mask.trim().parse().map_err(|_| invalid())?;
    Ipv4Network::with_netmask(ip, mask).map_err(|_| invalid())
}

fn parse_ipv6_network(name: &str, address: &str, cidr: &str) -> Result<Ipv6Network> {
    let invalid = || Error::validation(name, format!("invalid network '{address}/{cidr}'"));
    let ip: Ipv6Addr = address.trim().parse().map_err(|_| invalid())?;
    let prefix: u8 = cidr.trim().parse().map_err(|_| invalid())?;
    Ipv6Network::new(ip, prefix).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::core::services::PROTO_TCP;
    use crate::core::test_helpers::{seeded_backend, session_with};

    fn loaded() -> Session {
        let mut session = session_with(seeded_backend());
        session.load().unwrap();
        session
    }

    #[test]
    fn test_load_counts() {
        let session = loaded();
        let report_zones: Vec<&str> = session.zones().iter().map(|(_, z)| z.name.as_str()).collect();
        assert_eq!(
            report_zones,
            [
                "dmz",
                "web.dmz",
                "www.web.dmz",
                "servers.web.dmz",
                "lan",
                "office.lan",
                "pc1.office.lan",
                "firewall(lan)",
            ]
        );
        assert_eq!(session.services().len(), 2);
        assert_eq!(session.rules().len(), 3);
        assert_eq!(session.blocklist().len(), 1);

        let www = session.zones().search("www.web.dmz").unwrap();
        let zone = session.zones().get(www).unwrap();
        assert_eq!(zone.refcnt_group, 1);
        let lan = session.interfaces().search("lan").unwrap();
        assert_eq!(session.interfaces().get(lan).unwrap().refcnt_network, 1);
    }

    #[test]
    fn test_bad_entries_skipped() {
        let mut backend = seeded_backend();
        backend
            .seed(Category::Zones, "bad name!", ObjectKind::Zone)
            .seed(Category::Zones, "h.missing.dmz", ObjectKind::Host)
            .seed_attr(Category::Rules, RULES_OBJECT, "RULE", "frobnicate everything");
        let mut session = session_with(backend);
        let report = session.load().unwrap();
        assert_eq!(report.skipped, 3);
        assert_eq!(report.rules, 3);
    }

    #[test]
    fn test_analyze_loaded_rules() {
        let session = loaded();
        let (caches, errors) = session.analyze_rules();
        assert_eq!(caches.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 3);
    }

    #[test]
    fn test_host_in_group_cannot_be_deleted() {
        let mut session = loaded();
        let err = session.delete_zone("www.web.dmz", false).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::ReferentialIntegrity);
        assert!(session.zones().search("www.web.dmz").is_some());
        assert!(session.zones().search("servers.web.dmz").is_some());

        session.remove_group_member("servers.web.dmz", "www").unwrap();
        let www = session.zones().search("www.web.dmz").unwrap();
        assert_eq!(session.zones().get(www).unwrap().refcnt_group, 0);
        // still blocked and named by rule 2
        assert!(session.delete_zone("www.web.dmz", false).is_err());
        session.unblock("www.web.dmz").unwrap();
        session.remove_rule(2).unwrap();
        session.delete_zone("www.web.dmz", false).unwrap();
        assert!(session.zones().search("www.web.dmz").is_none());
    }

    #[test]
    fn test_rule_reference_blocks_delete() {
        let mut session = loaded();
        let err = session.delete_service("ssh").unwrap_err();
        assert!(matches!(err, Error::StillReferenced { .. }));
        session.remove_rule(1).unwrap();
        session.delete_service("ssh").unwrap();
    }

    #[test]
    fn test_recursive_zone_delete() {
        let mut session = loaded();
        assert!(matches!(
            session.delete_zone("lan", false),
            Err(Error::StillReferenced { .. })
        ));
        // rule 1 names office.lan
        assert!(session.delete_zone("lan", true).is_err());
        session.remove_rule(1).unwrap();
        session.delete_zone("lan", true).unwrap();
        assert!(session.zones().search("pc1.office.lan").is_none());
        let lan = session.interfaces().search("lan").unwrap();
        assert_eq!(session.interfaces().get(lan).unwrap().refcnt_network, 0);
    }

    #[test]
    fn test_rename_zone_cascades() {
        let mut session = loaded();
        session.rename_zone("web.dmz", "site.dmz").unwrap();
        assert!(session.zones().search("www.site.dmz").is_some());
        assert_eq!(session.rules().get(2).map(|r| r.to.as_str()), Some("www.site.dmz"));
        assert!(session.blocklist().contains("www.site.dmz"));
        assert!(session.rename_zone("site.dmz", "x.lan").is_err());
    }

    #[test]
    fn test_rename_host_updates_group_members() {
        let mut session = loaded();
        session.rename_zone("www.web.dmz", "www2.web.dmz").unwrap();
        let group = session.zones().search("servers.web.dmz").unwrap();
        assert_eq!(session.zones().member_names(group), ["www2"]);
    }

    #[test]
    fn test_backend_failure_leaves_memory_unchanged() {
        let mut backend = seeded_backend();
        backend.fail_writes(true);
        let mut session = session_with(backend);
        session.load().unwrap();

        assert!(matches!(
            session.new_zone("ext", ZoneKind::Zone),
            Err(Error::Backend(_))
        ));
        assert!(session.zones().search("ext").is_none());
        assert!(session.rename_zone("dmz", "pub").is_err());
        assert!(session.zones().search("dmz").is_some());
        assert!(session.insert_rule(1, "accept service http from lan to firewall").is_err());
        assert_eq!(session.rules().len(), 3);
    }

    #[test]
    fn test_failed_rule_write_reverts_zone_rename() {
        let mut backend = seeded_backend();
        backend.fail_writes_in(Category::Rules, true);
        let mut session = session_with(backend);
        session.load().unwrap();

        // rule 2 and the blocklist name www.web.dmz
        let err = session.rename_zone("dmz", "pub").unwrap_err();
        assert!(matches!(err, Error::Backend(_)), "{err}");
        assert!(session.zones().search("dmz").is_some());
        session.set_zone_active("dmz", false).unwrap();

        let report = session.load().unwrap();
        assert_eq!(report.skipped, 0);
        assert_eq!(report.blocked, 1);
        assert!(session.zones().search("pub").is_none());
        assert!(session.zones().search("www.web.dmz").is_some());
        let dmz = session.zones().search("dmz").unwrap();
        assert!(!session.zones().get(dmz).unwrap().active);
        assert_eq!(session.rules().get(2).map(|r| r.to.as_str()), Some("www.web.dmz"));
    }

    #[test]
    fn test_failed_rule_write_reverts_host_rename() {
        let mut backend = seeded_backend();
        backend.fail_writes_in(Category::Rules, true);
        let mut session = session_with(backend);
        session.load().unwrap();

        assert!(session.rename_zone("www.web.dmz", "www2.web.dmz").is_err());
        session.load().unwrap();
        assert!(session.zones().search("www2.web.dmz").is_none());
        let group = session.zones().search("servers.web.dmz").unwrap();
        assert_eq!(session.zones().member_names(group), ["www"]);
    }

    #[test]
    fn test_failed_rule_write_reverts_service_rename() {
        let mut backend = seeded_backend();
        backend.fail_writes_in(Category::Rules, true);
        let mut session = session_with(backend);
        session.load().unwrap();

        assert!(matches!(
            session.rename_service("ssh", "secure-shell"),
            Err(Error::Backend(_))
        ));
        session.set_service_active("ssh", false).unwrap();
        session.load().unwrap();
        assert!(session.services().search("secure-shell").is_none());
        let ssh = session.services().search("ssh").unwrap();
        assert!(!session.services().get(ssh).unwrap().active);
        assert_eq!(session.rules().get(1).map(|r| r.service.as_str()), Some("ssh"));
    }

    #[test]
    fn test_failed_network_write_reverts_interface_rename() {
        let mut backend = seeded_backend();
        backend.fail_writes_in(Category::Zones, true);
        let mut session = session_with(backend);
        session.load().unwrap();

        // office.lan is attached to lan
        assert!(session.rename_interface("lan", "lan0").is_err());
        assert!(session.interfaces().search("lan").is_some());

        let report = session.load().unwrap();
        assert_eq!(report.skipped, 0);
        assert!(session.interfaces().search("lan0").is_none());
        let lan = session.interfaces().search("lan").unwrap();
        assert_eq!(session.interfaces().get(lan).unwrap().refcnt_network, 1);
        assert!(session.zones().search("firewall(lan)").is_some());
    }

    #[test]
    fn test_rename_service_updates_rules() {
        let mut session = loaded();
        let ssh = session.services().search("ssh");
        session.rename_service("ssh", "secure-shell").unwrap();
        assert_eq!(session.services().search("secure-shell"), ssh);
        assert_eq!(
            session.rules().get(1).map(|r| r.service.as_str()),
            Some("secure-shell")
        );
        assert_eq!(session.service_by_port(PROTO_TCP, 22), ssh);
        assert!(matches!(
            session.rename_service("secure-shell", "http"),
            Err(Error::AlreadyExists { .. })
        ));

        session.load().unwrap();
        assert!(session.services().search("ssh").is_none());
        assert_eq!(
            session.rules().get(1).map(|r| r.service.as_str()),
            Some("secure-shell")
        );
        let (_, errors) = session.analyze_rules();
        assert_eq!(errors.iter().map(|(n, _)| *n).collect::<Vec<_>>(), [3]);
    }

    #[test]
    fn test_inactive_service_fails_its_rules() {
        let mut session = loaded();
        session.set_service_active("ssh", false).unwrap();
        let (_, errors) = session.analyze_rules();
        assert_eq!(errors.iter().map(|(n, _)| *n).collect::<Vec<_>>(), [1, 3]);

        session.load().unwrap();
        let ssh = session.services().search("ssh").unwrap();
        assert!(!session.services().get(ssh).unwrap().active);
        session.set_service_active("ssh", true).unwrap();
        assert_eq!(session.analyze_rules().1.len(), 1);
    }

    #[test]
    fn test_interface_activity_follows_firewall_zone() {
        let mut session = loaded();
        session.set_interface_active("lan", false).unwrap();
        let firewall = session.zones().search("firewall(lan)").unwrap();
        assert!(!session.zones().is_active(firewall));

        session.load().unwrap();
        let lan = session.interfaces().search("lan").unwrap();
        assert!(!session.interfaces().get(lan).unwrap().active);
        let firewall = session.zones().search("firewall(lan)").unwrap();
        assert!(!session.zones().is_active(firewall));

        session.set_interface_active("lan", true).unwrap();
        let firewall = session.zones().search("firewall(lan)").unwrap();
        assert!(session.zones().is_active(firewall));
    }

    #[test]
    fn test_interface_device_change() {
        let mut session = loaded();
        session.set_interface_device("lan", "eth1:0").unwrap();
        assert!(session.set_interface_device("lan", "eth1:0:1").is_err());
        assert!(session.set_interface_device("lan", "a-very-long-device-name").is_err());

        session.load().unwrap();
        let lan = session.interfaces().search("lan").unwrap();
        let iface = session.interfaces().get(lan).unwrap();
        assert_eq!(iface.device, "eth1:0");
        assert!(iface.is_virtual);
    }

    #[test]
    fn test_new_zone_requires_parent() {
        let mut session = loaded();
        assert!(matches!(
            session.new_zone("h.nonet.dmz", ZoneKind::Host),
            Err(Error::NotFound { what: "network", .. })
        ));
        assert!(session.new_zone("any", ZoneKind::Zone).is_err());
        session.new_zone("db.web.dmz", ZoneKind::Host).unwrap();
        session.set_zone_address("db.web.dmz", "10.1.0.20").unwrap();
        assert_eq!(
            session.zone_by_ip("10.1.0.20".parse().unwrap()),
            session.zones().search("db.web.dmz")
        );
    }

    #[test]
    fn test_index_follows_address_changes() {
        let mut session = loaded();
        let www = session.zones().search("www.web.dmz");
        assert_eq!(session.zone_by_ip("10.1.0.10".parse().unwrap()), www);
        session.set_zone_address("www.web.dmz", "10.1.0.11").unwrap();
        assert_eq!(session.zone_by_ip("10.1.0.10".parse().unwrap()), None);
        assert_eq!(session.zone_by_ip("10.1.0.11".parse().unwrap()), www);
    }

    #[test]
    fn test_service_ports_and_index() {
        let mut session = loaded();
        let ssh = session.services().search("ssh");
        assert_eq!(session.service_by_port(PROTO_TCP, 22), ssh);
        session.set_service_ports("ssh", "tcp", "2222").unwrap();
        assert_eq!(session.service_by_port(PROTO_TCP, 22), None);
        assert_eq!(session.service_by_port(PROTO_TCP, 2222), ssh);
        assert!(session.set_service_ports("ssh", "TCP", "99999").is_err());
    }

    #[test]
    fn test_interface_lifecycle() {
        let mut session = loaded();
        session.new_interface("dmz-if", "eth2").unwrap();
        assert!(session.new_interface("bad", "eth2:1:2").is_err());
        session.set_interface_ipv4("dmz-if", "10.1.0.1").unwrap();
        assert!(session.zones().search("firewall(dmz-if)").is_some());
        session.attach_interface("web.dmz", "dmz-if").unwrap();
        assert!(matches!(
            session.delete_interface("dmz-if"),
            Err(Error::StillReferenced { .. })
        ));
        session.rename_interface("dmz-if", "dmz0").unwrap();
        assert!(session.zones().search("firewall(dmz0)").is_some());
        assert!(session.zones().search("firewall(dmz-if)").is_none());
        session.detach_interface("web.dmz", "dmz0").unwrap();
        session.delete_interface("dmz0").unwrap();
        assert!(session.zones().search("firewall(dmz0)").is_none());
    }

    #[test]
    fn test_block_and_unblock() {
        let mut session = loaded();
        session.block("pc1.office.lan").unwrap();
        assert!(session.block("pc1.office.lan").is_err());
        assert!(matches!(
            session.delete_zone("pc1.office.lan", false),
            Err(Error::StillReferenced { .. })
        ));
        session.unblock("pc1.office.lan").unwrap();
        assert!(session.unblock("pc1.office.lan").is_err());
    }

    #[test]
    fn test_insert_rule_validates() {
        let mut session = loaded();
        assert!(matches!(
            session.insert_rule(1, "accept service nope from lan to firewall"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            session.insert_rule(1, "accept nope"),
            Err(Error::Parse(_))
        ));
        assert_eq!(session.insert_rule(2, "drop service any from any to any").unwrap(), 2);
        assert_eq!(session.rules().len(), 4);
        assert_eq!(session.rules().get(3).map(|r| r.service.as_str()), Some("http"));
    }

    #[test]
    fn test_close_releases_backend() {
        let session = Session::with_backend(AppConfig::default(), Box::new(MemoryBackend::new())).unwrap();
        assert_eq!(session.backend_refcount(), 4);
        session.close().unwrap();
    }
}

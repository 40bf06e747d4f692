//! Name resolution and per-action checks
//!
//! [`analyze_rule`] turns a parsed [`Rule`] into a [`RuleCache`]: every
//! operand resolved to a handle into the object store (or a sentinel), the
//! target string computed and the rule classified. A rule that fails any
//! check yields an error and no cache; other rules are unaffected.

use super::action::{RuleType, determine_action, rule_type};
use super::options::RuleOptions;
use super::{ANY, Action, Rule};
use crate::collections::NodeRef;
use crate::core::error::{Error, Result};
use crate::core::interfaces::Interfaces;
use crate::core::services::Services;
use crate::core::zones::{FIREWALL_PREFIX, ZoneKind, Zones};

/// Dangers a protect rule can guard against
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Danger {
    Spoofing,
    DhcpClient,
    DhcpServer,
}

/// Resolved `from`/`to` operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Any,
    /// The firewall itself; `Some` for a specific `firewall(<iface>)` entry
    Firewall(Option<NodeRef>),
    Zone(NodeRef),
}

impl Endpoint {
    pub const fn is_firewall(self) -> bool {
        matches!(self, Endpoint::Firewall(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRef {
    Any,
    Service(NodeRef),
}

/// Object a protect rule is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectTarget {
    Zone(NodeRef),
    Interface(NodeRef),
}

/// Validated, resolved form of one rule, read-only for code generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCache {
    pub number: u32,
    pub active: bool,
    pub action: Action,
    /// Target name, e.g. `ACCEPT` or `REJECT --reject-with tcp-reset`
    pub target: String,
    pub rule_type: RuleType,
    pub from: Endpoint,
    pub to: Endpoint,
    pub service: ServiceRef,
    pub who: Option<ProtectTarget>,
    pub danger: Option<Danger>,
    pub source: Option<String>,
    pub in_int: Option<NodeRef>,
    pub out_int: Option<NodeRef>,
    pub via_int: Option<NodeRef>,
    pub options: RuleOptions,
}

/// Read access to the object store during analysis
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    pub zones: &'a Zones,
    pub services: &'a Services,
    pub interfaces: &'a Interfaces,
}

impl<'a> Resolver<'a> {
    pub fn new(zones: &'a Zones, services: &'a Services, interfaces: &'a Interfaces) -> Self {
        Self {
            zones,
            services,
            interfaces,
        }
    }

    fn endpoint(&self, name: &str, field: &str) -> Result<Endpoint> {
        if name.is_empty() {
            return Err(Error::validation(field, "operand is empty"));
        }
        if name == ANY {
            return Ok(Endpoint::Any);
        }
        if name == FIREWALL_PREFIX || name == "firewall(any)" {
            return Ok(Endpoint::Firewall(None));
        }
        let handle = self.zones.require(name)?;
        if !self.zones.is_active(handle) {
            return Err(Error::validation(field, format!("'{name}' is inactive")));
        }
        if name.starts_with(FIREWALL_PREFIX)
            && self.zones.get(handle).is_some_and(|z| z.is_firewall())
        {
            return Ok(Endpoint::Firewall(Some(handle)));
        }
        Ok(Endpoint::Zone(handle))
    }

    fn service(&self, name: &str) -> Result<ServiceRef> {
        if name == ANY {
            return Ok(ServiceRef::Any);
        }
        let handle = self.services.require(name)?;
        if self.services.get(handle).is_some_and(|s| !s.active) {
            return Err(Error::validation(
                "service",
                format!("'{name}' is inactive"),
            ));
        }
        Ok(ServiceRef::Service(handle))
    }

    fn interface(&self, name: Option<&str>, field: &str) -> Result<Option<NodeRef>> {
        let Some(name) = name else {
            return Ok(None);
        };
        let handle = self.interfaces.require(name)?;
        if self.interfaces.get(handle).is_some_and(|i| !i.active) {
            return Err(Error::validation(field, format!("interface '{name}' is inactive")));
        }
        Ok(Some(handle))
    }

    fn protect_target(&self, who: &str) -> Result<Option<ProtectTarget>> {
        if who.is_empty() {
            return Ok(None);
        }
        if let Some(handle) = self.zones.search(who) {
            if !self.zones.is_active(handle) {
                return Err(Error::validation("who", format!("'{who}' is inactive")));
            }
            return Ok(Some(ProtectTarget::Zone(handle)));
        }
        if let Some(handle) = self.interfaces.search(who) {
            return Ok(Some(ProtectTarget::Interface(handle)));
        }
        Err(Error::NotFound {
            what: "zone or interface",
            name: who.to_string(),
        })
    }
}

fn analyze_protect(rule: &Rule, resolver: &Resolver<'_>, mut options: RuleOptions) -> Result<RuleCache> {
    let danger: Danger = rule.danger.parse().map_err(|_| {
        Error::validation("danger", format!("unknown danger '{}'", rule.danger))
    })?;
    let who = resolver.protect_target(&rule.who)?;
    let target = determine_action(rule.action, &mut options)?;
    Ok(RuleCache {
        number: rule.number,
        active: rule.active,
        action: rule.action,
        target,
        rule_type: RuleType::Protect,
        from: Endpoint::Any,
        to: Endpoint::Any,
        service: ServiceRef::Any,
        who,
        danger: Some(danger),
        source: (!rule.source.is_empty()).then(|| rule.source.clone()),
        in_int: None,
        out_int: None,
        via_int: None,
        options,
    })
}

/// Resolves and checks one rule.
///
/// Returns `Ok(None)` for separators and inactive rules, which produce no
/// code.
///
/// # Errors
///
/// - [`Error::NotFound`] for operands that don't resolve
/// - [`Error::Validation`] for inactive operands and action/operand
///   combinations that make no sense (firewall to firewall, port
///   forwarding to a non-host, masquerading to `any`, ...)
pub fn analyze_rule(rule: &Rule, resolver: &Resolver<'_>) -> Result<Option<RuleCache>> {
    if rule.action == Action::Separator || !rule.active {
        return Ok(None);
    }
    let mut options = rule.options.clone().unwrap_or_default();
    if rule.action == Action::Protect {
        return analyze_protect(rule, resolver, options).map(Some);
    }

    let from = resolver.endpoint(&rule.from, "from")?;
    let to = resolver.endpoint(&rule.to, "to")?;
    let service = resolver.service(&rule.service)?;

    if from.is_firewall() && to.is_firewall() {
        return Err(Error::validation(
            "to",
            "'from' and 'to' can't both be the firewall",
        ));
    }

    let kind = rule_type(rule.action, from.is_firewall(), to.is_firewall());
    let in_int = resolver.interface(options.in_int.as_deref(), "in_int")?;
    let out_int = resolver.interface(options.out_int.as_deref(), "out_int")?;
    let via_int = resolver.interface(options.via_int.as_deref(), "via_int")?;

    if rule.action.needs_host_target() {
        let is_host = match to {
            Endpoint::Zone(h) => resolver.zones.get(h).is_some_and(|z| z.kind == ZoneKind::Host),
            _ => false,
        };
        if !is_host {
            return Err(Error::validation(
                "to",
                format!("{} needs a host as destination, got '{}'", rule.action, rule.to),
            ));
        }
    }

    match rule.action {
        Action::Portfw | Action::Dnat if from.is_firewall() => {
            return Err(Error::validation(
                "from",
                format!("{} can't originate from the firewall", rule.action),
            ));
        }
        Action::Bounce => {
            let has_address = via_int
                .and_then(|h| resolver.interfaces.get(h))
                .is_some_and(|i| i.ipv4.is_some());
            if !has_address {
                return Err(Error::validation(
                    "via_int",
                    "bounce needs a 'via_int' interface with an address",
                ));
            }
        }
        Action::Snat | Action::Masq if to == Endpoint::Any => {
            return Err(Error::validation(
                "to",
                format!("{} can't target 'any'", rule.action),
            ));
        }
        Action::Redirect if options.redirectport.is_none() => {
            return Err(Error::validation(
                "redirectport",
                "redirect needs the 'redirectport' option",
            ));
        }
        Action::Queue
            if !matches!(kind, RuleType::Input | RuleType::Output | RuleType::Forward) =>
        {
            return Err(Error::validation(
                "action",
                format!("queue is not valid for {kind} rules"),
            ));
        }
        _ => {}
    }

    if options.reject_type.is_some() && rule.action != Action::Reject {
        tracing::warn!(
            "Rule {}: rejecttype only applies to reject rules, ignoring it",
            rule.number
        );
        options.reject_type = None;
    }

    let target = determine_action(rule.action, &mut options)?;

    Ok(Some(RuleCache {
        number: rule.number,
        active: rule.active,
        action: rule.action,
        target,
        rule_type: kind,
        from,
        to,
        service,
        who: None,
        danger: None,
        source: None,
        in_int,
        out_int,
        via_int,
        options,
    }))
}

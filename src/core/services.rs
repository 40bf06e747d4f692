//! Services: named protocol and port-range selectors
//!
//! # Persisted form
//!
//! One attribute per protocol, values space separated:
//!
//! - `TCP` / `UDP`: `[src[:srchi]>]dst[:dsthi]`, e.g. `1024:65535>80 8080:8090`
//! - `ICMP`: `type[.code]`, e.g. `8 3.4`
//! - `GRE` / `ESP` / `AH` / `PROTO_<n>`: `yes`
//!
//! A source range of `0` means any source port. For ICMP the destination
//! fields carry the type (`dst_low`) and code (`dst_high`).

use crate::collections::{List, NodeRef};
use crate::core::Status;
use crate::core::error::{Error, Result};
use crate::validators::validate_port_range;
use std::collections::BTreeMap;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_GRE: u8 = 47;
pub const PROTO_ESP: u8 = 50;
pub const PROTO_AH: u8 = 51;

/// Persisted attribute names carrying port lists
pub const PORT_ATTRIBUTES: &[&str] = &["TCP", "UDP", "ICMP", "GRE", "ESP", "AH"];

/// One protocol/port range of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServicePort {
    pub protocol: u8,
    pub src_low: u16,
    pub src_high: u16,
    pub dst_low: u16,
    pub dst_high: u16,
}

impl ServicePort {
    pub const fn tcp(dst_low: u16, dst_high: u16) -> Self {
        Self {
            protocol: PROTO_TCP,
            src_low: 0,
            src_high: 0,
            dst_low,
            dst_high,
        }
    }

    pub const fn udp(dst_low: u16, dst_high: u16) -> Self {
        Self {
            protocol: PROTO_UDP,
            src_low: 0,
            src_high: 0,
            dst_low,
            dst_high,
        }
    }

    pub const fn icmp(icmp_type: u16, code: u16) -> Self {
        Self {
            protocol: PROTO_ICMP,
            src_low: 0,
            src_high: 0,
            dst_low: icmp_type,
            dst_high: code,
        }
    }

    /// Bare protocol entry without ports (GRE, ESP, AH, ...)
    pub const fn proto(protocol: u8) -> Self {
        Self {
            protocol,
            src_low: 0,
            src_high: 0,
            dst_low: 0,
            dst_high: 0,
        }
    }

    /// Attribute this entry is persisted under
    pub fn attribute(&self) -> String {
        match self.protocol {
            PROTO_TCP => "TCP".to_string(),
            PROTO_UDP => "UDP".to_string(),
            PROTO_ICMP => "ICMP".to_string(),
            PROTO_GRE => "GRE".to_string(),
            PROTO_ESP => "ESP".to_string(),
            PROTO_AH => "AH".to_string(),
            n => format!("PROTO_{n}"),
        }
    }

    /// Value token for this entry inside its attribute
    pub fn token(&self) -> String {
        match self.protocol {
            PROTO_TCP | PROTO_UDP => {
                let dst = range_token(self.dst_low, self.dst_high);
                if self.src_low == 0 {
                    dst
                } else {
                    format!("{}>{}", range_token(self.src_low, self.src_high), dst)
                }
            }
            PROTO_ICMP => {
                if self.dst_high == 0 {
                    self.dst_low.to_string()
                } else {
                    format!("{}.{}", self.dst_low, self.dst_high)
                }
            }
            _ => "yes".to_string(),
        }
    }
}

fn range_token(low: u16, high: u16) -> String {
    if high == 0 || high == low {
        low.to_string()
    } else {
        format!("{low}:{high}")
    }
}

fn parse_range(text: &str) -> std::result::Result<(u16, u16), String> {
    let (low, high) = match text.split_once(':') {
        Some((l, h)) => (l, h),
        None => (text, text),
    };
    let low: u16 = low
        .trim()
        .parse()
        .map_err(|_| format!("invalid port '{low}'"))?;
    let high: u16 = high
        .trim()
        .parse()
        .map_err(|_| format!("invalid port '{high}'"))?;
    validate_port_range(low, high)
}

/// Parses the value of one port attribute into entries.
///
/// # Errors
///
/// Returns `Err` with a description of the first malformed token.
pub fn parse_port_attribute(attribute: &str, value: &str) -> std::result::Result<Vec<ServicePort>, String> {
    let protocol = match attribute {
        "TCP" => PROTO_TCP,
        "UDP" => PROTO_UDP,
        "ICMP" => PROTO_ICMP,
        "GRE" => PROTO_GRE,
        "ESP" => PROTO_ESP,
        "AH" => PROTO_AH,
        other => other
            .strip_prefix("PROTO_")
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| format!("unknown protocol attribute '{other}'"))?,
    };

    match protocol {
        PROTO_TCP | PROTO_UDP => value
            .split_whitespace()
            .map(|token| -> std::result::Result<ServicePort, String> {
                let (src, dst) = match token.split_once('>') {
                    Some((s, d)) => (Some(parse_range(s)?), d),
                    None => (None, token),
                };
                let (dst_low, dst_high) = parse_range(dst)?;
                let (src_low, src_high) = src.unwrap_or((0, 0));
                Ok(ServicePort {
                    protocol,
                    src_low,
                    src_high,
                    dst_low,
                    dst_high,
                })
            })
            .collect(),
        PROTO_ICMP => value
            .split_whitespace()
            .map(|token| -> std::result::Result<ServicePort, String> {
                let (t, c) = token.split_once('.').unwrap_or((token, "0"));
                let icmp_type: u8 = t.parse().map_err(|_| format!("invalid ICMP type '{t}'"))?;
                let code: u8 = c.parse().map_err(|_| format!("invalid ICMP code '{c}'"))?;
                Ok(ServicePort::icmp(u16::from(icmp_type), u16::from(code)))
            })
            .collect(),
        _ => {
            if value.trim().eq_ignore_ascii_case("yes") {
                Ok(vec![ServicePort::proto(protocol)])
            } else {
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Debug)]
pub struct Service {
    pub name: String,
    pub active: bool,
    pub status: Status,
    pub ports: List<ServicePort>,
    /// Connection-tracking helper (`ftp`, `sip`, ...)
    pub helper: Option<String>,
    pub broadcast: bool,
    pub comment: String,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            status: Status::Unknown,
            ports: List::new(),
            helper: None,
            broadcast: false,
            comment: String::new(),
        }
    }

    /// Groups the port list back into `(attribute, value)` pairs.
    pub fn port_attributes(&self) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for port in self.ports.values() {
            out.entry(port.attribute()).or_default().push(port.token());
        }
        out.into_iter().map(|(k, v)| (k, v.join(" "))).collect()
    }

    /// `true` if any entry covers `protocol`/`port`.
    pub fn matches(&self, protocol: u8, port: u16) -> bool {
        self.ports.values().any(|p| {
            p.protocol == protocol
                && match protocol {
                    PROTO_TCP | PROTO_UDP => {
                        let high = if p.dst_high < p.dst_low { p.dst_low } else { p.dst_high };
                        (p.dst_low..=high).contains(&port)
                    }
                    PROTO_ICMP => p.dst_low == port,
                    _ => true,
                }
        })
    }
}

/// Alphabetically ordered service collection
#[derive(Debug, Default)]
pub struct Services {
    list: List<Service>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, handle: NodeRef) -> Option<&Service> {
        self.list.get(handle)
    }

    pub fn get_mut(&mut self, handle: NodeRef) -> Option<&mut Service> {
        self.list.get_mut(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &Service)> + '_ {
        self.list.iter()
    }

    pub fn search(&self, name: &str) -> Option<NodeRef> {
        self.list.find(|s| s.name == name)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no service has that name.
    pub fn require(&self, name: &str) -> Result<NodeRef> {
        self.search(name).ok_or_else(|| Error::NotFound {
            what: "service",
            name: name.to_string(),
        })
    }

    /// Inserts before the first service whose name sorts after `service`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] if the name is taken.
    pub fn insert_sorted(&mut self, service: Service) -> Result<NodeRef> {
        if self.search(&service.name).is_some() {
            return Err(Error::AlreadyExists {
                what: "service",
                name: service.name,
            });
        }
        let before = self.list.find(|s| s.name > service.name);
        Ok(match before {
            Some(at) => self.list.insert_before(Some(at), service)?,
            None => self.list.append(service),
        })
    }

    /// # Errors
    ///
    /// Returns an error for stale handles.
    pub fn take(&mut self, handle: NodeRef) -> Result<Service> {
        Ok(self.list.take(handle)?)
    }

    /// Renames in place and moves the entry to its new sorted position.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] if the new name is taken.
    pub fn rename(&mut self, handle: NodeRef, new_name: &str) -> Result<()> {
        if self.search(new_name).is_some() {
            return Err(Error::AlreadyExists {
                what: "service",
                name: new_name.to_string(),
            });
        }
        let service = self
            .list
            .get_mut(handle)
            .ok_or_else(|| Error::Parameter("stale service handle".into()))?;
        service.name = new_name.to_string();
        service.status = Status::Changed;
        let before = self
            .list
            .iter()
            .find(|(h, s)| *h != handle && s.name.as_str() > new_name)
            .map(|(h, _)| h);
        self.list.move_before(handle, before)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_attribute() {
        let ports = parse_port_attribute("TCP", "80 1024:65535>8080:8090").unwrap();
        assert_eq!(
            ports,
            [
                ServicePort::tcp(80, 80),
                ServicePort {
                    protocol: PROTO_TCP,
                    src_low: 1024,
                    src_high: 65535,
                    dst_low: 8080,
                    dst_high: 8090,
                },
            ]
        );
        assert!(parse_port_attribute("TCP", "0").is_err());
        assert!(parse_port_attribute("UDP", "90:80").is_err());
        assert!(parse_port_attribute("UDP", "http").is_err());
    }

    #[test]
    fn test_parse_icmp_and_bare_protocols() {
        assert_eq!(
            parse_port_attribute("ICMP", "8 3.4").unwrap(),
            [ServicePort::icmp(8, 0), ServicePort::icmp(3, 4)]
        );
        assert!(parse_port_attribute("ICMP", "300").is_err());
        assert_eq!(
            parse_port_attribute("GRE", "yes").unwrap(),
            [ServicePort::proto(PROTO_GRE)]
        );
        assert_eq!(
            parse_port_attribute("PROTO_41", "yes").unwrap(),
            [ServicePort::proto(41)]
        );
        assert!(parse_port_attribute("ESP", "no").unwrap().is_empty());
        assert!(parse_port_attribute("PROTO_x", "yes").is_err());
    }

    #[test]
    fn test_port_attributes_roundtrip() {
        let mut service = Service::new("web");
        for value in ["80 443", "1024:65535>8000:8010"] {
            for port in parse_port_attribute("TCP", value).unwrap() {
                service.ports.append(port);
            }
        }
        service.ports.append(ServicePort::icmp(8, 0));
        service.ports.append(ServicePort::proto(41));
        let attrs = service.port_attributes();
        assert_eq!(attrs["TCP"], "80 443 1024:65535>8000:8010");
        assert_eq!(attrs["ICMP"], "8");
        assert_eq!(attrs["PROTO_41"], "yes");
    }

    #[test]
    fn test_matches() {
        let mut service = Service::new("range");
        service.ports.append(ServicePort::tcp(1000, 1010));
        assert!(service.matches(PROTO_TCP, 1005));
        assert!(!service.matches(PROTO_TCP, 1011));
        assert!(!service.matches(PROTO_UDP, 1005));
    }

    #[test]
    fn test_sorted_insert_and_rename() {
        let mut services = Services::new();
        for name in ["ssh", "dns", "http"] {
            services.insert_sorted(Service::new(name)).unwrap();
        }
        let order: Vec<_> = services.iter().map(|(_, s)| s.name.clone()).collect();
        assert_eq!(order, ["dns", "http", "ssh"]);

        let dns = services.search("dns").unwrap();
        services.rename(dns, "zdns").unwrap();
        let order: Vec<_> = services.iter().map(|(_, s)| s.name.clone()).collect();
        assert_eq!(order, ["http", "ssh", "zdns"]);
        assert_eq!(services.search("zdns"), Some(dns));
        assert!(services.rename(dns, "ssh").is_err());
        assert!(services.insert_sorted(Service::new("ssh")).is_err());
    }
}

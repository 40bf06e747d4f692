//! Input validation and sanitization functions for zonefw
//!
//! This module centralizes validation for object names, device names and
//! option values so that the object store and the rule engine reject the
//! same inputs for the same reasons.

use crate::core::rules::options::LimitUnit;
use crate::core::zones::ZoneKind;
use regex::Regex;

/// Maximum length of each dotted component of a zone/network/host/group name
pub const MAX_ZONE_PART: usize = 32;

/// Maximum length of a service name
pub const MAX_SERVICE_NAME: usize = 32;

/// Maximum length of an interface (policy object) name
pub const MAX_INTERFACE_NAME: usize = 32;

/// Maximum length of a kernel device name (IFNAMSIZ - 1)
pub const MAX_DEVICE_NAME: usize = 15;

/// Maximum length of a log prefix accepted by the log target
pub const MAX_LOG_PREFIX: usize = 14;

/// Maximum length of a free-text comment
pub const MAX_COMMENT: usize = 256;

/// Operand values that are never looked up and can't be used as object names
pub const RESERVED_NAMES: &[&str] = &["any", "firewall"];

/// Rule grammar keywords; an operand spelled like one would lex as the keyword
pub const GRAMMAR_KEYWORDS: &[&str] = &["service", "from", "to", "against", "options"];

fn is_keyword(name: &str) -> bool {
    GRAMMAR_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(name))
}

/// Compiled name patterns, built once per session.
#[derive(Debug, Clone)]
pub struct NameRules {
    zone_part: Regex,
    service: Regex,
    interface: Regex,
}

impl NameRules {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            zone_part: Regex::new(r"^[a-zA-Z0-9_-]+$")?,
            service: Regex::new(r"^[a-zA-Z0-9_.-]+$")?,
            interface: Regex::new(r"^[a-zA-Z0-9_-]+$")?,
        })
    }

    /// Validates a dotted zone-family name against the depth `kind` demands.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the component count doesn't match the kind, a component
    /// is empty/too long/contains invalid characters, or the name is reserved.
    pub fn validate_zone_name(&self, name: &str, kind: ZoneKind) -> Result<(), String> {
        let parts: Vec<&str> = name.split('.').collect();
        let expected = match kind {
            ZoneKind::Zone => 1,
            ZoneKind::Network => 2,
            ZoneKind::Host | ZoneKind::Group => 3,
            ZoneKind::Firewall => return Err("firewall zones are created internally".into()),
        };
        if parts.len() != expected {
            return Err(format!(
                "{} name '{}' must have {} dotted component(s)",
                kind.as_str(),
                name,
                expected
            ));
        }
        for part in &parts {
            if part.is_empty() {
                return Err(format!("empty component in '{name}'"));
            }
            if part.len() > MAX_ZONE_PART {
                return Err(format!(
                    "component '{part}' too long (max {MAX_ZONE_PART} characters)"
                ));
            }
            if !self.zone_part.is_match(part) {
                return Err(format!("component '{part}' contains invalid characters"));
            }
            if RESERVED_NAMES.contains(&part.to_ascii_lowercase().as_str()) {
                return Err(format!("'{part}' is a reserved name"));
            }
        }
        if is_keyword(name) {
            return Err(format!("'{name}' is a rule keyword"));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `Err` for empty, too long, reserved or badly formed names.
    pub fn validate_service_name(&self, name: &str) -> Result<(), String> {
        check_simple_name(name, MAX_SERVICE_NAME, &self.service, "service")
    }

    /// # Errors
    ///
    /// Returns `Err` for empty, too long, reserved or badly formed names.
    pub fn validate_interface_name(&self, name: &str) -> Result<(), String> {
        check_simple_name(name, MAX_INTERFACE_NAME, &self.interface, "interface")
    }
}

fn check_simple_name(name: &str, max: usize, pattern: &Regex, what: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{what} name cannot be empty"));
    }
    if name.len() > max {
        return Err(format!("{what} name too long (max {max} characters)"));
    }
    if !pattern.is_match(name) {
        return Err(format!("{what} name '{name}' contains invalid characters"));
    }
    if RESERVED_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(format!("'{name}' is a reserved name"));
    }
    if is_keyword(name) {
        return Err(format!("'{name}' is a rule keyword"));
    }
    Ok(())
}

/// Strips control characters from a comment and bounds its length.
///
/// Quotes survive; they are escaped when the comment is written out.
///
/// # Examples
///
/// ```
/// use zonefw::validators::sanitize_comment;
///
/// assert_eq!(sanitize_comment("web \"front\"\nend"), "web \"front\"end");
/// ```
pub fn sanitize_comment(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_COMMENT)
        .collect()
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

/// Validates a kernel network device name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - A single `:` alias separator is allowed for virtual devices (`eth0:1`)
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` if the device name violates kernel constraints.
pub fn validate_device(name: &str, is_virtual: bool) -> Result<String, String> {
    if name.is_empty() {
        return Ok(String::new());
    }

    if name.len() > MAX_DEVICE_NAME {
        return Err(format!(
            "Device name too long (max {MAX_DEVICE_NAME} characters)"
        ));
    }

    if name == "." || name == ".." {
        return Err("Invalid device name".to_string());
    }

    let colons = name.matches(':').count();
    if colons > 1 || (colons == 1 && !is_virtual) {
        return Err("Only virtual devices may carry an ':' alias".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'))
    {
        return Err("Device name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates a rate limit value.
///
/// Returns Ok(Some(warning)) for high but acceptable values.
/// Returns Err for values that exceed reasonable limits.
///
/// # Errors
///
/// Returns `Err` if the count is zero or exceeds the maximum for the unit.
pub fn validate_rate_limit(count: u32, unit: LimitUnit) -> Result<Option<String>, String> {
    if count == 0 {
        return Err("Rate limit must be at least 1".to_string());
    }

    let (max, warn) = match unit {
        LimitUnit::Sec => (10_000, 1_000),
        LimitUnit::Min => (100_000, 10_000),
        LimitUnit::Hour => (1_000_000, 100_000),
        LimitUnit::Day => (10_000_000, 1_000_000),
    };

    if count > max {
        return Err(format!("Rate limit exceeds max {}/{}", max, unit.as_str()));
    }

    if count > warn {
        return Ok(Some(format!(
            "High rate ({}/{}) - typical: 10-{}",
            count,
            unit.as_str(),
            warn / 10
        )));
    }

    Ok(None)
}

/// Validates a log prefix.
///
/// Log prefixes appear in kernel logs; the target truncates anything past
/// [`MAX_LOG_PREFIX`] characters.
///
/// # Errors
///
/// Returns `Err` if:
/// - Prefix exceeds [`MAX_LOG_PREFIX`] characters
/// - Prefix contains control characters or quotes
pub fn validate_log_prefix(prefix: &str) -> Result<String, String> {
    if prefix.chars().count() > MAX_LOG_PREFIX {
        return Err(format!(
            "Log prefix '{prefix}' too long (max {MAX_LOG_PREFIX} chars)"
        ));
    }

    if prefix.chars().any(|c| c.is_control() || c == '"') {
        return Err("Log prefix contains invalid characters".to_string());
    }

    Ok(prefix.to_string())
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_validate_port_rejects_zero(port in any::<u16>()) {
            let result = validate_port(port);
            if port == 0 {
                prop_assert!(result.is_err());
            } else {
                prop_assert_eq!(result.unwrap(), port);
            }
        }

        #[test]
        fn test_validate_port_range_consistency(
            start in 1u16..=65535,
            end in 1u16..=65535
        ) {
            let result = validate_port_range(start, end);
            prop_assert_eq!(result.is_ok(), start <= end);
        }

        #[test]
        fn test_validate_device_length_constraint(name in "[a-zA-Z0-9_-]{1,20}") {
            let result = validate_device(&name, false);
            prop_assert_eq!(result.is_ok(), name.len() <= MAX_DEVICE_NAME);
        }

        #[test]
        fn test_sanitize_comment_no_control_chars(input in "\\PC*") {
            let clean = sanitize_comment(&input);
            prop_assert!(!clean.chars().any(char::is_control));
            prop_assert!(clean.chars().count() <= MAX_COMMENT);
        }
    }
}

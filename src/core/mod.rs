//! Firewall policy object model and rule engine
//!
//! This module holds the in-memory model that the storage backends populate
//! and the rule engine resolves names against:
//!
//! - [`zones`]: zones, networks, hosts, groups and firewall pseudo-zones
//! - [`services`]: protocol/port definitions used as traffic selectors
//! - [`interfaces`]: firewall interfaces and their addresses
//! - [`blocklist`]: addresses and hosts/groups that are always blocked
//! - [`lookup`]: hash indexes over zone addresses and service ports
//! - [`rules`]: rule parser, options language, analyzer and numbered rule list
//! - [`session`]: owns everything above plus the backend handles
//! - [`error`]: error types shared by the whole crate

pub mod blocklist;
pub mod error;
pub mod interfaces;
pub mod lookup;
pub mod rules;
pub mod services;
pub mod session;
pub mod zones;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;

/// Lifecycle tag carried by every stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    /// Not yet compared with the running firewall
    #[default]
    Unknown,
    /// Loaded and unchanged
    Active,
    /// Created during this session
    Added,
    /// Modified during this session
    Changed,
    /// Deleted during this session (kept only while reporting)
    Removed,
}

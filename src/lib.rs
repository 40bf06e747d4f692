//! zonefw - zone-based firewall policy store
//!
//! Keeps a firewall policy (zones, networks, hosts, groups, services,
//! interfaces, rules and a blocklist) in memory, persists it through a
//! pluggable storage engine and validates rules against the objects they name.
//!
//! # Architecture
//!
//! - [`collections`] - Ordered list with stable handles and a chained hash table
//! - [`backend`] - Storage engine protocol, registry, `textdir` and `memory` engines
//! - [`core`] - Object model, rule grammar and analysis, the editing [`Session`]
//! - [`validators`] - Name rules and input sanitization
//! - [`config`] - Configuration persistence
//! - [`utils`] - Utility functions (XDG directories, kernel devices)
//!
//! # Consistency
//!
//! - Every edit is validated, written to the engine, then applied in memory
//! - Objects referenced by rules, groups or the blocklist cannot be deleted
//! - Textdir writes are atomic and rule files carry SHA-256 checksums
//! - Writers hold an exclusive lock on the storage tree

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod backend;
pub mod collections;
pub mod config;
pub mod core;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::session::{LoadReport, Session};

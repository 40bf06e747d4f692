//! Container layer
//!
//! - [`list`]: doubly-linked list with stable, generation-checked node handles
//! - [`hash`]: fixed-row chained hash table built on the list

pub mod hash;
pub mod list;

pub use hash::HashTable;
pub use list::{List, ListError, NodeRef};

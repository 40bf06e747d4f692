//! Chained hash table built on [`List`]
//!
//! The row count is fixed at construction and never resized. Each row is a
//! list without a destructor: tables hold small keys (addresses, ports,
//! handles) pointing into the object store, never the objects themselves.
//!
//! Duplicate detection is left to callers; inserting an item twice stores it twice.

use super::list::{List, NodeRef};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Hash function plugged into a [`HashTable`]
pub type HashFn<T> = fn(&T) -> u32;

/// Equality function plugged into a [`HashTable`]: `(candidate, key)`
pub type CompareFn<T> = fn(&T, &T) -> bool;

pub struct HashTable<T> {
    rows: Vec<List<T>>,
    hash_fn: HashFn<T>,
    compare_fn: CompareFn<T>,
    cells: usize,
}

impl<T: fmt::Debug> fmt::Debug for HashTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("rows", &self.rows.len())
            .field("cells", &self.cells)
            .finish_non_exhaustive()
    }
}

impl<T> HashTable<T> {
    /// Creates a table with `rows` buckets (at least one).
    pub fn new(rows: usize, hash_fn: HashFn<T>, compare_fn: CompareFn<T>) -> Self {
        let rows = rows.max(1);
        Self {
            rows: (0..rows).map(|_| List::new()).collect(),
            hash_fn,
            compare_fn,
            cells: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Net number of items inserted minus items removed
    pub fn cells(&self) -> usize {
        self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells == 0
    }

    fn bucket(&self, item: &T) -> usize {
        (self.hash_fn)(item) as usize % self.rows.len()
    }

    pub fn insert(&mut self, item: T) -> NodeRef {
        let row = self.bucket(&item);
        self.cells += 1;
        self.rows[row].append(item)
    }

    /// First item of its bucket that compares equal to `key`.
    pub fn search(&self, key: &T) -> Option<&T> {
        let row = self.bucket(key);
        self.rows[row]
            .values()
            .find(|candidate| (self.compare_fn)(candidate, key))
    }

    /// Removes and returns the first item comparing equal to `key`.
    pub fn remove(&mut self, key: &T) -> Option<T> {
        let row = self.bucket(key);
        let compare = self.compare_fn;
        let node = self.rows[row].find(|candidate| compare(candidate, key))?;
        let item = self.rows[row].take(node).ok()?;
        self.cells -= 1;
        Some(item)
    }

    /// Length of the longest bucket, a rough measure of distribution quality.
    pub fn max_chain(&self) -> usize {
        self.rows.iter().map(List::len).max().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.rows.iter().flat_map(List::values)
    }
}

/// Hashes any `Hash` value with `FxHasher`, folded to 32 bits.
pub fn fx_hash<H: Hash + ?Sized>(value: &H) -> u32 {
    let mut hasher = rustc_hash::FxHasher::default();
    value.hash(&mut hasher);
    let h = hasher.finish();
    (h ^ (h >> 32)) as u32
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn hash_u16(v: &u16) -> u32 {
        fx_hash(v)
    }

    fn eq_u16(a: &u16, b: &u16) -> bool {
        a == b
    }

    proptest! {
        #[test]
        fn test_cells_track_inserts_minus_removes(
            items in prop::collection::vec(any::<u16>(), 0..128),
            removals in prop::collection::vec(any::<u16>(), 0..64),
            rows in 1usize..64,
        ) {
            let mut table = HashTable::new(rows, hash_u16, eq_u16);
            for item in &items {
                table.insert(*item);
            }
            for item in &items {
                prop_assert_eq!(table.search(item), Some(item));
            }
            let mut expected = items.len();
            for key in &removals {
                if table.remove(key).is_some() {
                    expected -= 1;
                }
            }
            prop_assert_eq!(table.cells(), expected);
            prop_assert_eq!(table.iter().count(), expected);
        }
    }
}

//! Doubly-linked list over a slot arena
//!
//! Nodes live in a `Vec` of slots and link to each other by slot index, so a
//! [`NodeRef`] handed out by an insert stays valid until that node is removed.
//! Every slot carries a generation counter; a handle to a removed node never
//! aliases whatever is stored in the slot afterwards.
//!
//! # Guarantees
//!
//! - `append`, `prepend`, `insert_before`, `insert_after`, `remove` are O(1)
//! - `len()` always equals the number of nodes reachable from `head`
//! - a registered destructor runs exactly once per removed element
//!
//! # Example
//!
//! ```
//! use zonefw::collections::List;
//!
//! let mut list = List::new();
//! let b = list.append("b");
//! list.prepend("a");
//! list.insert_after(Some(b), "c").unwrap();
//!
//! let items: Vec<_> = list.iter().map(|(_, v)| *v).collect();
//! assert_eq!(items, ["a", "b", "c"]);
//! ```

use std::fmt;

/// Errors raised by the container layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    /// Removal attempted on a list without nodes
    #[error("list is empty")]
    Empty,

    /// Handle refers to a node that was removed (or belongs to another list)
    #[error("stale node reference (slot {index}, generation {generation})")]
    StaleHandle { index: u32, generation: u32 },
}

/// Stable handle to a list node
///
/// Cheap to copy; resolving it against the list it came from is O(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    index: u32,
    generation: u32,
}

impl NodeRef {
    /// Slot index, useful as a compact key in diagnostics
    pub const fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Node<T> {
    prev: Option<u32>,
    next: Option<u32>,
    data: T,
}

struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Callback invoked on the data of every removed node
pub type Destructor<T> = Box<dyn FnMut(T)>;

/// Doubly-linked list with stable node handles
pub struct List<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    destructor: Option<Destructor<T>>,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values()).finish()
    }
}

impl<T> List<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            destructor: None,
        }
    }

    /// Creates a list that hands every removed element to `destructor`.
    pub fn with_destructor(destructor: impl FnMut(T) + 'static) -> Self {
        let mut list = Self::new();
        list.destructor = Some(Box::new(destructor));
        list
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<NodeRef> {
        self.head.map(|i| self.handle_at(i))
    }

    pub fn tail(&self) -> Option<NodeRef> {
        self.tail.map(|i| self.handle_at(i))
    }

    /// Returns `true` if `node` resolves to a live node of this list.
    pub fn contains(&self, node: NodeRef) -> bool {
        self.resolve(node).is_ok()
    }

    pub fn get(&self, node: NodeRef) -> Option<&T> {
        let i = self.resolve(node).ok()?;
        self.node(i).map(|n| &n.data)
    }

    pub fn get_mut(&mut self, node: NodeRef) -> Option<&mut T> {
        let i = self.resolve(node).ok()?;
        self.node_mut(i).map(|n| &mut n.data)
    }

    pub fn next(&self, node: NodeRef) -> Option<NodeRef> {
        let i = self.resolve(node).ok()?;
        self.node(i)?.next.map(|n| self.handle_at(n))
    }

    pub fn prev(&self, node: NodeRef) -> Option<NodeRef> {
        let i = self.resolve(node).ok()?;
        self.node(i)?.prev.map(|p| self.handle_at(p))
    }

    pub fn append(&mut self, data: T) -> NodeRef {
        let i = self.alloc(data);
        self.link_after(self.tail, i);
        self.handle_at(i)
    }

    pub fn prepend(&mut self, data: T) -> NodeRef {
        let i = self.alloc(data);
        self.link_before(self.head, i);
        self.handle_at(i)
    }

    /// Inserts `data` directly before `at`; `None` prepends.
    pub fn insert_before(&mut self, at: Option<NodeRef>, data: T) -> Result<NodeRef, ListError> {
        match at {
            None => Ok(self.prepend(data)),
            Some(at) => {
                let at = self.resolve(at)?;
                let i = self.alloc(data);
                self.link_before(Some(at), i);
                Ok(self.handle_at(i))
            }
        }
    }

    /// Inserts `data` directly after `at`; `None` appends.
    pub fn insert_after(&mut self, at: Option<NodeRef>, data: T) -> Result<NodeRef, ListError> {
        match at {
            None => Ok(self.append(data)),
            Some(at) => {
                let at = self.resolve(at)?;
                let i = self.alloc(data);
                self.link_after(Some(at), i);
                Ok(self.handle_at(i))
            }
        }
    }

    /// Removes `node`, handing its data to the destructor if one is registered.
    pub fn remove(&mut self, node: NodeRef) -> Result<(), ListError> {
        let data = self.take(node)?;
        match self.destructor.as_mut() {
            Some(destructor) => destructor(data),
            None => drop(data),
        }
        Ok(())
    }

    /// Removes `node` and returns its data without running the destructor.
    pub fn take(&mut self, node: NodeRef) -> Result<T, ListError> {
        if self.len == 0 {
            return Err(ListError::Empty);
        }
        let i = self.resolve(node)?;
        self.unlink(i);
        let slot = &mut self.slots[i as usize];
        let taken = slot.node.take().ok_or(ListError::StaleHandle {
            index: node.index,
            generation: node.generation,
        })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(i);
        self.len -= 1;
        Ok(taken.data)
    }

    /// Relinks `node` directly before `before` (`None` moves it to the tail).
    ///
    /// The handle stays valid; only its position changes.
    pub fn move_before(&mut self, node: NodeRef, before: Option<NodeRef>) -> Result<(), ListError> {
        let i = self.resolve(node)?;
        let target = before.map(|b| self.resolve(b)).transpose()?;
        if target == Some(i) {
            return Ok(());
        }
        self.unlink(i);
        match target {
            Some(t) => self.link_before(Some(t), i),
            None => self.link_after(self.tail, i),
        }
        Ok(())
    }

    /// Stable sort by relinking nodes; every handle survives.
    pub fn sort_by(&mut self, mut compare: impl FnMut(&T, &T) -> std::cmp::Ordering) {
        let mut order = self.raw_order();
        order.sort_by(|a, b| {
            let (Some(x), Some(y)) = (self.node(*a), self.node(*b)) else {
                return std::cmp::Ordering::Equal;
            };
            compare(&x.data, &y.data)
        });
        self.head = None;
        self.tail = None;
        for i in order {
            self.link_after(self.tail, i);
        }
    }

    /// Removes every node, running the destructor for each element.
    pub fn clear(&mut self) {
        while let Some(head) = self.head() {
            // head always resolves
            let _ = self.remove(head);
        }
    }

    /// Iterates `(handle, &data)` pairs from head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Iterates the data from head to tail.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Mutable iteration in list order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        let order = self.raw_order();
        let mut by_slot: Vec<Option<&mut T>> = self
            .slots
            .iter_mut()
            .map(|s| s.node.as_mut().map(|n| &mut n.data))
            .collect();
        order
            .into_iter()
            .filter_map(move |i| by_slot.get_mut(i as usize).and_then(Option::take))
    }

    /// Handles in list order, detached from the borrow of the list.
    pub fn handles(&self) -> Vec<NodeRef> {
        self.iter().map(|(h, _)| h).collect()
    }

    /// First handle whose data satisfies `pred`.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<NodeRef> {
        self.iter().find(|(_, v)| pred(v)).map(|(h, _)| h)
    }

    /// 1-based position of `node`, counted from the head.
    pub fn position(&self, node: NodeRef) -> Option<usize> {
        self.iter().position(|(h, _)| h == node).map(|p| p + 1)
    }

    fn raw_order(&self) -> Vec<u32> {
        let mut order = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(i) = cursor {
            order.push(i);
            cursor = self.node(i).and_then(|n| n.next);
        }
        order
    }

    fn node(&self, i: u32) -> Option<&Node<T>> {
        self.slots.get(i as usize).and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, i: u32) -> Option<&mut Node<T>> {
        self.slots.get_mut(i as usize).and_then(|s| s.node.as_mut())
    }

    fn handle_at(&self, i: u32) -> NodeRef {
        NodeRef {
            index: i,
            generation: self.slots[i as usize].generation,
        }
    }

    fn resolve(&self, node: NodeRef) -> Result<u32, ListError> {
        match self.slots.get(node.index as usize) {
            Some(slot) if slot.generation == node.generation && slot.node.is_some() => {
                Ok(node.index)
            }
            _ => Err(ListError::StaleHandle {
                index: node.index,
                generation: node.generation,
            }),
        }
    }

    fn alloc(&mut self, data: T) -> u32 {
        let node = Node {
            prev: None,
            next: None,
            data,
        };
        self.len += 1;
        if let Some(i) = self.free.pop() {
            self.slots[i as usize].node = Some(node);
            i
        } else {
            let i = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            i
        }
    }

    /// Links the detached node `i` after `at` (`None` = list is empty or link at head).
    fn link_after(&mut self, at: Option<u32>, i: u32) {
        let Some(at) = at else {
            self.link_before(self.head, i);
            return;
        };
        let next = self.node(at).and_then(|n| n.next);
        if let Some(n) = self.node_mut(i) {
            n.prev = Some(at);
            n.next = next;
        }
        if let Some(a) = self.node_mut(at) {
            a.next = Some(i);
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = Some(i);
                }
            }
            None => self.tail = Some(i),
        }
    }

    /// Links the detached node `i` before `at` (`None` = empty list).
    fn link_before(&mut self, at: Option<u32>, i: u32) {
        let Some(at) = at else {
            if let Some(n) = self.node_mut(i) {
                n.prev = None;
                n.next = None;
            }
            self.head = Some(i);
            self.tail = Some(i);
            return;
        };
        let prev = self.node(at).and_then(|n| n.prev);
        if let Some(n) = self.node_mut(i) {
            n.prev = prev;
            n.next = Some(at);
        }
        if let Some(a) = self.node_mut(at) {
            a.prev = Some(i);
        }
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = Some(i);
                }
            }
            None => self.head = Some(i),
        }
    }

    fn unlink(&mut self, i: u32) {
        let (prev, next) = match self.node(i) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(i) {
            n.prev = None;
            n.next = None;
        }
    }
}

impl<T> Drop for List<T> {
    fn drop(&mut self) {
        if self.destructor.is_some() {
            self.clear();
        }
    }
}

/// Iterator over `(handle, &data)` pairs
pub struct Iter<'a, T> {
    list: &'a List<T>,
    cursor: Option<u32>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeRef, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.cursor?;
        let node = self.list.node(i)?;
        self.cursor = node.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((self.list.handle_at(i), &node.data))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = (NodeRef, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> FromIterator<T> for List<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = List::new();
        for item in iter {
            list.append(item);
        }
        list
    }
}

impl<T> Extend<T> for List<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.append(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collect(list: &List<i32>) -> Vec<i32> {
        list.values().copied().collect()
    }

    #[test]
    fn test_append_prepend_order() {
        let mut list = List::new();
        list.append(2);
        list.append(3);
        list.prepend(1);
        assert_eq!(collect(&list), [1, 2, 3]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_insert_with_none_degenerates() {
        let mut list = List::new();
        list.append(2);
        list.insert_before(None, 1).unwrap();
        list.insert_after(None, 3).unwrap();
        assert_eq!(collect(&list), [1, 2, 3]);
    }

    #[test]
    fn test_insert_before_and_after_middle() {
        let mut list = List::new();
        let a = list.append(1);
        let c = list.append(4);
        list.insert_after(Some(a), 2).unwrap();
        list.insert_before(Some(c), 3).unwrap();
        assert_eq!(collect(&list), [1, 2, 3, 4]);
    }

    #[test]
    fn test_head_tail_links() {
        let mut list = List::new();
        let a = list.append(1);
        let b = list.append(2);
        assert_eq!(list.head(), Some(a));
        assert_eq!(list.tail(), Some(b));
        assert_eq!(list.prev(a), None);
        assert_eq!(list.next(b), None);
        assert_eq!(list.next(a), Some(b));
        assert_eq!(list.prev(b), Some(a));
    }

    #[test]
    fn test_remove_on_empty_list_fails() {
        let mut list: List<i32> = List::new();
        let h = list.append(1);
        list.remove(h).unwrap();
        assert_eq!(list.remove(h), Err(ListError::Empty));
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut list = List::new();
        let a = list.append(1);
        list.append(2);
        list.remove(a).unwrap();
        // slot gets reused; the old handle must not alias it
        let c = list.append(3);
        assert_eq!(c.index(), a.index());
        assert!(matches!(list.remove(a), Err(ListError::StaleHandle { .. })));
        assert_eq!(list.get(a), None);
        assert_eq!(list.get(c), Some(&3));
    }

    #[test]
    fn test_destructor_runs_once_per_removal() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut list = List::with_destructor(move |v: i32| sink.borrow_mut().push(v));
        let a = list.append(1);
        list.append(2);
        list.remove(a).unwrap();
        assert_eq!(*seen.borrow(), [1]);
        drop(list);
        assert_eq!(*seen.borrow(), [1, 2]);
    }

    #[test]
    fn test_take_skips_destructor() {
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let mut list = List::with_destructor(move |_: i32| *sink.borrow_mut() += 1);
        let a = list.append(7);
        assert_eq!(list.take(a), Ok(7));
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_move_before_keeps_handle() {
        let mut list = List::new();
        let a = list.append(1);
        let b = list.append(2);
        let c = list.append(3);
        list.move_before(c, Some(a)).unwrap();
        assert_eq!(collect(&list), [3, 1, 2]);
        list.move_before(c, None).unwrap();
        assert_eq!(collect(&list), [1, 2, 3]);
        assert_eq!(list.get(b), Some(&2));
        assert_eq!(list.tail(), Some(c));
    }

    #[test]
    fn test_sort_by_is_stable_and_keeps_handles() {
        let mut list = List::new();
        let h: Vec<_> = [(2, 'a'), (1, 'b'), (2, 'c'), (0, 'd')]
            .into_iter()
            .map(|v| list.append(v))
            .collect();
        list.sort_by(|x, y| x.0.cmp(&y.0));
        let order: Vec<char> = list.values().map(|v| v.1).collect();
        assert_eq!(order, ['d', 'b', 'a', 'c']);
        assert_eq!(list.get(h[2]), Some(&(2, 'c')));
    }

    #[test]
    fn test_values_mut_in_order() {
        let mut list: List<i32> = (1..=4).collect();
        let first = list.head().unwrap();
        list.move_before(first, None).unwrap();
        for (n, v) in list.values_mut().enumerate() {
            *v = i32::try_from(n).unwrap() * 10;
        }
        assert_eq!(collect(&list), [0, 10, 20, 30]);
    }

    #[test]
    fn test_position_is_one_based() {
        let mut list = List::new();
        list.append('x');
        let y = list.append('y');
        assert_eq!(list.position(y), Some(2));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, Clone)]
    enum Op {
        Append(u8),
        Prepend(u8),
        InsertBefore(usize, u8),
        InsertAfter(usize, u8),
        Remove(usize),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Append),
            any::<u8>().prop_map(Op::Prepend),
            (any::<usize>(), any::<u8>()).prop_map(|(i, v)| Op::InsertBefore(i, v)),
            (any::<usize>(), any::<u8>()).prop_map(|(i, v)| Op::InsertAfter(i, v)),
            any::<usize>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn test_len_matches_reachable_nodes(ops in prop::collection::vec(arb_op(), 0..64)) {
            let drops = Rc::new(Cell::new(0usize));
            let sink = Rc::clone(&drops);
            let mut list = List::with_destructor(move |_: u8| sink.set(sink.get() + 1));
            let mut model: Vec<u8> = Vec::new();
            let mut removed = 0usize;

            for op in ops {
                let handles = list.handles();
                match op {
                    Op::Append(v) => { list.append(v); model.push(v); }
                    Op::Prepend(v) => { list.prepend(v); model.insert(0, v); }
                    Op::InsertBefore(i, v) if !handles.is_empty() => {
                        let at = i % handles.len();
                        list.insert_before(Some(handles[at]), v).unwrap();
                        model.insert(at, v);
                    }
                    Op::InsertAfter(i, v) if !handles.is_empty() => {
                        let at = i % handles.len();
                        list.insert_after(Some(handles[at]), v).unwrap();
                        model.insert(at + 1, v);
                    }
                    Op::Remove(i) if !handles.is_empty() => {
                        let at = i % handles.len();
                        list.remove(handles[at]).unwrap();
                        model.remove(at);
                        removed += 1;
                    }
                    _ => {}
                }
                prop_assert_eq!(list.len(), list.iter().count());
                prop_assert_eq!(list.values().copied().collect::<Vec<_>>(), model.clone());
            }
            prop_assert_eq!(drops.get(), removed);

            for h in list.handles().into_iter().rev() {
                list.remove(h).unwrap();
            }
            prop_assert!(list.head().is_none());
            prop_assert!(list.tail().is_none());
            prop_assert_eq!(list.len(), 0);
        }
    }
}

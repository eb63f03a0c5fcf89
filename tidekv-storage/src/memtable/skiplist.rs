//! # Concurrent Skip List
//!
//! Ordered map from byte keys to byte values with many concurrent readers
//! and writers. Nodes are shared through `Arc` and only ever linked forward,
//! so a reader holding a node can always keep walking right.
//!
//! ```text
//! level 2: head ─────────────────────────> [m] ──────────────> ∅
//! level 1: head ──────> [c] ─────────────> [m] ──────> [t] ──> ∅
//! level 0: head ─> [a] ─> [c] ─> [f] ─> [h] ─> [m] ─> [p] ─> [t] ─> ∅
//! ```
//!
//! ## Locking
//!
//! - Each node guards its forward links with its own `RwLock`; a reader holds
//!   it only long enough to clone one pointer.
//! - Inserts splice bottom-up. At each level the predecessor's links are
//!   write-locked, the writer moves right while the successor's key is
//!   smaller, then splices. Locks are always taken left to right.
//! - A new node becomes visible at level 0 first, so it is reachable as soon
//!   as any reader can find it through a higher level.
//! - Removal takes `delete_gate` exclusively. Every other operation holds it
//!   shared, so no reader or iterator ever observes a half-unlinked node.
//!
//! Tower heights are geometric with p = 1/4 and no upper bound.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard};

use tidekv_core::RandomSource;

type Link = Option<Arc<Node>>;

struct Node {
    key: Bytes,
    value: RwLock<Bytes>,
    next: RwLock<Vec<Link>>,
}

impl Node {
    fn new(key: Bytes, value: Bytes, height: usize) -> Self {
        Self {
            key,
            value: RwLock::new(value),
            next: RwLock::new(vec![None; height]),
        }
    }

    fn head() -> Self {
        Self::new(Bytes::new(), Bytes::new(), 1)
    }

    #[inline]
    fn next_at(&self, level: usize) -> Link {
        self.next.read().get(level).cloned().flatten()
    }
}

pub struct SkipList {
    head: Arc<Node>,
    delete_gate: RwLock<()>,
    len: AtomicUsize,
    binary_size: AtomicUsize,
    rng: RandomSource,
}

impl SkipList {
    pub fn new(rng: RandomSource) -> Self {
        Self {
            head: Arc::new(Node::head()),
            delete_gate: RwLock::new(()),
            len: AtomicUsize::new(0),
            binary_size: AtomicUsize::new(0),
            rng,
        }
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of key and value lengths over all entries
    pub fn binary_size(&self) -> usize {
        self.binary_size.load(Ordering::Acquire)
    }

    /// Current number of levels, including the bottom one
    pub fn height(&self) -> usize {
        self.head.next.read().len()
    }

    fn random_height(&self) -> usize {
        let mut height = 1;
        while self.rng.next_u32() & 3 == 0 {
            height += 1;
        }
        height
    }

    /// Node holding `key`, if linked
    fn find(&self, key: &[u8]) -> Link {
        let mut current = Arc::clone(&self.head);
        for level in (0..self.height()).rev() {
            loop {
                match current.next_at(level) {
                    Some(next) if next.key.as_ref() < key => current = next,
                    Some(next) if next.key.as_ref() == key => return Some(next),
                    _ => break,
                }
            }
        }
        None
    }

    /// Rightmost node with key < `key` on each of the bottom `height` levels
    fn predecessors(&self, key: &[u8], height: usize) -> Vec<Arc<Node>> {
        let mut preds = vec![Arc::clone(&self.head); height];
        let mut current = Arc::clone(&self.head);
        for level in (0..self.height()).rev() {
            loop {
                match current.next_at(level) {
                    Some(next) if next.key.as_ref() < key => current = next,
                    _ => break,
                }
            }
            if level < height {
                preds[level] = Arc::clone(&current);
            }
        }
        preds
    }

    fn replace_value(&self, node: &Node, value: Bytes) {
        let new_len = value.len();
        let old_len = {
            let mut slot = node.value.write();
            std::mem::replace(&mut *slot, value).len()
        };
        // Add before subtracting so a concurrent reader never sees a wrapped size
        self.binary_size.fetch_add(new_len, Ordering::AcqRel);
        self.binary_size.fetch_sub(old_len, Ordering::AcqRel);
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let _gate = self.delete_gate.read_recursive();
        self.find(key).map(|node| node.value.read().clone())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        let _gate = self.delete_gate.read_recursive();
        self.find(key).is_some()
    }

    /// Insert or overwrite. Returns `true` when the key was new.
    pub fn put(&self, key: Bytes, value: Bytes) -> bool {
        let _gate = self.delete_gate.read_recursive();

        if let Some(node) = self.find(&key) {
            self.replace_value(&node, value);
            return false;
        }

        let height = self.random_height();
        {
            let mut links = self.head.next.write();
            if links.len() < height {
                links.resize(height, None);
            }
        }

        let entry_size = key.len() + value.len();
        let node = Arc::new(Node::new(key, value.clone(), height));
        let preds = self.predecessors(&node.key, height);

        for (level, pred) in preds.into_iter().enumerate() {
            let mut pred = pred;
            loop {
                let mut links = pred.next.write();
                match links[level].clone() {
                    Some(next) if next.key < node.key => {
                        // Someone spliced in between since the search
                        drop(links);
                        pred = next;
                    }
                    Some(next) if level == 0 && next.key == node.key => {
                        // Lost the race to insert the same key
                        drop(links);
                        self.replace_value(&next, value);
                        return false;
                    }
                    successor => {
                        node.next.write()[level] = successor;
                        links[level] = Some(Arc::clone(&node));
                        break;
                    }
                }
            }
        }

        self.len.fetch_add(1, Ordering::AcqRel);
        self.binary_size.fetch_add(entry_size, Ordering::AcqRel);
        true
    }

    /// Unlink `key` from every level. Returns `false` if it was absent.
    pub fn delete(&self, key: &[u8]) -> bool {
        let _gate = self.delete_gate.write();

        let mut removed: Link = None;
        let mut current = Arc::clone(&self.head);
        for level in (0..self.height()).rev() {
            loop {
                match current.next_at(level) {
                    Some(next) if next.key.as_ref() < key => current = next,
                    _ => break,
                }
            }
            let mut links = current.next.write();
            if let Some(next) = links[level].clone() {
                if next.key.as_ref() == key {
                    links[level] = next.next_at(level);
                    removed = Some(next);
                }
            }
        }

        let node = match removed {
            Some(node) => node,
            None => return false,
        };
        let entry_size = node.key.len() + node.value.read().len();
        node.next.write().clear();

        self.len.fetch_sub(1, Ordering::AcqRel);
        self.binary_size.fetch_sub(entry_size, Ordering::AcqRel);

        let mut links = self.head.next.write();
        while links.len() > 1 && matches!(links.last(), Some(None)) {
            links.pop();
        }
        true
    }

    /// Ascending iteration. Removals block until the iterator is dropped.
    pub fn iter(&self) -> Iter<'_> {
        let gate = self.delete_gate.read_recursive();
        let next = self.head.next_at(0);
        Iter { _gate: gate, next }
    }

    /// Verify ordering on every level and that each level is a subsequence
    /// of the one below it
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> bool {
        let _gate = self.delete_gate.read_recursive();
        let mut below: Option<Vec<Bytes>> = None;
        for level in 0..self.height() {
            let mut keys = Vec::new();
            let mut cursor = self.head.next_at(level);
            while let Some(node) = cursor {
                keys.push(node.key.clone());
                cursor = node.next_at(level);
            }
            if keys.windows(2).any(|w| w[0] >= w[1]) {
                return false;
            }
            if let Some(below) = &below {
                if keys.iter().any(|k| below.binary_search(k).is_err()) {
                    return false;
                }
            }
            below = Some(keys);
        }
        true
    }
}

impl Drop for SkipList {
    fn drop(&mut self) {
        // Unlink iteratively; dropping a long chain of Arcs would recurse
        let links = std::mem::take(&mut *self.head.next.write());
        let mut current = links.into_iter().next().flatten();
        while let Some(node) = current {
            let links = std::mem::take(&mut *node.next.write());
            current = links.into_iter().next().flatten();
        }
    }
}

/// Iterator over a [`SkipList`] in key order
pub struct Iter<'a> {
    _gate: RwLockReadGuard<'a, ()>,
    next: Link,
}

impl Iterator for Iter<'_> {
    type Item = (Bytes, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        self.next = node.next_at(0);
        let value = node.value.read().clone();
        Some((node.key.clone(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> SkipList {
        SkipList::new(RandomSource::from_seed(42))
    }

    #[test]
    fn test_put_get_overwrite() {
        let list = list();
        assert!(list.put(Bytes::from("b"), Bytes::from("2")));
        assert!(list.put(Bytes::from("a"), Bytes::from("1")));
        assert!(!list.put(Bytes::from("a"), Bytes::from("111")));

        assert_eq!(list.get(b"a"), Some(Bytes::from("111")));
        assert_eq!(list.get(b"b"), Some(Bytes::from("2")));
        assert_eq!(list.get(b"c"), None);
        assert!(list.contains_key(b"a"));
        assert!(!list.contains_key(b"c"));
        assert_eq!(list.len(), 2);
        // a + 111 + b + 2
        assert_eq!(list.binary_size(), 6);
    }

    #[test]
    fn test_delete_updates_counters_and_height() {
        let list = list();
        for i in 0..1000u32 {
            list.put(Bytes::from(i.to_be_bytes().to_vec()), Bytes::from("v"));
        }
        let tall = list.height();
        assert!(tall > 1);

        assert!(list.delete(&7u32.to_be_bytes()));
        assert!(!list.delete(&7u32.to_be_bytes()));
        assert_eq!(list.len(), 999);
        assert_eq!(list.binary_size(), 999 * 5);
        assert_eq!(list.get(&7u32.to_be_bytes()), None);
        assert!(!list.contains_key(&7u32.to_be_bytes()));
        assert!(list.contains_key(&8u32.to_be_bytes()));
        assert!(list.check_invariants());

        for i in 0..1000u32 {
            list.delete(&i.to_be_bytes());
        }
        assert!(list.is_empty());
        assert_eq!(list.binary_size(), 0);
        assert_eq!(list.height(), 1);
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn test_iter_sorted() {
        let list = list();
        for key in ["delta", "alpha", "echo", "charlie", "bravo"] {
            list.put(Bytes::from(key), Bytes::from(key.to_uppercase()));
        }
        let keys: Vec<Bytes> = list.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["alpha", "bravo", "charlie", "delta", "echo"]);
        assert!(list.check_invariants());
    }

    #[test]
    fn test_get_while_iterating() {
        let list = list();
        list.put(Bytes::from("k"), Bytes::from("v"));
        let mut iter = list.iter();
        assert_eq!(list.get(b"k"), Some(Bytes::from("v")));
        assert!(iter.next().is_some());
    }

    #[test]
    fn test_drop_long_list() {
        let list = list();
        for i in 0..200_000u32 {
            list.put(Bytes::from(i.to_be_bytes().to_vec()), Bytes::new());
        }
        drop(list);
    }
}

use std::{cmp::Ordering, mem, sync::Arc};

use crate::{
    rbt::{Node, NodeId},
    Error, Result,
};

/// Injected ordering for tree keys. When absent the natural [Ord]
/// ordering of the key type applies.
pub type Cmp<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

enum Slot<K, P> {
    Used(Node<K, P>),
    Free(Option<NodeId>),
}

/// Ordered map implemented as a red-black tree over an arena of slots.
///
/// At most one node per key value. Freed slots are recycled through an
/// embedded free-list.
pub struct Tree<K, P> {
    slots: Vec<Slot<K, P>>,
    free: Option<NodeId>,
    root: Option<NodeId>,
    n_count: usize,
    cmp: Option<Cmp<K>>,
}

impl<K, P> Tree<K, P> {
    pub fn new() -> Tree<K, P> {
        Tree {
            slots: Vec::new(),
            free: None,
            root: None,
            n_count: 0,
            cmp: None,
        }
    }

    /// Create a tree ordered by `cmp` instead of the key's natural
    /// ordering.
    pub fn with_cmp(cmp: Cmp<K>) -> Tree<K, P> {
        let mut tree = Tree::new();
        tree.cmp = Some(cmp);
        tree
    }

    /// Return number of entries in this tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.n_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_count == 0
    }

    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Drop all entries and recycle the arena.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free = None;
        self.root = None;
        self.n_count = 0;
    }

    pub fn node(&self, id: NodeId) -> &Node<K, P> {
        match &self.slots[id.index()] {
            Slot::Used(node) => node,
            Slot::Free(_) => panic!("free slot accessed as node, call the programmer"),
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node<K, P> {
        match &mut self.slots[id.index()] {
            Slot::Used(node) => node,
            Slot::Free(_) => panic!("free slot accessed as node, call the programmer"),
        }
    }

    #[inline]
    fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    #[inline]
    fn left_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    #[inline]
    fn right_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    #[inline]
    fn is_red(&self, id: Option<NodeId>) -> bool {
        match id {
            Some(id) => !self.node(id).is_black(),
            None => false,
        }
    }

    fn acquire(&mut self, node: Node<K, P>) -> NodeId {
        match self.free {
            Some(id) => {
                let next = match &self.slots[id.index()] {
                    Slot::Free(next) => *next,
                    Slot::Used(_) => {
                        panic!("used slot in free-list, call the programmer")
                    }
                };
                self.free = next;
                self.slots[id.index()] = Slot::Used(node);
                id
            }
            None => {
                let id = NodeId::from_index(self.slots.len());
                self.slots.push(Slot::Used(node));
                id
            }
        }
    }

    fn release(&mut self, id: NodeId) -> (K, P) {
        let slot = mem::replace(&mut self.slots[id.index()], Slot::Free(self.free));
        self.free = Some(id);
        match slot {
            Slot::Used(node) => (node.key, node.payload),
            Slot::Free(_) => panic!("double free of tree slot, call the programmer"),
        }
    }
}

impl<K, P> Tree<K, P>
where
    K: Ord,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        match &self.cmp {
            Some(cmp) => cmp(a, b),
            None => a.cmp(b),
        }
    }

    pub fn find(&self, key: &K) -> Option<NodeId> {
        let mut cur = self.root;
        while let Some(id) = cur {
            cur = match self.compare(key, self.node(id).as_key()) {
                Ordering::Less => self.left_of(id),
                Ordering::Greater => self.right_of(id),
                Ordering::Equal => return Some(id),
            };
        }
        None
    }

    /// Insert `key` into the tree. When an entry with an equal key is
    /// already present, return its handle with `false` and leave its
    /// payload untouched.
    pub fn insert(&mut self, key: K, payload: P) -> (NodeId, bool) {
        let mut parent: Option<NodeId> = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(id) = cur {
            match self.compare(&key, self.node(id).as_key()) {
                Ordering::Equal => return (id, false),
                Ordering::Less => {
                    parent = Some(id);
                    go_left = true;
                    cur = self.left_of(id);
                }
                Ordering::Greater => {
                    parent = Some(id);
                    go_left = false;
                    cur = self.right_of(id);
                }
            }
        }

        let id = self.acquire(Node::new(key, payload));
        self.node_mut(id).parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(p) if go_left => self.node_mut(p).left = Some(id),
            Some(p) => self.node_mut(p).right = Some(id),
        }
        self.n_count += 1;
        self.fix_insert(id);
        (id, true)
    }

    /// Remove node `z` from the tree and return its key and payload.
    ///
    /// When `z` has two children its in-order successor is relinked
    /// into the vacated position, keeping the successor's handle
    /// valid. The handle `z` itself is recycled.
    pub fn delete(&mut self, z: NodeId) -> (K, P) {
        let z_left = self.left_of(z);
        let z_right = self.right_of(z);

        let mut removed_black = self.node(z).is_black();
        let x: Option<NodeId>;
        let x_parent: Option<NodeId>;

        match (z_left, z_right) {
            (None, _) => {
                x = z_right;
                x_parent = self.parent_of(z);
                self.transplant(z, z_right);
            }
            (_, None) => {
                x = z_left;
                x_parent = self.parent_of(z);
                self.transplant(z, z_left);
            }
            (Some(_), Some(zr)) => {
                let y = self.min_from(zr);
                removed_black = self.node(y).is_black();
                x = self.right_of(y);
                if self.parent_of(y) == Some(z) {
                    x_parent = Some(y);
                } else {
                    x_parent = self.parent_of(y);
                    let yr = self.right_of(y);
                    self.transplant(y, yr);
                    let zr = self.right_of(z);
                    self.node_mut(y).right = zr;
                    if let Some(r) = zr {
                        self.node_mut(r).parent = Some(y);
                    }
                }
                self.transplant(z, Some(y));
                let zl = self.left_of(z);
                self.node_mut(y).left = zl;
                if let Some(l) = zl {
                    self.node_mut(l).parent = Some(y);
                }
                let z_black = self.node(z).is_black();
                self.node_mut(y).black = z_black;
            }
        }

        if removed_black {
            self.fix_delete(x, x_parent);
        }
        self.n_count -= 1;
        self.release(z)
    }

    pub fn first(&self) -> Option<NodeId> {
        self.root.map(|id| self.min_from(id))
    }

    pub fn last(&self) -> Option<NodeId> {
        self.root.map(|id| self.max_from(id))
    }

    /// In-order successor of `id`.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        if let Some(r) = self.right_of(id) {
            return Some(self.min_from(r));
        }
        let mut cur = id;
        let mut parent = self.parent_of(cur);
        while let Some(p) = parent {
            if self.left_of(p) == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.parent_of(cur);
        }
        None
    }

    /// In-order predecessor of `id`.
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        if let Some(l) = self.left_of(id) {
            return Some(self.max_from(l));
        }
        let mut cur = id;
        let mut parent = self.parent_of(cur);
        while let Some(p) = parent {
            if self.right_of(p) == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.parent_of(cur);
        }
        None
    }

    /// In-order iteration over the full tree.
    pub fn iter(&self) -> Iter<K, P> {
        Iter {
            tree: self,
            cursor: self.first(),
        }
    }

    /// Bounded in-order iteration. Yields nodes whose key is within
    /// `min ..= max` honouring the inclusive flags on either end. An
    /// absent bound is unbounded on that side.
    pub fn enumerate(
        &self,
        min: Option<&K>,
        min_incl: bool,
        max: Option<&K>,
        max_incl: bool,
    ) -> Range<K, P>
    where
        K: Clone,
    {
        let cursor = match min {
            None => self.first(),
            Some(key) => self.lower_bound(key, min_incl),
        };
        Range {
            tree: self,
            cursor,
            max: max.cloned(),
            max_incl,
        }
    }

    // first node with key >= bound (inclusive) or key > bound.
    fn lower_bound(&self, key: &K, inclusive: bool) -> Option<NodeId> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            let ok = match self.compare(self.node(id).as_key(), key) {
                Ordering::Greater => true,
                Ordering::Equal => inclusive,
                Ordering::Less => false,
            };
            cur = if ok {
                best = Some(id);
                self.left_of(id)
            } else {
                self.right_of(id)
            };
        }
        best
    }

    fn min_from(&self, mut id: NodeId) -> NodeId {
        while let Some(l) = self.left_of(id) {
            id = l;
        }
        id
    }

    fn max_from(&self, mut id: NodeId) -> NodeId {
        while let Some(r) = self.right_of(id) {
            id = r;
        }
        id
    }

    fn transplant(&mut self, u: NodeId, v: Option<NodeId>) {
        let up = self.parent_of(u);
        match up {
            None => self.root = v,
            Some(p) => {
                if self.left_of(p) == Some(u) {
                    self.node_mut(p).left = v;
                } else {
                    self.node_mut(p).right = v;
                }
            }
        }
        if let Some(v) = v {
            self.node_mut(v).parent = up;
        }
    }

    fn rotate_left(&mut self, x: NodeId) {
        let y = match self.right_of(x) {
            Some(y) => y,
            None => return,
        };
        let y_left = self.left_of(y);
        self.node_mut(x).right = y_left;
        if let Some(yl) = y_left {
            self.node_mut(yl).parent = Some(x);
        }
        let xp = self.parent_of(x);
        self.node_mut(y).parent = xp;
        match xp {
            None => self.root = Some(y),
            Some(p) => {
                if self.left_of(p) == Some(x) {
                    self.node_mut(p).left = Some(y);
                } else {
                    self.node_mut(p).right = Some(y);
                }
            }
        }
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn rotate_right(&mut self, x: NodeId) {
        let y = match self.left_of(x) {
            Some(y) => y,
            None => return,
        };
        let y_right = self.right_of(y);
        self.node_mut(x).left = y_right;
        if let Some(yr) = y_right {
            self.node_mut(yr).parent = Some(x);
        }
        let xp = self.parent_of(x);
        self.node_mut(y).parent = xp;
        match xp {
            None => self.root = Some(y),
            Some(p) => {
                if self.left_of(p) == Some(x) {
                    self.node_mut(p).left = Some(y);
                } else {
                    self.node_mut(p).right = Some(y);
                }
            }
        }
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn fix_insert(&mut self, mut z: NodeId) {
        loop {
            let p = match self.parent_of(z) {
                Some(p) if self.is_red(Some(p)) => p,
                _ => break,
            };
            let g = match self.parent_of(p) {
                Some(g) => g,
                None => break,
            };
            let p_on_left = self.left_of(g) == Some(p);
            let uncle = if p_on_left {
                self.right_of(g)
            } else {
                self.left_of(g)
            };

            if self.is_red(uncle) {
                if let Some(u) = uncle {
                    self.node_mut(u).set_black();
                }
                self.node_mut(p).set_black();
                self.node_mut(g).set_red();
                z = g;
                continue;
            }

            if p_on_left {
                let pivot = if self.right_of(p) == Some(z) {
                    self.rotate_left(p);
                    z
                } else {
                    p
                };
                self.node_mut(pivot).set_black();
                self.node_mut(g).set_red();
                self.rotate_right(g);
            } else {
                let pivot = if self.left_of(p) == Some(z) {
                    self.rotate_right(p);
                    z
                } else {
                    p
                };
                self.node_mut(pivot).set_black();
                self.node_mut(g).set_red();
                self.rotate_left(g);
            }
            break;
        }

        if let Some(r) = self.root {
            self.node_mut(r).set_black();
        }
    }

    fn fix_delete(&mut self, mut x: Option<NodeId>, mut parent: Option<NodeId>) {
        while x != self.root && !self.is_red(x) {
            let p = match parent {
                Some(p) => p,
                None => break,
            };
            if self.left_of(p) == x {
                let mut w = match self.right_of(p) {
                    Some(w) => w,
                    None => break,
                };
                if self.is_red(Some(w)) {
                    self.node_mut(w).set_black();
                    self.node_mut(p).set_red();
                    self.rotate_left(p);
                    w = match self.right_of(p) {
                        Some(w) => w,
                        None => break,
                    };
                }
                if !self.is_red(self.left_of(w)) && !self.is_red(self.right_of(w)) {
                    self.node_mut(w).set_red();
                    x = Some(p);
                    parent = self.parent_of(p);
                } else {
                    if !self.is_red(self.right_of(w)) {
                        if let Some(wl) = self.left_of(w) {
                            self.node_mut(wl).set_black();
                        }
                        self.node_mut(w).set_red();
                        self.rotate_right(w);
                        w = match self.right_of(p) {
                            Some(w) => w,
                            None => break,
                        };
                    }
                    let p_black = self.node(p).is_black();
                    self.node_mut(w).black = p_black;
                    self.node_mut(p).set_black();
                    if let Some(wr) = self.right_of(w) {
                        self.node_mut(wr).set_black();
                    }
                    self.rotate_left(p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let mut w = match self.left_of(p) {
                    Some(w) => w,
                    None => break,
                };
                if self.is_red(Some(w)) {
                    self.node_mut(w).set_black();
                    self.node_mut(p).set_red();
                    self.rotate_right(p);
                    w = match self.left_of(p) {
                        Some(w) => w,
                        None => break,
                    };
                }
                if !self.is_red(self.left_of(w)) && !self.is_red(self.right_of(w)) {
                    self.node_mut(w).set_red();
                    x = Some(p);
                    parent = self.parent_of(p);
                } else {
                    if !self.is_red(self.left_of(w)) {
                        if let Some(wr) = self.right_of(w) {
                            self.node_mut(wr).set_black();
                        }
                        self.node_mut(w).set_red();
                        self.rotate_left(w);
                        w = match self.left_of(p) {
                            Some(w) => w,
                            None => break,
                        };
                    }
                    let p_black = self.node(p).is_black();
                    self.node_mut(w).black = p_black;
                    self.node_mut(p).set_black();
                    if let Some(wl) = self.left_of(w) {
                        self.node_mut(wl).set_black();
                    }
                    self.rotate_right(p);
                    x = self.root;
                    parent = None;
                }
            }
        }
        if let Some(x) = x {
            self.node_mut(x).set_black();
        }
    }

    /// Check red-black and ordering invariants, parent links and the
    /// entry count. Meant for tests and sanity sweeps.
    pub fn validate(&self) -> Result<()> {
        if self.is_red(self.root) {
            return err_at!(Fatal, msg: "root node is red");
        }
        self.validate_node(self.root, None)?;
        let n = self.iter().count();
        if n != self.n_count {
            return err_at!(Fatal, msg: "count mismatch {} {}", n, self.n_count);
        }
        Ok(())
    }

    // return black-height of the sub-tree.
    fn validate_node(&self, id: Option<NodeId>, parent: Option<NodeId>) -> Result<usize> {
        let id = match id {
            Some(id) => id,
            None => return Ok(1),
        };
        let node = self.node(id);
        if node.parent != parent {
            return err_at!(Fatal, msg: "parent link broken at {:?}", id);
        }
        if !node.is_black() && self.is_red(node.parent) {
            return err_at!(Fatal, msg: "consecutive red nodes at {:?}", id);
        }
        if let Some(l) = node.left {
            if self.compare(self.node(l).as_key(), node.as_key()) != Ordering::Less {
                return err_at!(Fatal, msg: "left child out of order at {:?}", id);
            }
        }
        if let Some(r) = node.right {
            if self.compare(self.node(r).as_key(), node.as_key()) != Ordering::Greater {
                return err_at!(Fatal, msg: "right child out of order at {:?}", id);
            }
        }
        let lh = self.validate_node(node.left, Some(id))?;
        let rh = self.validate_node(node.right, Some(id))?;
        if lh != rh {
            return err_at!(Fatal, msg: "unbalanced blacks {} {} at {:?}", lh, rh, id);
        }
        Ok(lh + if node.is_black() { 1 } else { 0 })
    }
}

// raw construction, used when loading a serialized tree image. The
// stored shape is adopted as-is, no rebalancing.
impl<K, P> Tree<K, P> {
    pub(crate) fn adopt(&mut self, key: K, payload: P, black: bool) -> NodeId {
        let mut node = Node::new(key, payload);
        node.black = black;
        let id = self.acquire(node);
        self.n_count += 1;
        id
    }

    pub(crate) fn set_root(&mut self, id: Option<NodeId>) {
        self.root = id;
    }
}

/// In-order iterator over the full tree.
pub struct Iter<'a, K, P> {
    tree: &'a Tree<K, P>,
    cursor: Option<NodeId>,
}

impl<'a, K, P> Iterator for Iter<'a, K, P>
where
    K: Ord,
{
    type Item = (NodeId, &'a Node<K, P>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.tree.next(id);
        Some((id, self.tree.node(id)))
    }
}

/// Bounded in-order iterator, see [Tree::enumerate].
pub struct Range<'a, K, P> {
    tree: &'a Tree<K, P>,
    cursor: Option<NodeId>,
    max: Option<K>,
    max_incl: bool,
}

impl<'a, K, P> Iterator for Range<'a, K, P>
where
    K: Ord,
{
    type Item = (NodeId, &'a Node<K, P>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        if let Some(max) = &self.max {
            match self.tree.compare(self.tree.node(id).as_key(), max) {
                Ordering::Less => (),
                Ordering::Equal if self.max_incl => (),
                _ => {
                    self.cursor = None;
                    return None;
                }
            }
        }
        self.cursor = self.tree.next(id);
        Some((id, self.tree.node(id)))
    }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;

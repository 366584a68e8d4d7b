//! Secondary data index: a named, non-unique ordered multimap from a
//! derived key to the primary-tree nodes carrying that value.
//!
//! Consistency with the primary tree runs through the side-bag: every
//! KeyNode remembers, per index ordinal, which DataNode holds it, so
//! updates and deletions fix the index up in O(1) lookups. On disk a
//! DataNode stores the payload offsets of its referrers; offsets are
//! resolved back to node handles against the primary index when
//! loading.

use std::{cmp::Ordering, collections::HashMap, convert::TryFrom, sync::Arc};

use crate::{
    codec::{
        put_i32, put_i64, put_i8, read_value, write_value, Dec, IxKey, FORMAT_INITIAL,
    },
    index::PrimaryIndex,
    mapping::{compare_ixkeys, Component, DbKey, IndexDef},
    rbt::{Node, NodeId, Range, Tree},
    Error, Result,
};

/// One secondary index over a table.
pub struct DataIndex<R> {
    name: String,
    ordinal: usize,
    components: Vec<Component>,
    project: Box<dyn Fn(&R) -> IxKey + Send + Sync>,
    tree: Tree<IxKey, Vec<NodeId>>,
}

impl<R> DataIndex<R> {
    pub fn new(def: IndexDef<R>, ordinal: usize) -> DataIndex<R> {
        let components = def.components;
        let cmp_components = components.clone();
        let cmp = Arc::new(move |a: &IxKey, b: &IxKey| {
            compare_ixkeys(&cmp_components, a, b)
        });
        DataIndex {
            name: def.name,
            ordinal,
            components,
            project: def.project,
            tree: Tree::with_cmp(cmp),
        }
    }

    pub fn as_name(&self) -> &str {
        &self.name
    }

    /// Number of distinct derived-key values.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub(crate) fn compare(&self, a: &IxKey, b: &IxKey) -> Ordering {
        compare_ixkeys(&self.components, a, b)
    }

    pub(crate) fn derive(&self, record: &R) -> IxKey {
        (self.project)(record)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node<IxKey, Vec<NodeId>> {
        self.tree.node(id)
    }

    pub(crate) fn enumerate(
        &self,
        min: Option<&IxKey>,
        min_incl: bool,
        max: Option<&IxKey>,
        max_incl: bool,
    ) -> Range<IxKey, Vec<NodeId>> {
        self.tree.enumerate(min, min_incl, max, max_incl)
    }

    /// Place `id` under the record's current derived value. When the
    /// node already participates and the derived value compares equal,
    /// nothing changes; otherwise it moves between DataNodes, dropping
    /// a DataNode that loses its last referrer.
    pub fn update<K>(&mut self, pk: &mut PrimaryIndex<K>, id: NodeId, record: &R)
    where
        K: DbKey,
    {
        let derived = self.derive(record);
        if let Some(dn) = pk.bag_get(id, self.ordinal) {
            if self.compare(self.tree.node(dn).as_key(), &derived) == Ordering::Equal {
                return;
            }
            self.detach(pk, id, dn);
        }
        let (dn, _) = self.tree.insert(derived, Vec::new());
        let keys = &mut self.tree.node_mut(dn).payload;
        if !keys.contains(&id) {
            keys.push(id);
        }
        pk.bag_set(id, self.ordinal, Some(dn));
    }

    /// Remove `id` from this index; called through the side-bag when
    /// the primary node is deleted.
    pub fn cleanup<K>(&mut self, pk: &mut PrimaryIndex<K>, id: NodeId)
    where
        K: DbKey,
    {
        if let Some(dn) = pk.bag_get(id, self.ordinal) {
            self.detach(pk, id, dn);
        }
    }

    fn detach<K>(&mut self, pk: &mut PrimaryIndex<K>, id: NodeId, dn: NodeId)
    where
        K: DbKey,
    {
        let keys = &mut self.tree.node_mut(dn).payload;
        keys.retain(|k| *k != id);
        if keys.is_empty() {
            self.tree.delete(dn);
        }
        pk.bag_set(id, self.ordinal, None);
    }

    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Pre-order serialization: `(color, derived key, referrer count,
    /// referrer payload offsets)`, color `-1` terminating each branch.
    pub fn serialize<K>(&self, pk: &PrimaryIndex<K>, buf: &mut Vec<u8>) -> Result<()>
    where
        K: DbKey,
    {
        self.serialize_node(self.tree.root(), pk, buf)
    }

    fn serialize_node<K>(
        &self,
        id: Option<NodeId>,
        pk: &PrimaryIndex<K>,
        buf: &mut Vec<u8>,
    ) -> Result<()>
    where
        K: DbKey,
    {
        let id = match id {
            Some(id) => id,
            None => {
                put_i8(buf, -1);
                return Ok(());
            }
        };
        let node = self.tree.node(id);
        put_i8(buf, if node.is_black() { 1 } else { 0 });
        for value in node.as_key().0.iter() {
            write_value(buf, value)?;
        }
        let n = err_at!(FailConvert, i32::try_from(node.payload.len()))?;
        put_i32(buf, n);
        for key_id in node.payload.iter() {
            let offset = pk.node(*key_id).payload.offset;
            put_i64(buf, err_at!(FailConvert, i64::try_from(offset))?);
        }
        let (left, right) = (node.left, node.right);
        self.serialize_node(left, pk, buf)?;
        self.serialize_node(right, pk, buf)
    }

    /// Rebuild this index from its serialized image, resolving
    /// referrer offsets against the freshly loaded primary index. A
    /// `format` of the initial version reads single-referrer nodes and
    /// converts them on the fly.
    pub fn load<K>(
        &mut self,
        dec: &mut Dec,
        format: i32,
        pk: &mut PrimaryIndex<K>,
    ) -> Result<()>
    where
        K: DbKey,
    {
        self.tree.clear();
        let offsets: HashMap<u64, NodeId> = pk.offset_map().clone();
        let root = self.load_node(dec, format, pk, &offsets)?;
        self.tree.set_root(root);
        Ok(())
    }

    fn load_node<K>(
        &mut self,
        dec: &mut Dec,
        format: i32,
        pk: &mut PrimaryIndex<K>,
        offsets: &HashMap<u64, NodeId>,
    ) -> Result<Option<NodeId>>
    where
        K: DbKey,
    {
        let color = dec.read_i8()?;
        if color == -1 {
            return Ok(None);
        }
        if color != 0 && color != 1 {
            return err_at!(DecodeFail, msg: "bad node color {}", color);
        }

        let mut values = Vec::with_capacity(self.components.len());
        for component in self.components.iter() {
            values.push(read_value(dec, &component.dbtype)?);
        }
        let key = IxKey(values);

        let count = if format == FORMAT_INITIAL {
            1
        } else {
            err_at!(FailConvert, usize::try_from(dec.read_i32()?))?
        };
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = err_at!(FailConvert, u64::try_from(dec.read_i64()?))?;
            match offsets.get(&offset) {
                Some(id) => ids.push(*id),
                None => {
                    return err_at!(
                        DecodeFail, msg: "index {:?} dangles at offset {}",
                        self.name, offset
                    )
                }
            }
        }

        let dn = self.tree.adopt(key, ids.clone(), color == 1);
        for id in ids.iter() {
            pk.bag_set(*id, self.ordinal, Some(dn));
        }

        let left = self.load_node(dec, format, pk, offsets)?;
        self.tree.node_mut(dn).left = left;
        if let Some(l) = left {
            self.tree.node_mut(l).parent = Some(dn);
        }
        let right = self.load_node(dec, format, pk, offsets)?;
        self.tree.node_mut(dn).right = right;
        if let Some(r) = right {
            self.tree.node_mut(r).parent = Some(dn);
        }
        Ok(Some(dn))
    }

    /// Index fidelity sweep, for tests: the tree is a valid red-black
    /// tree, every DataNode has referrers and every referrer's
    /// side-bag points back at it.
    pub fn validate<K>(&self, pk: &PrimaryIndex<K>) -> Result<()>
    where
        K: DbKey,
    {
        self.tree.validate()?;
        for (dn, node) in self.tree.iter() {
            if node.payload.is_empty() {
                return err_at!(Fatal, msg: "empty data-node in {:?}", self.name);
            }
            for id in node.payload.iter() {
                if pk.bag_get(*id, self.ordinal) != Some(dn) {
                    return err_at!(Fatal, msg: "side-bag diverges in {:?}", self.name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "secondary_test.rs"]
mod secondary_test;

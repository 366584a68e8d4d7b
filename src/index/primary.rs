//! Primary key index: an ordered map from key to the `(offset,
//! length)` location of the record payload in the data file, backed by
//! the free-space allocator.

use std::{collections::HashMap, convert::TryFrom};

use crate::{
    codec::{put_i32, put_i64, put_i8, read_value, write_value, AsValue, Dec},
    fs::TableWriter,
    mapping::DbKey,
    rbt::{Iter, Node, NodeId, Tree},
    space::DataMap,
    Error, Result,
};

/// Payload of a primary-tree node: where the record's encoded bytes
/// live, plus the side-bag of secondary-index memberships.
pub struct KeySlot {
    pub offset: u64,
    pub length: u32,
    // one slot per secondary index, by ordinal; names the DataNode in
    // that index currently holding this key.
    pub(crate) bag: Vec<Option<NodeId>>,
}

impl KeySlot {
    fn new(n_indexes: usize) -> KeySlot {
        KeySlot {
            offset: 0,
            length: 0,
            bag: vec![None; n_indexes],
        }
    }
}

/// Primary key index for one table.
pub struct PrimaryIndex<K> {
    tree: Tree<K, KeySlot>,
    map: DataMap,
    n_indexes: usize,
    by_offset: Option<HashMap<u64, NodeId>>,
}

impl<K> PrimaryIndex<K>
where
    K: DbKey,
{
    pub fn new(n_indexes: usize) -> PrimaryIndex<K> {
        PrimaryIndex {
            tree: Tree::new(),
            map: DataMap::new(),
            n_indexes,
            by_offset: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    #[inline]
    pub fn data_map(&self) -> &DataMap {
        &self.map
    }

    pub fn find(&self, key: &K) -> Option<NodeId> {
        self.tree.find(key)
    }

    pub fn node(&self, id: NodeId) -> &Node<K, KeySlot> {
        self.tree.node(id)
    }

    pub fn iter(&self) -> Iter<K, KeySlot> {
        self.tree.iter()
    }

    pub(crate) fn bag_get(&self, id: NodeId, ordinal: usize) -> Option<NodeId> {
        self.tree.node(id).payload.bag[ordinal]
    }

    pub(crate) fn bag_set(&mut self, id: NodeId, ordinal: usize, data_node: Option<NodeId>) {
        self.tree.node_mut(id).payload.bag[ordinal] = data_node;
    }

    /// Insert-or-get the node for `key` sized to `length` bytes. A new
    /// node allocates; an existing node whose length changed frees the
    /// old range and allocates anew; an unchanged length leaves the
    /// location as is. The caller writes the payload at the returned
    /// node's offset.
    pub fn update(&mut self, key: K, length: u32) -> Result<(NodeId, bool)> {
        self.by_offset = None;
        let (id, inserted) = self.tree.insert(key, KeySlot::new(self.n_indexes));
        if inserted {
            let offset = self.map.alloc(length);
            let slot = &mut self.tree.node_mut(id).payload;
            slot.offset = offset;
            slot.length = length;
        } else if self.tree.node(id).payload.length != length {
            let (old_offset, old_length) = {
                let slot = &self.tree.node(id).payload;
                (slot.offset, slot.length)
            };
            self.map.free(old_offset, old_length)?;
            let offset = self.map.alloc(length);
            let slot = &mut self.tree.node_mut(id).payload;
            slot.offset = offset;
            slot.length = length;
        }
        Ok((id, inserted))
    }

    /// Remove node `id`, releasing its data-file range. Secondary
    /// index cleanup is the caller's duty, via the side-bag, before
    /// this call.
    pub fn remove(&mut self, id: NodeId) -> Result<(K, KeySlot)> {
        self.by_offset = None;
        let (offset, length) = {
            let slot = &self.tree.node(id).payload;
            (slot.offset, slot.length)
        };
        self.map.free(offset, length)?;
        Ok(self.tree.delete(id))
    }

    pub fn min_key(&self) -> Option<K> {
        self.tree.first().map(|id| self.tree.node(id).key.clone())
    }

    pub fn max_key(&self) -> Option<K> {
        self.tree.last().map(|id| self.tree.node(id).key.clone())
    }

    /// In-order snapshot of all keys.
    pub fn make_key_list(&self) -> Vec<K> {
        self.tree.iter().map(|(_, node)| node.key.clone()).collect()
    }

    /// Copy every live payload range to a tight rolling offset in the
    /// writer's scratch data file, rewrite node offsets and rebuild
    /// the allocator.
    pub fn compact(&mut self, wr: &mut dyn TableWriter) -> Result<()> {
        self.by_offset = None;
        let mut fpos: u64 = 0;
        let mut cursor = self.tree.first();
        while let Some(id) = cursor {
            let (offset, length) = {
                let slot = &self.tree.node(id).payload;
                (slot.offset, slot.length)
            };
            if length > 0 {
                wr.copy_data(offset, fpos, length)?;
                self.tree.node_mut(id).payload.offset = fpos;
                fpos += length as u64;
            }
            cursor = self.tree.next(id);
        }

        let ranges: Vec<(u64, u32)> = self
            .tree
            .iter()
            .map(|(_, node)| (node.payload.offset, node.payload.length))
            .collect();
        self.map = DataMap::rebuild(ranges.into_iter())?;
        Ok(())
    }

    /// Drop every entry and the allocator state.
    pub fn clear(&mut self) {
        self.tree.clear();
        self.map = DataMap::new();
        self.by_offset = None;
    }

    /// Transient map from payload offset to node handle, used to
    /// rehydrate secondary indexes after a full load. Rebuilt on
    /// demand; any mutation invalidates it.
    pub(crate) fn offset_map(&mut self) -> &HashMap<u64, NodeId> {
        if self.by_offset.is_none() {
            let map: HashMap<u64, NodeId> = self
                .tree
                .iter()
                .map(|(id, node)| (node.payload.offset, id))
                .collect();
            self.by_offset = Some(map);
        }
        match &self.by_offset {
            Some(map) => map,
            None => unreachable!(),
        }
    }

    /// Pre-order serialization: `(color, length, offset, key)` per
    /// node, color `-1` terminating each branch.
    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.serialize_node(self.tree.root(), buf)
    }

    fn serialize_node(&self, id: Option<NodeId>, buf: &mut Vec<u8>) -> Result<()> {
        let id = match id {
            Some(id) => id,
            None => {
                put_i8(buf, -1);
                return Ok(());
            }
        };
        let node = self.tree.node(id);
        put_i8(buf, if node.is_black() { 1 } else { 0 });
        put_i32(buf, err_at!(FailConvert, i32::try_from(node.payload.length))?);
        put_i64(buf, err_at!(FailConvert, i64::try_from(node.payload.offset))?);
        write_value(buf, &node.key.clone().into_value())?;
        let (left, right) = (node.left, node.right);
        self.serialize_node(left, buf)?;
        self.serialize_node(right, buf)
    }

    /// Rebuild the index from its serialized image; parent links are
    /// reconstructed from the traversal and the allocator from the
    /// node ranges.
    pub fn load(dec: &mut Dec, n_indexes: usize) -> Result<PrimaryIndex<K>> {
        let mut tree: Tree<K, KeySlot> = Tree::new();
        let root = Self::load_node(&mut tree, dec, n_indexes)?;
        tree.set_root(root);

        let ranges: Vec<(u64, u32)> = tree
            .iter()
            .map(|(_, node)| (node.payload.offset, node.payload.length))
            .collect();
        let map = DataMap::rebuild(ranges.into_iter())?;

        Ok(PrimaryIndex { tree, map, n_indexes, by_offset: None })
    }

    fn load_node(
        tree: &mut Tree<K, KeySlot>,
        dec: &mut Dec,
        n_indexes: usize,
    ) -> Result<Option<NodeId>> {
        let color = dec.read_i8()?;
        if color == -1 {
            return Ok(None);
        }
        if color != 0 && color != 1 {
            return err_at!(DecodeFail, msg: "bad node color {}", color);
        }
        let length = err_at!(FailConvert, u32::try_from(dec.read_i32()?))?;
        let offset = err_at!(FailConvert, u64::try_from(dec.read_i64()?))?;
        let key = K::from_value(read_value(dec, &K::dbtype())?)?;

        let mut slot = KeySlot::new(n_indexes);
        slot.offset = offset;
        slot.length = length;
        let id = tree.adopt(key, slot, color == 1);

        let left = Self::load_node(tree, dec, n_indexes)?;
        tree.node_mut(id).left = left;
        if let Some(l) = left {
            tree.node_mut(l).parent = Some(id);
        }
        let right = Self::load_node(tree, dec, n_indexes)?;
        tree.node_mut(id).right = right;
        if let Some(r) = right {
            tree.node_mut(r).parent = Some(id);
        }
        Ok(Some(id))
    }

    /// Red-black and allocator invariant sweep, for tests.
    pub fn validate(&self) -> Result<()> {
        self.tree.validate()?;
        self.map.validate()?;

        let mut ranges: Vec<(u64, u32)> = self
            .tree
            .iter()
            .map(|(_, node)| (node.payload.offset, node.payload.length))
            .collect();
        ranges.sort_by_key(|(offset, _)| *offset);
        let rebuilt = DataMap::rebuild(ranges.into_iter())?;
        if rebuilt.as_allocs() != self.map.as_allocs() {
            return err_at!(Fatal, msg: "allocator diverges from live ranges");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "primary_test.rs"]
mod primary_test;

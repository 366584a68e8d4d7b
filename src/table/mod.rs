//! Module implement the table: one registered record kind bound to its
//! primary key index, secondary indexes, codec and storage files.
//!
//! The index file holds the whole table image: schema header,
//! properties, the primary tree and every named secondary tree,
//! re-serialized in one buffered pass when a write scope commits. The
//! data file holds only record payloads at the offsets the primary
//! index assigns. Reads check the index file's timestamp per scope and
//! reload the image when it changed underneath.

use std::{
    any::Any,
    collections::HashMap,
    convert::TryFrom,
    marker::PhantomData,
    sync::{Mutex, MutexGuard},
    time::SystemTime,
};

use crate::{
    codec::{
        merge_schema, put_i16, put_str, read_value, skip_value, write_value, Dec,
        DbType, Header, MemberDesc, SchemaBlob,
    },
    db::Database,
    fs::{TableInfo, TableReader, TableWriter},
    index::{DataIndex, PrimaryIndex},
    mapping::{DbKey, KeySpec, Mapping, Member},
    rbt::NodeId,
    scope,
    Error, Result,
};

mod query;

pub use query::{IndexQuery, LazyList};

/// Object-safe core of a table, what the database and the scope commit
/// path need without knowing the record type.
pub(crate) trait CoreTable: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn to_name(&self) -> String;

    fn ensure_loaded_core(&self, rd: &mut dyn TableReader) -> Result<()>;

    fn build_image(&self) -> Result<Vec<u8>>;

    fn data_max(&self) -> Result<u64>;

    fn mark_clean(&self, ts: Option<SystemTime>) -> Result<()>;

    fn invalidate(&self) -> Result<()>;

    fn compact_core(&self, wr: &mut dyn TableWriter) -> Result<()>;

    fn purge_core(&self, wr: &mut dyn TableWriter) -> Result<()>;
}

// the full in-memory mirror of one table.
pub(crate) struct TableState<R, K> {
    pub(crate) name: String,
    pub(crate) key: KeySpec<R, K>,
    pub(crate) members: Vec<Member<R>>,
    by_id: HashMap<i16, usize>,
    // on-disk members with no configured counterpart, skippable by
    // dbtype.
    orphans: HashMap<i16, DbType>,
    hash: u32,
    blob: Vec<u8>,
    properties: Vec<(String, String)>,
    pub(crate) pk: PrimaryIndex<K>,
    pub(crate) indexes: Vec<DataIndex<R>>,
    loaded: bool,
    pub(crate) dirty: bool,
    ts: Option<SystemTime>,
}

impl<R, K> TableState<R, K>
where
    R: Default + 'static,
    K: DbKey,
{
    fn new(mapping: Mapping<R, K>) -> Result<TableState<R, K>> {
        mapping.validate()?;
        let name = mapping.name;
        let key = match mapping.key {
            Some(key) => key,
            None => return err_at!(MissingPrimaryKey, msg: "table {:?}", name),
        };
        let mut members = mapping.members;
        for (i, member) in members.iter_mut().enumerate() {
            member.id = i as i16;
        }
        let indexes: Vec<DataIndex<R>> = mapping
            .indexes
            .into_iter()
            .enumerate()
            .map(|(ordinal, def)| DataIndex::new(def, ordinal))
            .collect();
        let n_indexes = indexes.len();

        let mut state = TableState {
            name,
            key,
            members,
            by_id: HashMap::new(),
            orphans: HashMap::new(),
            hash: 0,
            blob: Vec::new(),
            properties: Vec::new(),
            pk: PrimaryIndex::new(n_indexes),
            indexes,
            loaded: false,
            dirty: false,
            ts: None,
        };
        state.rebuild_schema()?;
        Ok(state)
    }

    // recompute by-id lookup, schema blob and hash from the member
    // list's current ids.
    fn rebuild_schema(&mut self) -> Result<()> {
        self.by_id = self
            .members
            .iter()
            .enumerate()
            .map(|(i, member)| (member.id, i))
            .collect();
        let blob = SchemaBlob {
            key_dbtype: K::dbtype(),
            members: self
                .members
                .iter()
                .map(|member| MemberDesc {
                    id: member.id,
                    name: member.name.clone(),
                    dbtype: member.dbtype.clone(),
                })
                .collect(),
        };
        self.blob = blob.encode()?;
        self.hash = blob.hash()?;
        Ok(())
    }

    fn reset_empty(&mut self) {
        let n_indexes = self.indexes.len();
        self.pk = PrimaryIndex::new(n_indexes);
        for index in self.indexes.iter_mut() {
            index.clear();
        }
        self.orphans.clear();
        self.properties.clear();
    }

    /// Reload the in-memory image when the index file changed since it
    /// was last read.
    pub(crate) fn ensure_loaded(&mut self, rd: &mut dyn TableReader) -> Result<()> {
        let ts = rd.ts()?;
        if self.loaded && ts == self.ts {
            return Ok(());
        }
        match rd.read_index()? {
            None => self.reset_empty(),
            Some(image) => self.parse_image(&image, rd)?,
        }
        self.ts = ts;
        self.loaded = true;
        self.dirty = false;
        log::debug!(target: "recstore", "loaded table {:?}, {} keys", self.name, self.pk.len());
        Ok(())
    }

    fn parse_image(&mut self, image: &[u8], rd: &mut dyn TableReader) -> Result<()> {
        let mut dec = Dec::new(image);
        let header = Header::decode(&mut dec)?;
        self.properties = header.properties;

        if header.hash != self.hash {
            let on_disk = SchemaBlob::decode(&header.blob)?;
            let configured: Vec<(String, DbType)> = self
                .members
                .iter()
                .map(|member| (member.name.clone(), member.dbtype.clone()))
                .collect();
            let merge = merge_schema(&on_disk, &K::dbtype(), &configured)?;
            for (member, id) in self.members.iter_mut().zip(merge.ids.into_iter()) {
                member.id = id;
            }
            self.orphans = merge
                .orphans
                .into_iter()
                .map(|desc| (desc.id, desc.dbtype))
                .collect();
            self.rebuild_schema()?;
            log::info!(
                target: "recstore",
                "upgraded schema of table {:?}, {} orphan members",
                self.name,
                self.orphans.len()
            );
        } else {
            self.orphans.clear();
        }

        self.pk = PrimaryIndex::load(&mut dec, self.indexes.len())?;

        let mut found = vec![false; self.indexes.len()];
        loop {
            let name = dec.read_str()?;
            if name.is_empty() {
                break;
            }
            let pos = self.indexes.iter().position(|x| x.as_name() == name);
            match pos {
                Some(i) => {
                    let (pk, index) = (&mut self.pk, &mut self.indexes[i]);
                    index.load(&mut dec, header.format, pk)?;
                    found[i] = true;
                }
                None => {
                    return err_at!(
                        IncompatibleUpgrade,
                        msg: "index {:?} on disk is not configured", name
                    )
                }
            }
        }

        // indexes added to the mapping after the file was written have
        // no tree on disk; build them from the records.
        for i in 0..self.indexes.len() {
            if found[i] {
                continue;
            }
            self.indexes[i].clear();
            let ids: Vec<NodeId> = self.pk.iter().map(|(id, _)| id).collect();
            for id in ids.into_iter() {
                let record = self.read_record(rd, id)?;
                self.indexes[i].update(&mut self.pk, id, &record);
            }
        }
        Ok(())
    }

    /// The full index-file image: header, primary tree, named
    /// secondary trees and the empty-name terminator.
    fn build_image(&self) -> Result<Vec<u8>> {
        let mut buf: Vec<u8> = Vec::with_capacity(4096);
        Header::encode(&mut buf, &self.blob, self.hash, &self.properties)?;
        self.pk.serialize(&mut buf)?;
        for index in self.indexes.iter() {
            put_str(&mut buf, index.as_name());
            index.serialize(&self.pk, &mut buf)?;
        }
        put_str(&mut buf, "");
        Ok(buf)
    }

    fn encode_record_into(&self, record: &R, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        for member in self.members.iter() {
            put_i16(buf, member.id);
            write_value(buf, &(member.get)(record))?;
        }
        put_i16(buf, -1);
        Ok(())
    }

    fn decode_record(&self, data: &[u8], record: &mut R) -> Result<()> {
        let mut dec = Dec::new(data);
        loop {
            let id = dec.read_i16()?;
            if id == -1 {
                break;
            }
            match self.by_id.get(&id) {
                Some(i) => {
                    let member = &self.members[*i];
                    let value = read_value(&mut dec, &member.dbtype)?;
                    (member.set)(record, value)?;
                }
                None => match self.orphans.get(&id) {
                    Some(dbtype) => skip_value(&mut dec, dbtype)?,
                    None => {
                        return err_at!(
                            IncompatibleUpgrade, msg: "unknown member id {}", id
                        )
                    }
                },
            }
        }
        Ok(())
    }

    pub(crate) fn read_record(
        &self,
        rd: &mut dyn TableReader,
        id: NodeId,
    ) -> Result<R> {
        let (offset, length, key) = {
            let node = self.pk.node(id);
            (node.payload.offset, node.payload.length, node.key.clone())
        };
        let data = rd.read_data(offset, length)?;
        let mut record = R::default();
        self.decode_record(&data, &mut record)?;
        (self.key.set)(&mut record, key);
        Ok(record)
    }

    fn save_one(
        &mut self,
        record: &mut R,
        buf: &mut Vec<u8>,
        wr: &mut dyn TableWriter,
    ) -> Result<()> {
        let mut key = (self.key.get)(record);
        if self.key.autogen && key.is_unset() {
            if let Some(fresh) = K::generate(self.pk.max_key().as_ref()) {
                (self.key.set)(record, fresh.clone());
                key = fresh;
            }
        }

        self.encode_record_into(record, buf)?;
        let length = err_at!(FailConvert, u32::try_from(buf.len()))?;
        let (id, _) = self.pk.update(key, length)?;
        let offset = self.pk.node(id).payload.offset;
        wr.write_data(buf, offset)?;
        for index in self.indexes.iter_mut() {
            index.update(&mut self.pk, id, record);
        }
        self.dirty = true;
        Ok(())
    }

    fn delete_one(&mut self, key: &K) -> Result<bool> {
        let id = match self.pk.find(key) {
            Some(id) => id,
            None => return Ok(false),
        };
        for index in self.indexes.iter_mut() {
            index.cleanup(&mut self.pk, id);
        }
        self.pk.remove(id)?;
        self.dirty = true;
        Ok(true)
    }

    // a write operation failed after it may have mutated the trees;
    // drop the staleness timestamp so the next scope reloads the
    // on-disk image.
    fn poison(&mut self) {
        self.loaded = false;
        self.ts = None;
        self.dirty = false;
    }

    fn purge_state(&mut self, wr: &mut dyn TableWriter) -> Result<()> {
        wr.purge()?;
        self.reset_empty();
        self.ts = wr.ts()?;
        self.loaded = true;
        self.dirty = false;
        log::info!(target: "recstore", "purged table {:?}", self.name);
        Ok(())
    }

    pub(crate) fn index_position(&self, name: &str) -> Option<usize> {
        self.indexes
            .iter()
            .position(|x| x.as_name().eq_ignore_ascii_case(name))
    }
}

// a table cell: the state behind its lock, registered with the
// database under a type-erased core interface.
pub(crate) struct TableCell<R, K> {
    name: String,
    state: Mutex<TableState<R, K>>,
}

impl<R, K> TableCell<R, K>
where
    R: Default + 'static,
    K: DbKey,
{
    pub(crate) fn new(mapping: Mapping<R, K>) -> Result<TableCell<R, K>> {
        let state = TableState::new(mapping)?;
        let name = state.name.clone();
        Ok(TableCell { name, state: Mutex::new(state) })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<TableState<R, K>>> {
        err_at!(Fatal, self.state.lock())
    }
}

impl<R, K> CoreTable for TableCell<R, K>
where
    R: Default + 'static,
    K: DbKey,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_name(&self) -> String {
        self.name.clone()
    }

    fn ensure_loaded_core(&self, rd: &mut dyn TableReader) -> Result<()> {
        self.lock()?.ensure_loaded(rd)
    }

    fn build_image(&self) -> Result<Vec<u8>> {
        self.lock()?.build_image()
    }

    fn data_max(&self) -> Result<u64> {
        Ok(self.lock()?.pk.data_map().max())
    }

    fn mark_clean(&self, ts: Option<SystemTime>) -> Result<()> {
        let mut state = self.lock()?;
        state.dirty = false;
        state.ts = ts;
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.loaded = false;
        state.ts = None;
        state.dirty = false;
        Ok(())
    }

    fn compact_core(&self, wr: &mut dyn TableWriter) -> Result<()> {
        let mut state = self.lock()?;
        if let Err(err) = state.pk.compact(wr) {
            state.poison();
            return Err(err);
        }
        state.dirty = true;
        Ok(())
    }

    fn purge_core(&self, wr: &mut dyn TableWriter) -> Result<()> {
        self.lock()?.purge_state(wr)
    }
}

/// Typed handle to one table of an initialized [Database].
///
/// Operations open their own scope when none is active on the thread
/// and join the surrounding one otherwise, so single calls work
/// standalone and batches wrap naturally in
/// [Database::bulk_read]/[Database::bulk_write].
pub struct Table<'a, R, K> {
    db: &'a Database,
    ord: usize,
    _r: PhantomData<R>,
    _k: PhantomData<K>,
}

impl<'a, R, K> Clone for Table<'a, R, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, R, K> Copy for Table<'a, R, K> {}

impl<'a, R, K> Table<'a, R, K>
where
    R: Default + 'static,
    K: DbKey,
{
    pub(crate) fn new(db: &'a Database, ord: usize) -> Table<'a, R, K> {
        Table { db, ord, _r: PhantomData, _k: PhantomData }
    }

    fn with_cell<T>(&self, f: impl FnOnce(&TableCell<R, K>) -> Result<T>) -> Result<T> {
        let core = self.db.core(self.ord)?;
        match core.as_any().downcast_ref::<TableCell<R, K>>() {
            Some(cell) => f(cell),
            None => err_at!(Fatal, msg: "table accessed under mismatched types"),
        }
    }

    /// Save `record`, inserting or overwriting by its key. With an
    /// auto-generated key mapping, an unset key is replaced by a fresh
    /// one written back into the record.
    pub fn save(&self, record: &mut R) -> Result<()> {
        scope::with_write(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let mut buf = Vec::new();
                if let Err(err) = state.save_one(record, &mut buf, io.writer()?) {
                    state.poison();
                    return Err(err);
                }
                scope::mark_dirty(self.ord)
            })
        })
    }

    /// Batch form of [save][Table::save]; one scratch buffer is reused
    /// across records and the whole batch commits as one scope.
    pub fn save_many(&self, records: &mut [R]) -> Result<()> {
        scope::with_write(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let mut buf = Vec::new();
                for record in records.iter_mut() {
                    if let Err(err) = state.save_one(record, &mut buf, io.writer()?) {
                        state.poison();
                        return Err(err);
                    }
                }
                scope::mark_dirty(self.ord)
            })
        })
    }

    /// Non-upsert save: fail with `DuplicateKey` when the key is
    /// already present.
    pub fn insert(&self, record: &mut R) -> Result<()> {
        scope::with_write(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let key = (state.key.get)(record);
                if !(state.key.autogen && key.is_unset()) && state.pk.find(&key).is_some()
                {
                    return err_at!(DuplicateKey, msg: "table {:?}", state.name);
                }
                let mut buf = Vec::new();
                if let Err(err) = state.save_one(record, &mut buf, io.writer()?) {
                    state.poison();
                    return Err(err);
                }
                scope::mark_dirty(self.ord)
            })
        })
    }

    pub fn load_by_key(&self, key: &K) -> Result<Option<R>> {
        scope::with_read(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                match state.pk.find(key) {
                    None => Ok(None),
                    Some(id) => Ok(Some(state.read_record(io.reader(), id)?)),
                }
            })
        })
    }

    /// Load records for `keys` in order. Misses are omitted unless
    /// `yield_not_found` asks for a `None` placeholder per miss.
    pub fn load_by_keys(&self, keys: &[K], yield_not_found: bool) -> Result<Vec<Option<R>>> {
        scope::with_read(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let mut out = Vec::with_capacity(keys.len());
                for key in keys.iter() {
                    match state.pk.find(key) {
                        Some(id) => out.push(Some(state.read_record(io.reader(), id)?)),
                        None if yield_not_found => out.push(None),
                        None => (),
                    }
                }
                Ok(out)
            })
        })
    }

    /// Decode every record, in key order.
    pub fn load_all(&self) -> Result<Vec<R>> {
        scope::with_read(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let ids: Vec<NodeId> = state.pk.iter().map(|(id, _)| id).collect();
                let mut out = Vec::with_capacity(ids.len());
                for id in ids.into_iter() {
                    out.push(state.read_record(io.reader(), id)?);
                }
                Ok(out)
            })
        })
    }

    /// Re-decode the record's current payload into `record` in place.
    /// Returns false when its key is not present.
    pub fn refresh(&self, record: &mut R) -> Result<bool> {
        scope::with_read(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let key = (state.key.get)(record);
                let id = match state.pk.find(&key) {
                    Some(id) => id,
                    None => return Ok(false),
                };
                let (offset, length) = {
                    let node = state.pk.node(id);
                    (node.payload.offset, node.payload.length)
                };
                let data = io.reader().read_data(offset, length)?;
                state.decode_record(&data, record)?;
                Ok(true)
            })
        })
    }

    /// Delete by key; false when the key was not present.
    pub fn delete_by_key(&self, key: &K) -> Result<bool> {
        scope::with_write(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let removed = match state.delete_one(key) {
                    Ok(removed) => removed,
                    Err(err) => {
                        state.poison();
                        return Err(err);
                    }
                };
                if removed {
                    scope::mark_dirty(self.ord)?;
                }
                Ok(removed)
            })
        })
    }

    /// Delete the record by its embedded key.
    pub fn delete(&self, record: &R) -> Result<bool> {
        let key = self.with_cell(|cell| Ok((cell.lock()?.key.get)(record)))?;
        self.delete_by_key(&key)
    }

    /// Delete every key in `keys`; returns how many were present.
    pub fn delete_by_keys(&self, keys: &[K]) -> Result<usize> {
        scope::with_write(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let mut n = 0;
                for key in keys.iter() {
                    match state.delete_one(key) {
                        Ok(true) => n += 1,
                        Ok(false) => (),
                        Err(err) => {
                            state.poison();
                            return Err(err);
                        }
                    }
                }
                if n > 0 {
                    scope::mark_dirty(self.ord)?;
                }
                Ok(n)
            })
        })
    }

    pub fn count(&self) -> Result<usize> {
        scope::with_read(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                Ok(state.pk.len())
            })
        })
    }

    pub fn all_keys(&self) -> Result<Vec<K>> {
        scope::with_read(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                Ok(state.pk.make_key_list())
            })
        })
    }

    pub fn min_key(&self) -> Result<Option<K>> {
        scope::with_read(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                Ok(state.pk.min_key())
            })
        })
    }

    pub fn max_key(&self) -> Result<Option<K>> {
        scope::with_read(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                Ok(state.pk.max_key())
            })
        })
    }

    /// Rewrite the data file so live payloads occupy a contiguous
    /// prefix; the file is cropped to fit at commit.
    pub fn compact(&self) -> Result<()> {
        scope::with_write(self.db, || {
            self.with_cell(|cell| {
                {
                    let handle = scope::handle(self.db, self.ord)?;
                    let mut io = handle.borrow_mut();
                    let mut state = cell.lock()?;
                    state.ensure_loaded(io.reader())?;
                }
                let handle = scope::replace_with_compact(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                if let Err(err) = state.pk.compact(io.writer()?) {
                    state.poison();
                    return Err(err);
                }
                state.dirty = true;
                scope::mark_dirty(self.ord)?;
                scope::request_crop(self.ord)
            })
        })
    }

    /// Truncate both files and clear the in-memory state.
    pub fn purge(&self) -> Result<()> {
        scope::with_write(self.db, || {
            self.with_cell(|cell| {
                let handle = scope::handle(self.db, self.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.purge_state(io.writer()?)?;
                scope::clear_dirty(self.ord);
                Ok(())
            })
        })
    }

    /// Write this database's dirty index images now instead of at
    /// scope exit. Outside a write scope this is a no-op.
    pub fn flush(&self) -> Result<()> {
        scope::with_write(self.db, || scope::flush(self.db))
    }

    pub fn get_info(&self) -> Result<TableInfo> {
        scope::with_read(self.db, || {
            let handle = scope::handle(self.db, self.ord)?;
            let mut io = handle.borrow_mut();
            io.reader().info()
        })
    }

    /// Query builder over the named secondary index.
    pub fn index(&self, name: &str) -> Result<IndexQuery<'a, R, K>> {
        let ix = self.with_cell(|cell| {
            let state = cell.lock()?;
            match state.index_position(name) {
                Some(ix) => Ok(ix),
                None => err_at!(Fatal, msg: "no index {:?} on table {:?}", name, state.name),
            }
        })?;
        Ok(IndexQuery::new(*self, ix))
    }
}

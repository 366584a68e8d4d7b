//! Module implement the database: a directory of tables.
//!
//! A database is opened, fed entity mappings, then initialized.
//! Initialization seals every mapping into a table, checks for
//! duplicate names and missing keys, and opens the storage directory;
//! no schema changes are accepted afterwards. Typed table handles are
//! looked up by name, and whole batches of operations share a scope
//! through [bulk_read][Database::bulk_read] and
//! [bulk_write][Database::bulk_write].

use std::{
    mem,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    time::SystemTime,
};

use crate::{
    fs::{FsStorage, Storage, StorageTable, TableInfo},
    mapping::{DbKey, Mapping},
    scope::{self, Latch},
    table::{CoreTable, Table, TableCell},
    Error, Result,
};

// type-erased mapping, registered before the database seals.
trait AnyMapping: Send {
    fn table_name(&self) -> String;

    fn seal(self: Box<Self>) -> Result<Box<dyn CoreTable>>;
}

impl<R, K> AnyMapping for Mapping<R, K>
where
    R: Default + 'static,
    K: DbKey,
{
    fn table_name(&self) -> String {
        self.name.clone()
    }

    fn seal(self: Box<Self>) -> Result<Box<dyn CoreTable>> {
        Ok(Box::new(TableCell::new(*self)?))
    }
}

struct TableEntry {
    name: String,
    core: Arc<dyn CoreTable>,
    store: Arc<dyn StorageTable>,
}

struct Sealed {
    tables: Vec<TableEntry>,
}

struct DbInner {
    dir: PathBuf,
    gate: Latch,
    pending: Mutex<Vec<Box<dyn AnyMapping>>>,
    sealed: RwLock<Option<Arc<Sealed>>>,
}

/// Handle to one database directory. Clones share the same underlying
/// state and locks.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

impl Database {
    /// Open a database home at `dir`. Nothing touches the filesystem
    /// until [initialize][Database::initialize].
    pub fn open<P>(dir: P) -> Database
    where
        P: AsRef<Path>,
    {
        let inner = DbInner {
            dir: dir.as_ref().to_path_buf(),
            gate: Latch::new(),
            pending: Mutex::new(Vec::new()),
            sealed: RwLock::new(None),
        };
        Database { inner: Arc::new(inner) }
    }

    /// Register an entity mapping. Refused once initialized.
    pub fn map<R, K>(&self, mapping: Mapping<R, K>) -> Result<()>
    where
        R: Default + 'static,
        K: DbKey,
    {
        if err_at!(Fatal, self.inner.sealed.read())?.is_some() {
            return err_at!(
                AlreadyInitialized, msg: "no schema changes after initialize"
            );
        }
        err_at!(Fatal, self.inner.pending.lock())?.push(Box::new(mapping));
        Ok(())
    }

    /// Seal every registered mapping into a table and open the storage
    /// directory.
    pub fn initialize(&self) -> Result<()> {
        let mut sealed_slot = err_at!(Fatal, self.inner.sealed.write())?;
        if sealed_slot.is_some() {
            return err_at!(AlreadyInitialized, msg: "{:?}", self.inner.dir);
        }

        let mappings = {
            let mut pending = err_at!(Fatal, self.inner.pending.lock())?;
            mem::take(&mut *pending)
        };

        for (i, mapping) in mappings.iter().enumerate() {
            let name = mapping.table_name();
            let dup = mappings[..i]
                .iter()
                .any(|m| m.table_name().eq_ignore_ascii_case(&name));
            if dup {
                return err_at!(DuplicateTableName, msg: "{:?}", name);
            }
        }

        let storage: Box<dyn Storage> = Box::new(FsStorage::new(&self.inner.dir));
        storage.open()?;

        let mut tables = Vec::with_capacity(mappings.len());
        for mapping in mappings.into_iter() {
            let name = mapping.table_name();
            let store: Arc<dyn StorageTable> = Arc::from(storage.table(&name)?);
            let core: Arc<dyn CoreTable> = Arc::from(mapping.seal()?);
            tables.push(TableEntry { name, core, store });
        }

        log::info!(
            target: "recstore",
            "initialized database {:?} with {} tables",
            self.inner.dir,
            tables.len()
        );
        *sealed_slot = Some(Arc::new(Sealed { tables }));
        Ok(())
    }

    /// Typed handle to the named table. The record and key types must
    /// match the sealed mapping.
    pub fn table<R, K>(&self, name: &str) -> Result<Table<R, K>>
    where
        R: Default + 'static,
        K: DbKey,
    {
        let sealed = self.sealed()?;
        let ord = match sealed
            .tables
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(name))
        {
            Some(ord) => ord,
            None => return err_at!(Fatal, msg: "no table {:?}", name),
        };
        if sealed.tables[ord]
            .core
            .as_any()
            .downcast_ref::<TableCell<R, K>>()
            .is_none()
        {
            return err_at!(Fatal, msg: "table {:?} mapped under different types", name);
        }
        Ok(Table::new(self, ord))
    }

    /// Run `f` under one read scope; nested table reads join it.
    pub fn bulk_read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        scope::with_read(self, f)
    }

    /// Run `f` under one write scope; every dirty table commits when
    /// the outermost scope exits.
    pub fn bulk_write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        scope::with_write(self, f)
    }

    /// Write dirty index images now. Outside a surrounding write scope
    /// this opens and commits its own empty scope, a no-op.
    pub fn flush(&self) -> Result<()> {
        scope::with_write(self, || scope::flush(self))
    }

    /// Compact every table's data file.
    pub fn compact(&self) -> Result<()> {
        let sealed = self.sealed()?;
        scope::with_write(self, || {
            for ord in 0..sealed.tables.len() {
                let core = &sealed.tables[ord].core;
                {
                    let handle = scope::handle(self, ord)?;
                    let mut io = handle.borrow_mut();
                    core.ensure_loaded_core(io.reader())?;
                }
                let handle = scope::replace_with_compact(self, ord)?;
                let mut io = handle.borrow_mut();
                core.compact_core(io.writer()?)?;
                scope::mark_dirty(ord)?;
                scope::request_crop(ord)?;
            }
            Ok(())
        })
    }

    /// Truncate every table's files and clear all in-memory state.
    pub fn purge(&self) -> Result<()> {
        let sealed = self.sealed()?;
        scope::with_write(self, || {
            for ord in 0..sealed.tables.len() {
                let handle = scope::handle(self, ord)?;
                let mut io = handle.borrow_mut();
                sealed.tables[ord].core.purge_core(io.writer()?)?;
                scope::clear_dirty(ord);
            }
            Ok(())
        })
    }

    /// Per-table on-disk sizes.
    pub fn get_info(&self) -> Result<Vec<(String, TableInfo)>> {
        let sealed = self.sealed()?;
        scope::with_read(self, || {
            let mut out = Vec::with_capacity(sealed.tables.len());
            for ord in 0..sealed.tables.len() {
                let handle = scope::handle(self, ord)?;
                let mut io = handle.borrow_mut();
                let info = io.reader().info()?;
                out.push((sealed.tables[ord].name.clone(), info));
            }
            Ok(out)
        })
    }

    pub fn to_dir(&self) -> PathBuf {
        self.inner.dir.clone()
    }

    fn sealed(&self) -> Result<Arc<Sealed>> {
        match err_at!(Fatal, self.inner.sealed.read())?.as_ref() {
            Some(sealed) => Ok(Arc::clone(sealed)),
            None => err_at!(NotInitialized, msg: "{:?}", self.inner.dir),
        }
    }

    pub(crate) fn gate(&self) -> &Latch {
        &self.inner.gate
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn core(&self, ord: usize) -> Result<Arc<dyn CoreTable>> {
        let sealed = self.sealed()?;
        match sealed.tables.get(ord) {
            Some(entry) => Ok(Arc::clone(&entry.core)),
            None => err_at!(Fatal, msg: "no table ordinal {}", ord),
        }
    }

    pub(crate) fn storage_table(&self, ord: usize) -> Result<Arc<dyn StorageTable>> {
        let sealed = self.sealed()?;
        match sealed.tables.get(ord) {
            Some(entry) => Ok(Arc::clone(&entry.store)),
            None => err_at!(Fatal, msg: "no table ordinal {}", ord),
        }
    }

    pub(crate) fn core_build_image(&self, ord: usize) -> Result<Vec<u8>> {
        self.core(ord)?.build_image()
    }

    pub(crate) fn core_data_max(&self, ord: usize) -> Result<u64> {
        self.core(ord)?.data_max()
    }

    pub(crate) fn core_mark_clean(&self, ord: usize, ts: Option<SystemTime>) -> Result<()> {
        self.core(ord)?.mark_clean(ts)
    }

    pub(crate) fn core_invalidate(&self, ord: usize) -> Result<()> {
        self.core(ord)?.invalidate()
    }
}

#[cfg(test)]
#[path = "db_test.rs"]
mod db_test;

//! Module implement the per-thread transaction scope.
//!
//! Every database carries a latch-and-spin gate: read scopes share it,
//! a write scope owns it exclusively. The outermost scope on a thread
//! parks its state in a thread-local slot; nested begins of a
//! compatible kind re-enter it by refcount, and escalating from a read
//! scope to a write scope is refused. Table storage handles are opened
//! on first access within the scope and every dirty table's index
//! image is committed in one buffered pass when the outermost write
//! scope exits. An error poisons the scope: nothing commits and the
//! affected tables reload from disk on next access.

use std::{
    cell::RefCell,
    collections::{BTreeSet, HashMap},
    rc::Rc,
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

use crate::{
    db::Database,
    fs::{TableReader, TableWriter},
    Error, Result,
};

/// Latch-and-spin gate for database-level multi-reader single-writer
/// exclusion.
///
/// Uses an AtomicU32 for:
/// * ref-count, bits [0-29].
/// * latch flag, bit 30.
/// * lock flag, bit 31.
///
/// Unlike a guard-based lock, acquisition and release are explicit so
/// the permit can be parked in a thread-local slot across calls.
pub(crate) struct Latch {
    latchlock: AtomicU32,
}

impl Latch {
    const LATCH_FLAG: u32 = 0x40000000;
    const LOCK_FLAG: u32 = 0x80000000;
    const LATCH_LOCK_FLAG: u32 = 0xC0000000;
    const READERS_FLAG: u32 = 0x3FFFFFFF;

    pub fn new() -> Latch {
        Latch { latchlock: AtomicU32::new(0) }
    }

    /// Acquire read permission; spins while a writer holds or waits
    /// for the gate.
    pub fn acquire_read(&self) {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::LATCH_LOCK_FLAG) == 0 {
                // latch is not acquired by a writer
                if self
                    .latchlock
                    .compare_exchange(old, old + 1, SeqCst, SeqCst)
                    .is_ok()
                {
                    return;
                }
            }
            std::thread::yield_now();
        }
    }

    /// Acquire write permission: flip the latch to stop new readers,
    /// then spin until the active readers drain.
    pub fn acquire_write(&self) {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::LATCH_FLAG) == 0 {
                if (old & Self::LOCK_FLAG) != 0 {
                    panic!(concat!(
                        "if latch is flipped-off, lock can't be flipped-on! ",
                        "call the programmer"
                    ));
                }
                let new = old | Self::LATCH_FLAG;
                if self
                    .latchlock
                    .compare_exchange(old, new, SeqCst, SeqCst)
                    .is_ok()
                {
                    break;
                }
            }
            std::thread::yield_now();
        }
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::READERS_FLAG) == 0 {
                let new = old | Self::LOCK_FLAG;
                if self
                    .latchlock
                    .compare_exchange(old, new, SeqCst, SeqCst)
                    .is_ok()
                {
                    return;
                }
                panic!(concat!(
                    "latch is acquired, ZERO readers, but unable to lock! ",
                    "call the programmer"
                ));
            }
            std::thread::yield_now();
        }
    }

    pub fn release_read(&self) {
        self.latchlock.fetch_sub(1, SeqCst);
    }

    pub fn release_write(&self) {
        let old = self.latchlock.load(SeqCst);
        if (old & Self::READERS_FLAG) > 0 {
            panic!("can't have active readers, when lock is held! call the programmer");
        }
        if self.latchlock.compare_exchange(old, 0, SeqCst, SeqCst).is_err() {
            panic!("can't have readers/writers to modify when locked! call the programmer");
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ScopeKind {
    Read,
    Write,
}

/// One table handle held by the active scope.
pub(crate) enum IoHandle {
    Reader(Box<dyn TableReader>),
    Writer(Box<dyn TableWriter>),
}

impl IoHandle {
    pub fn reader(&mut self) -> &mut dyn TableReader {
        match self {
            IoHandle::Reader(rd) => rd.as_mut(),
            IoHandle::Writer(wr) => wr.as_reader(),
        }
    }

    pub fn writer(&mut self) -> Result<&mut dyn TableWriter> {
        match self {
            IoHandle::Writer(wr) => Ok(wr.as_mut()),
            IoHandle::Reader(_) => {
                err_at!(Fatal, msg: "write access through a read scope")
            }
        }
    }
}

struct ScopeState {
    db_id: usize,
    kind: ScopeKind,
    refs: usize,
    handles: HashMap<usize, Rc<RefCell<IoHandle>>>,
    dirty: BTreeSet<usize>,
    crop: BTreeSet<usize>,
    poisoned: bool,
}

impl ScopeState {
    fn new(db_id: usize, kind: ScopeKind) -> ScopeState {
        ScopeState {
            db_id,
            kind,
            refs: 1,
            handles: HashMap::new(),
            dirty: BTreeSet::new(),
            crop: BTreeSet::new(),
            poisoned: false,
        }
    }
}

thread_local! {
    static SCOPE: RefCell<Option<ScopeState>> = RefCell::new(None);
}

/// Run `f` within a read scope, entering the outer scope of this
/// thread when one is active.
pub(crate) fn with_read<T, F>(db: &Database, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    enter_read(db)?;
    let res = f();
    let exit_res = exit(db, res.is_err());
    match res {
        Ok(val) => {
            exit_res?;
            Ok(val)
        }
        Err(err) => {
            exit_res.ok();
            Err(err)
        }
    }
}

/// Run `f` within a write scope. Beginning a write inside an outer
/// read scope is refused.
pub(crate) fn with_write<T, F>(db: &Database, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    enter_write(db)?;
    let res = f();
    let exit_res = exit(db, res.is_err());
    match res {
        Ok(val) => {
            exit_res?;
            Ok(val)
        }
        Err(err) => {
            exit_res.ok();
            Err(err)
        }
    }
}

fn enter_read(db: &Database) -> Result<()> {
    SCOPE.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            None => {
                db.gate().acquire_read();
                *slot = Some(ScopeState::new(db.id(), ScopeKind::Read));
                Ok(())
            }
            Some(state) if state.db_id == db.id() => {
                state.refs += 1;
                Ok(())
            }
            Some(_) => err_at!(Fatal, msg: "scope already bound to another database"),
        }
    })
}

fn enter_write(db: &Database) -> Result<()> {
    SCOPE.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            None => {
                db.gate().acquire_write();
                *slot = Some(ScopeState::new(db.id(), ScopeKind::Write));
                Ok(())
            }
            Some(state) if state.db_id != db.id() => {
                err_at!(Fatal, msg: "scope already bound to another database")
            }
            Some(state) => match state.kind {
                ScopeKind::Write => {
                    state.refs += 1;
                    Ok(())
                }
                ScopeKind::Read => err_at!(
                    NestedWriteInRead, msg: "write scope inside an outer read scope"
                ),
            },
        }
    })
}

fn exit(db: &Database, failed: bool) -> Result<()> {
    let state = SCOPE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let outermost = match slot.as_mut() {
            None => false,
            Some(state) => {
                if failed {
                    state.poisoned = true;
                }
                if state.refs > 1 {
                    state.refs -= 1;
                    false
                } else {
                    true
                }
            }
        };
        if outermost {
            slot.take()
        } else {
            None
        }
    });

    match state {
        None => Ok(()),
        Some(state) => finish(db, state),
    }
}

// outermost exit: commit, close handles, release the gate.
fn finish(db: &Database, mut state: ScopeState) -> Result<()> {
    let mut result: Result<()> = Ok(());

    if state.kind == ScopeKind::Write {
        if state.poisoned {
            // nothing commits; force a reload from disk next scope.
            for ord in state.dirty.iter() {
                db.core_invalidate(*ord).ok();
            }
        } else {
            result = commit(db, &mut state);
            if result.is_err() {
                for ord in state.dirty.iter() {
                    db.core_invalidate(*ord).ok();
                }
            }
        }
    }

    for (_, handle) in state.handles.drain() {
        if let Ok(cell) = Rc::try_unwrap(handle) {
            if let IoHandle::Writer(mut wr) = cell.into_inner() {
                if let Err(err) = wr.close() {
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
    }

    match state.kind {
        ScopeKind::Read => db.gate().release_read(),
        ScopeKind::Write => db.gate().release_write(),
    }
    result
}

fn commit(db: &Database, state: &mut ScopeState) -> Result<()> {
    for ord in state.dirty.iter() {
        let image = db.core_build_image(*ord)?;
        let handle = match state.handles.get(ord) {
            Some(handle) => Rc::clone(handle),
            None => return err_at!(Fatal, msg: "dirty table {} without writer", ord),
        };
        let mut io = handle.borrow_mut();
        let wr = io.writer()?;
        wr.commit_data()?;
        if state.crop.contains(ord) {
            let max = db.core_data_max(*ord)?;
            wr.crop_data(max)?;
        }
        wr.write_index(&image)?;
        let ts = wr.ts()?;
        db.core_mark_clean(*ord, ts)?;
        log::debug!(target: "recstore", "committed table ord:{} {} bytes", ord, image.len());
    }
    state.dirty.clear();
    state.crop.clear();
    Ok(())
}

/// Write every dirty table's index image now, keeping the scope open.
pub(crate) fn flush(db: &Database) -> Result<()> {
    let (dirty, ok) = SCOPE.with(|cell| {
        let slot = cell.borrow();
        match slot.as_ref() {
            Some(state) if state.kind == ScopeKind::Write && !state.poisoned => {
                (state.dirty.clone(), true)
            }
            _ => (BTreeSet::new(), false),
        }
    });
    if !ok || dirty.is_empty() {
        return Ok(());
    }

    for ord in dirty.iter() {
        let image = db.core_build_image(*ord)?;
        let handle = handle(db, *ord)?;
        let mut io = handle.borrow_mut();
        let wr = io.writer()?;
        wr.commit_data()?;
        wr.write_index(&image)?;
        let ts = wr.ts()?;
        db.core_mark_clean(*ord, ts)?;
    }

    SCOPE.with(|cell| {
        if let Some(state) = cell.borrow_mut().as_mut() {
            for ord in dirty.iter() {
                state.dirty.remove(ord);
            }
        }
    });
    Ok(())
}

/// Storage handle for `ord`, opened on first access within the active
/// scope: a reader in a read scope, a writer in a write scope.
pub(crate) fn handle(db: &Database, ord: usize) -> Result<Rc<RefCell<IoHandle>>> {
    SCOPE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let state = match slot.as_mut() {
            Some(state) => state,
            None => return err_at!(Fatal, msg: "table access outside any scope"),
        };
        if let Some(handle) = state.handles.get(&ord) {
            return Ok(Rc::clone(handle));
        }
        let store = db.storage_table(ord)?;
        let io = match state.kind {
            ScopeKind::Read => IoHandle::Reader(store.begin_read()?),
            ScopeKind::Write => IoHandle::Writer(store.begin_write()?),
        };
        let handle = Rc::new(RefCell::new(io));
        state.handles.insert(ord, Rc::clone(&handle));
        Ok(handle)
    })
}

/// Swap the table's handle for a compacting writer; an already open
/// writer is closed first so the scratch writer can take the lock.
pub(crate) fn replace_with_compact(
    db: &Database,
    ord: usize,
) -> Result<Rc<RefCell<IoHandle>>> {
    SCOPE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let state = match slot.as_mut() {
            Some(state) => state,
            None => return err_at!(Fatal, msg: "table access outside any scope"),
        };
        if state.kind != ScopeKind::Write {
            return err_at!(Fatal, msg: "compaction requires a write scope");
        }
        if let Some(handle) = state.handles.remove(&ord) {
            match Rc::try_unwrap(handle) {
                Ok(cell) => {
                    if let IoHandle::Writer(mut wr) = cell.into_inner() {
                        wr.close()?;
                    }
                }
                Err(_) => {
                    return err_at!(Fatal, msg: "table handle busy during compaction")
                }
            }
        }
        let store = db.storage_table(ord)?;
        let handle = Rc::new(RefCell::new(IoHandle::Writer(store.begin_compact()?)));
        state.handles.insert(ord, Rc::clone(&handle));
        Ok(handle)
    })
}

pub(crate) fn mark_dirty(ord: usize) -> Result<()> {
    SCOPE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(state) => {
            state.dirty.insert(ord);
            Ok(())
        }
        None => err_at!(Fatal, msg: "dirty mark outside any scope"),
    })
}

pub(crate) fn clear_dirty(ord: usize) {
    SCOPE.with(|cell| {
        if let Some(state) = cell.borrow_mut().as_mut() {
            state.dirty.remove(&ord);
            state.crop.remove(&ord);
        }
    })
}

pub(crate) fn request_crop(ord: usize) -> Result<()> {
    SCOPE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(state) => {
            state.crop.insert(ord);
            Ok(())
        }
        None => err_at!(Fatal, msg: "crop request outside any scope"),
    })
}

#[cfg(test)]
#[path = "scope_test.rs"]
mod scope_test;

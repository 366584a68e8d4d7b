//! Query builder over a table's secondary index.
//!
//! Bounds select derived keys, inclusivity decided per end; a filter
//! sees the derived key; skip/take apply after filtering, over the
//! flattened sequence of matching key nodes in derived-key order.

use crate::{
    codec::{IntoIxKey, IxKey},
    fs::TableReader,
    mapping::DbKey,
    rbt::NodeId,
    scope,
    table::{Table, TableState},
    Result,
};

/// A range query over one secondary index. Build it up and finish with
/// [count][IndexQuery::count], [to_list][IndexQuery::to_list],
/// [to_id_list][IndexQuery::to_id_list] or
/// [to_lazy_list][IndexQuery::to_lazy_list].
pub struct IndexQuery<'a, R, K> {
    table: Table<'a, R, K>,
    ix: usize,
    min: Option<IxKey>,
    min_incl: bool,
    max: Option<IxKey>,
    max_incl: bool,
    skip_n: Option<usize>,
    take_n: Option<usize>,
    predicate: Option<Box<dyn Fn(&IxKey) -> bool + 'a>>,
}

impl<'a, R, K> IndexQuery<'a, R, K>
where
    R: Default + 'static,
    K: DbKey,
{
    pub(crate) fn new(table: Table<'a, R, K>, ix: usize) -> IndexQuery<'a, R, K> {
        IndexQuery {
            table,
            ix,
            min: None,
            min_incl: false,
            max: None,
            max_incl: false,
            skip_n: None,
            take_n: None,
            predicate: None,
        }
    }

    /// Equals-query: both bounds collapse onto `key`, inclusive.
    pub fn key<Q>(mut self, key: Q) -> Self
    where
        Q: IntoIxKey,
    {
        let key = key.into_ixkey();
        self.min = Some(key.clone());
        self.min_incl = true;
        self.max = Some(key);
        self.max_incl = true;
        self
    }

    pub fn greater_than<Q>(mut self, key: Q, inclusive: bool) -> Self
    where
        Q: IntoIxKey,
    {
        self.min = Some(key.into_ixkey());
        self.min_incl = inclusive;
        self
    }

    pub fn less_than<Q>(mut self, key: Q, inclusive: bool) -> Self
    where
        Q: IntoIxKey,
    {
        self.max = Some(key.into_ixkey());
        self.max_incl = inclusive;
        self
    }

    /// Keep only derived keys the predicate accepts.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&IxKey) -> bool + 'a,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip_n = Some(n);
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.take_n = Some(n);
        self
    }

    /// Number of matching key nodes.
    pub fn count(&self) -> Result<usize> {
        Ok(self.execute(|_, _, _| Ok(()))?.len())
    }

    /// Primary keys of the matching records, in derived-key order.
    pub fn to_id_list(&self) -> Result<Vec<K>> {
        self.execute(|state, _, id| Ok(state.pk.node(id).key.clone()))
    }

    /// Decode the matching records.
    pub fn to_list(&self) -> Result<Vec<R>> {
        self.execute(|state, rd, id| state.read_record(rd, id))
    }

    /// Resolve the matching primary keys now, decode records one by
    /// one as the iterator advances. Records deleted in between are
    /// skipped.
    pub fn to_lazy_list(&self) -> Result<LazyList<'a, R, K>> {
        let keys = self.to_id_list()?;
        Ok(LazyList { table: self.table, keys: keys.into_iter() })
    }

    fn execute<T, F>(&self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&TableState<R, K>, &mut dyn TableReader, NodeId) -> Result<T>,
    {
        let table = self.table;
        scope::with_read(table.db, || {
            table.with_cell(|cell| {
                let handle = scope::handle(table.db, table.ord)?;
                let mut io = handle.borrow_mut();
                let mut state = cell.lock()?;
                state.ensure_loaded(io.reader())?;
                let ids = self.matching_ids(&*state);
                let mut out = Vec::with_capacity(ids.len());
                for id in ids.into_iter() {
                    out.push(f(&*state, io.reader(), id)?);
                }
                Ok(out)
            })
        })
    }

    fn matching_ids(&self, state: &TableState<R, K>) -> Vec<NodeId> {
        let index = &state.indexes[self.ix];
        let mut ids: Vec<NodeId> = Vec::new();
        let iter = index.enumerate(
            self.min.as_ref(),
            self.min_incl,
            self.max.as_ref(),
            self.max_incl,
        );
        for (_, node) in iter {
            if let Some(predicate) = &self.predicate {
                if !predicate(node.as_key()) {
                    continue;
                }
            }
            ids.extend(node.payload.iter().cloned());
        }

        let skip = self.skip_n.unwrap_or(0);
        match self.take_n {
            Some(take) => ids.into_iter().skip(skip).take(take).collect(),
            None => ids.into_iter().skip(skip).collect(),
        }
    }
}

/// Lazy record iterator produced by
/// [to_lazy_list][IndexQuery::to_lazy_list].
pub struct LazyList<'a, R, K> {
    table: Table<'a, R, K>,
    keys: std::vec::IntoIter<K>,
}

impl<'a, R, K> Iterator for LazyList<'a, R, K>
where
    R: Default + 'static,
    K: DbKey,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            match self.table.load_by_key(&key) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

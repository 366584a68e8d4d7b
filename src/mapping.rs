//! Module implement typed table configuration.
//!
//! A [Mapping] names a table, binds the primary-key member through a
//! getter/setter pair, registers serializable members and declares
//! ordered secondary indexes. Member access is captured as typed
//! closures at mapping time; nothing is discovered at run time. The
//! mapping is validated and sealed when the database initializes, and
//! no further schema changes are accepted after that.

use uuid::Uuid;

use std::cmp::Ordering;

use crate::{
    codec::{caseless_cmp, AsValue, DbType, IxKey, Value},
    Error, Result,
};

/// Primary-key types: totally ordered, serializable and optionally
/// auto-generated.
pub trait DbKey: AsValue + Clone + Ord + Default + Send + Sync + 'static {
    /// Whether this value is the unset sentinel that triggers key
    /// auto-generation on save.
    fn is_unset(&self) -> bool {
        false
    }

    /// Produce a fresh key given the current maximum, for kinds that
    /// support auto-generation.
    fn generate(_max: Option<&Self>) -> Option<Self> {
        None
    }
}

impl DbKey for i32 {
    fn is_unset(&self) -> bool {
        *self == 0
    }

    fn generate(max: Option<&Self>) -> Option<Self> {
        match max {
            Some(max) => max.checked_add(1),
            None => Some(1),
        }
    }
}

impl DbKey for i64 {
    fn is_unset(&self) -> bool {
        *self == 0
    }

    fn generate(max: Option<&Self>) -> Option<Self> {
        match max {
            Some(max) => max.checked_add(1),
            None => Some(1),
        }
    }
}

impl DbKey for bool {}

impl DbKey for String {}

impl DbKey for Uuid {
    fn is_unset(&self) -> bool {
        self.is_nil()
    }

    fn generate(_max: Option<&Self>) -> Option<Self> {
        Some(Uuid::new_v4())
    }
}

impl<T> DbKey for Option<T>
where
    T: DbKey,
{
    fn is_unset(&self) -> bool {
        match self {
            None => true,
            Some(v) => v.is_unset(),
        }
    }

    fn generate(max: Option<&Self>) -> Option<Self> {
        let inner = max.and_then(|m| m.as_ref());
        T::generate(inner).map(Some)
    }
}

/// One serializable member bound to its record type.
pub struct Member<R> {
    pub(crate) name: String,
    pub(crate) dbtype: DbType,
    pub(crate) id: i16,
    pub(crate) get: Box<dyn Fn(&R) -> Value + Send + Sync>,
    pub(crate) set: Box<dyn Fn(&mut R, Value) -> Result<()> + Send + Sync>,
}

/// Primary-key accessors for a record type.
pub struct KeySpec<R, K> {
    pub(crate) get: Box<dyn Fn(&R) -> K + Send + Sync>,
    pub(crate) set: Box<dyn Fn(&mut R, K) + Send + Sync>,
    pub(crate) autogen: bool,
}

/// One component of a secondary index's derived key.
#[derive(Clone, Debug)]
pub struct Component {
    pub dbtype: DbType,
    pub case_insensitive: bool,
}

/// Declaration of a secondary index: name, derived-key components and
/// the projection from a record to its derived key.
pub struct IndexDef<R> {
    pub(crate) name: String,
    pub(crate) components: Vec<Component>,
    pub(crate) project: Box<dyn Fn(&R) -> IxKey + Send + Sync>,
}

/// Lexicographic comparison of derived keys across components,
/// honouring the per-component case-insensitive option.
pub(crate) fn compare_ixkeys(components: &[Component], a: &IxKey, b: &IxKey) -> Ordering {
    for (i, component) in components.iter().enumerate() {
        let (va, vb) = (a.0.get(i), b.0.get(i));
        let ord = match (va, vb) {
            (Some(Value::Str(sa)), Some(Value::Str(sb)))
                if component.case_insensitive =>
            {
                caseless_cmp(sa, sb)
            }
            (Some(va), Some(vb)) => va.cmp(vb),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Typed table configuration; see the module documentation.
pub struct Mapping<R, K> {
    pub(crate) name: String,
    pub(crate) key: Option<KeySpec<R, K>>,
    pub(crate) members: Vec<Member<R>>,
    pub(crate) indexes: Vec<IndexDef<R>>,
}

impl<R, K> Mapping<R, K>
where
    R: 'static,
    K: DbKey,
{
    pub fn new(name: &str) -> Mapping<R, K> {
        Mapping {
            name: name.to_string(),
            key: None,
            members: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Bind the primary-key member.
    pub fn with_key<G, S>(mut self, get: G, set: S) -> Self
    where
        G: Fn(&R) -> K + Send + Sync + 'static,
        S: Fn(&mut R, K) + Send + Sync + 'static,
    {
        self.key = Some(KeySpec {
            get: Box::new(get),
            set: Box::new(set),
            autogen: false,
        });
        self
    }

    /// Bind the primary-key member with auto-generation: saving a
    /// record whose key is unset (zero, or the nil guid) substitutes
    /// a fresh key.
    pub fn with_auto_key<G, S>(mut self, get: G, set: S) -> Self
    where
        G: Fn(&R) -> K + Send + Sync + 'static,
        S: Fn(&mut R, K) + Send + Sync + 'static,
    {
        self.key = Some(KeySpec {
            get: Box::new(get),
            set: Box::new(set),
            autogen: true,
        });
        self
    }

    /// Register a serializable member.
    pub fn with_member<T, G, S>(mut self, name: &str, get: G, set: S) -> Self
    where
        T: AsValue,
        G: Fn(&R) -> T + Send + Sync + 'static,
        S: Fn(&mut R, T) + Send + Sync + 'static,
    {
        self.members.push(Member {
            name: name.to_string(),
            dbtype: T::dbtype(),
            id: -1,
            get: Box::new(move |r| get(r).into_value()),
            set: Box::new(move |r, v| {
                set(r, T::from_value(v)?);
                Ok(())
            }),
        });
        self
    }

    /// Register a member with caller-supplied value conversion, for
    /// types outside the built-in set. The declared dbtype governs the
    /// wire encoding and must match what the closures produce.
    pub fn with_member_as<G, S>(mut self, name: &str, dbtype: DbType, get: G, set: S) -> Self
    where
        G: Fn(&R) -> Value + Send + Sync + 'static,
        S: Fn(&mut R, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.members.push(Member {
            name: name.to_string(),
            dbtype,
            id: -1,
            get: Box::new(get),
            set: Box::new(set),
        });
        self
    }

    /// Declare a single-component secondary index.
    pub fn with_index<T, G>(mut self, name: &str, get: G) -> Self
    where
        T: AsValue,
        G: Fn(&R) -> T + Send + Sync + 'static,
    {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            components: vec![Component { dbtype: T::dbtype(), case_insensitive: false }],
            project: Box::new(move |r| IxKey(vec![get(r).into_value()])),
        });
        self
    }

    /// Declare a case-insensitive string index.
    pub fn with_index_ci<G>(mut self, name: &str, get: G) -> Self
    where
        G: Fn(&R) -> String + Send + Sync + 'static,
    {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            components: vec![Component { dbtype: DbType::Str, case_insensitive: true }],
            project: Box::new(move |r| IxKey(vec![Value::Str(get(r))])),
        });
        self
    }

    /// Declare a two-component secondary index.
    pub fn with_index2<T1, T2, G>(mut self, name: &str, get: G) -> Self
    where
        T1: AsValue,
        T2: AsValue,
        G: Fn(&R) -> (T1, T2) + Send + Sync + 'static,
    {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            components: vec![
                Component { dbtype: T1::dbtype(), case_insensitive: false },
                Component { dbtype: T2::dbtype(), case_insensitive: false },
            ],
            project: Box::new(move |r| {
                let (a, b) = get(r);
                IxKey(vec![a.into_value(), b.into_value()])
            }),
        });
        self
    }

    /// Declare a three-component secondary index.
    pub fn with_index3<T1, T2, T3, G>(mut self, name: &str, get: G) -> Self
    where
        T1: AsValue,
        T2: AsValue,
        T3: AsValue,
        G: Fn(&R) -> (T1, T2, T3) + Send + Sync + 'static,
    {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            components: vec![
                Component { dbtype: T1::dbtype(), case_insensitive: false },
                Component { dbtype: T2::dbtype(), case_insensitive: false },
                Component { dbtype: T3::dbtype(), case_insensitive: false },
            ],
            project: Box::new(move |r| {
                let (a, b, c) = get(r);
                IxKey(vec![a.into_value(), b.into_value(), c.into_value()])
            }),
        });
        self
    }

    /// Declare an index from explicit components and projection, for
    /// shapes the typed helpers don't cover (for example mixed
    /// case-insensitive composites).
    pub fn with_index_raw<G>(
        mut self,
        name: &str,
        components: Vec<Component>,
        project: G,
    ) -> Self
    where
        G: Fn(&R) -> IxKey + Send + Sync + 'static,
    {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            components,
            project: Box::new(project),
        });
        self
    }

    // mapping-time validation, run when the database seals.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.key.is_none() {
            return err_at!(MissingPrimaryKey, msg: "table {:?}", self.name);
        }
        for member in self.members.iter() {
            validate_dbtype(&self.name, &member.name, &member.dbtype)?;
            let dup = self
                .members
                .iter()
                .filter(|m| m.name == member.name && m.dbtype == member.dbtype)
                .count();
            if dup > 1 {
                return err_at!(
                    UnsupportedType, msg: "table {:?} duplicate member {:?}",
                    self.name, member.name
                );
            }
        }
        for index in self.indexes.iter() {
            if index.components.is_empty() || index.components.len() > 3 {
                return err_at!(
                    UnsupportedType, msg: "index {:?} must have 1..=3 components",
                    index.name
                );
            }
            let dup = self
                .indexes
                .iter()
                .filter(|x| x.name.eq_ignore_ascii_case(&index.name))
                .count();
            if dup > 1 {
                return err_at!(
                    UnsupportedType, msg: "table {:?} duplicate index {:?}",
                    self.name, index.name
                );
            }
        }
        Ok(())
    }
}

fn validate_dbtype(table: &str, member: &str, dbtype: &DbType) -> Result<()> {
    match dbtype {
        DbType::List(elem) => validate_dbtype(table, member, elem),
        DbType::Dict(key, value) => {
            if !key.is_scalar() {
                return err_at!(
                    UnsupportedType, msg: "table {:?} member {:?} dict key {:?}",
                    table, member, key
                );
            }
            validate_dbtype(table, member, value)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "mapping_test.rs"]
mod mapping_test;

//! Recstore is an embedded, single-process storage engine for strongly
//! typed records. Each logical database is a directory on disk. Each
//! table stores records of one registered entity kind under two files,
//! an index file that is mirrored fully in memory, and a data file that
//! holds record payloads managed by a free-space allocator.
//!
//! Tables are configured through a typed [Mapping], sealed when the
//! [Database] is initialized. Every record kind carries one primary-key
//! member and any number of data members; ordered secondary indexes can
//! be declared over one, two or three derived components.
//!
//! Access is bracketed by per-thread scopes. Read scopes run in
//! parallel, a write scope is exclusive, and nested scopes on the same
//! thread re-enter the outer scope. Index changes are committed to the
//! index file in a single buffered pass when the outermost write scope
//! exits.

use std::{error, fmt, result};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the
/// error location.
pub enum Error {
    Fatal(String, String),
    FailConvert(String, String),
    IOError(String, String),
    DecodeFail(String, String),
    InvalidFile(String, String),
    NotInitialized(String, String),
    AlreadyInitialized(String, String),
    DuplicateTableName(String, String),
    MissingPrimaryKey(String, String),
    DuplicateKey(String, String),
    UnsupportedType(String, String),
    SchemaMismatch(String, String),
    IncompatibleUpgrade(String, String),
    NestedWriteInRead(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, msg) => write!(f, "{} Fatal: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} FailConvert: {}", p, msg),
            IOError(p, msg) => write!(f, "{} IOError: {}", p, msg),
            DecodeFail(p, msg) => write!(f, "{} DecodeFail: {}", p, msg),
            InvalidFile(p, msg) => write!(f, "{} InvalidFile: {}", p, msg),
            NotInitialized(p, msg) => write!(f, "{} NotInitialized: {}", p, msg),
            AlreadyInitialized(p, msg) => {
                write!(f, "{} AlreadyInitialized: {}", p, msg)
            }
            DuplicateTableName(p, msg) => {
                write!(f, "{} DuplicateTableName: {}", p, msg)
            }
            MissingPrimaryKey(p, msg) => {
                write!(f, "{} MissingPrimaryKey: {}", p, msg)
            }
            DuplicateKey(p, msg) => write!(f, "{} DuplicateKey: {}", p, msg),
            UnsupportedType(p, msg) => write!(f, "{} UnsupportedType: {}", p, msg),
            SchemaMismatch(p, msg) => write!(f, "{} SchemaMismatch: {}", p, msg),
            IncompatibleUpgrade(p, msg) => {
                write!(f, "{} IncompatibleUpgrade: {}", p, msg)
            }
            NestedWriteInRead(p, msg) => {
                write!(f, "{} NestedWriteInRead: {}", p, msg)
            }
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self)
    }
}

impl error::Error for Error {}

/// Short form to compose Error values.
///
/// Macro expanded to:
///
/// ```ignore
/// Error::<variant>(<prefix>, <message>)
/// ```
///
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("at {}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("at {}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("at {}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

#[macro_use]
pub mod util;

pub mod codec;
pub mod db;
pub mod fs;
pub mod index;
pub mod mapping;
pub mod rbt;
pub mod scope;
pub mod space;
pub mod table;

pub use crate::codec::{AsValue, Blob, DbType, IntoIxKey, IxKey, Uri, Value};
pub use crate::db::Database;
pub use crate::fs::{FsStorage, Storage, TableInfo};
pub use crate::mapping::{Component, DbKey, Mapping};
pub use crate::table::{IndexQuery, LazyList, Table};

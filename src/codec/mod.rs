//! Module implement the record codec.
//!
//! Records go to disk as a stream of `{member-id, value}` pairs
//! terminated by id `-1`. Every value is prefixed by a one-byte null
//! flag; present values follow with the raw little-endian encoding of
//! their [DbType]. The per-table schema (member ids, names, dbtypes
//! and the key dbtype) lives in the index-file header, hashed so that
//! unchanged schemas are skipped on load and older ones are upgraded
//! in place.

mod schema;
mod value;
mod wire;

pub use schema::{
    merge_schema, Header, MemberDesc, SchemaBlob, SchemaMerge, FORMAT_CURRENT,
    FORMAT_INITIAL, SIGNATURE,
};
pub use value::{AsValue, Blob, DbType, IntoIxKey, IxKey, Uri, Value};
pub use wire::Dec;

pub(crate) use value::{caseless_cmp, read_value, skip_value, write_value};
pub(crate) use wire::{put_i16, put_i32, put_i64, put_i8, put_str};

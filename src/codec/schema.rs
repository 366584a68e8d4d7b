//! Per-table schema: the member list that names, types and numbers
//! every serializable member, hashed into the index-file header.
//!
//! Member identity is `(name, dbtype)`. When the on-disk schema
//! differs from the configured one, matching members keep their
//! on-disk ids, new members get fresh ids strictly above the highest
//! id observed on disk, and on-disk members that are no longer
//! configured stay known so their values remain skippable.

use crc::{Crc, CRC_32_ISO_HDLC};

use std::convert::TryFrom;

use crate::{
    codec::{
        wire::{put_i16, put_i32, put_str, put_u32, Dec},
        DbType,
    },
    Error, Result,
};

/// Leading magic of a current-format index file.
pub const SIGNATURE: i32 = 0x0058_454C;
/// Current index-file format.
pub const FORMAT_CURRENT: i32 = 1;
/// Initial format: no signature prefix, single-referrer secondary
/// index nodes.
pub const FORMAT_INITIAL: i32 = 0;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One serializable member of a record kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberDesc {
    pub id: i16,
    pub name: String,
    pub dbtype: DbType,
}

/// The serialized shape of a table's schema: key dbtype plus the
/// ordered member list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaBlob {
    pub key_dbtype: DbType,
    pub members: Vec<MemberDesc>,
}

impl SchemaBlob {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf: Vec<u8> = vec![];
        self.key_dbtype.encode(&mut buf);
        let n = err_at!(FailConvert, i32::try_from(self.members.len()))?;
        put_i32(&mut buf, n);
        for member in self.members.iter() {
            put_i16(&mut buf, member.id);
            put_str(&mut buf, &member.name);
            member.dbtype.encode(&mut buf);
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<SchemaBlob> {
        let mut dec = Dec::new(buf);
        let key_dbtype = DbType::decode(&mut dec)?;
        let count = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            let id = dec.read_i16()?;
            let name = dec.read_str()?;
            let dbtype = DbType::decode(&mut dec)?;
            members.push(MemberDesc { id, name, dbtype });
        }
        Ok(SchemaBlob { key_dbtype, members })
    }

    pub fn hash(&self) -> Result<u32> {
        Ok(CRC32.checksum(&self.encode()?))
    }
}

/// Outcome of reconciling a configured member list with the on-disk
/// schema.
pub struct SchemaMerge {
    /// Resolved id per configured member, in configuration order.
    pub ids: Vec<i16>,
    /// On-disk members with no configured counterpart; their values
    /// are skipped on decode.
    pub orphans: Vec<MemberDesc>,
}

/// Reconcile `configured` (name, dbtype) pairs against the on-disk
/// blob. The key dbtype must match exactly.
pub fn merge_schema(
    on_disk: &SchemaBlob,
    key_dbtype: &DbType,
    configured: &[(String, DbType)],
) -> Result<SchemaMerge> {
    if &on_disk.key_dbtype != key_dbtype {
        return err_at!(
            SchemaMismatch, msg: "key dbtype on disk {:?}, configured {:?}",
            on_disk.key_dbtype, key_dbtype
        );
    }

    let mut matched = vec![false; on_disk.members.len()];
    let mut ids: Vec<i16> = Vec::with_capacity(configured.len());
    let mut next_id = on_disk
        .members
        .iter()
        .map(|m| m.id)
        .max()
        .map(|id| id + 1)
        .unwrap_or(0);

    for (name, dbtype) in configured.iter() {
        let hit = on_disk
            .members
            .iter()
            .position(|m| &m.name == name && &m.dbtype == dbtype);
        match hit {
            Some(i) => {
                matched[i] = true;
                ids.push(on_disk.members[i].id);
            }
            None => {
                ids.push(next_id);
                next_id += 1;
            }
        }
    }

    let orphans = on_disk
        .members
        .iter()
        .zip(matched.iter())
        .filter(|(_, hit)| !**hit)
        .map(|(m, _)| m.clone())
        .collect();

    Ok(SchemaMerge { ids, orphans })
}

/// Decoded index-file header: format, schema hash, raw schema blob and
/// the properties dictionary.
pub struct Header {
    pub format: i32,
    pub hash: u32,
    pub blob: Vec<u8>,
    pub properties: Vec<(String, String)>,
}

impl Header {
    pub fn encode(
        buf: &mut Vec<u8>,
        blob: &[u8],
        hash: u32,
        properties: &[(String, String)],
    ) -> Result<()> {
        put_i32(buf, SIGNATURE);
        put_i32(buf, FORMAT_CURRENT);
        put_u32(buf, hash);
        put_i32(buf, err_at!(FailConvert, i32::try_from(blob.len()))?);
        buf.extend_from_slice(blob);
        put_i32(buf, err_at!(FailConvert, i32::try_from(properties.len()))?);
        for (key, value) in properties.iter() {
            put_str(buf, key);
            put_str(buf, value);
        }
        Ok(())
    }

    pub fn decode(dec: &mut Dec) -> Result<Header> {
        let first = dec.read_i32()?;
        let (format, hash) = if first == SIGNATURE {
            let format = dec.read_i32()?;
            if format > FORMAT_CURRENT {
                return err_at!(
                    IncompatibleUpgrade, msg: "index format {} is newer than {}",
                    format, FORMAT_CURRENT
                );
            }
            (format, dec.read_u32()?)
        } else {
            (FORMAT_INITIAL, first as u32)
        };

        let n = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
        let blob = dec.read_bytes(n)?.to_vec();

        let count = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
        let mut properties = Vec::with_capacity(count);
        for _ in 0..count {
            let key = dec.read_str()?;
            let value = dec.read_str()?;
            properties.push((key, value));
        }

        Ok(Header { format, hash, blob, properties })
    }
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod schema_test;

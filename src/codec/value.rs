//! Typed values and their on-disk encoding.
//!
//! Every value goes to disk behind a one-byte null flag, `0x01` for
//! null and `0x00` followed by the raw encoding of the member's
//! [DbType]. The raw encodings are little-endian and mirror the
//! datatypes the engine accepts for members and keys.

use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use std::{cmp::Ordering, collections::HashMap, convert::TryFrom, hash::Hash};

use crate::{
    codec::wire::{put_f32, put_f64, put_i16, put_i32, put_i64, put_str, put_u8, Dec},
    Error, Result,
};

// .NET-era ticks: 100ns units counted from 0001-01-01T00:00:00.
const TICKS_AT_EPOCH: i64 = 621_355_968_000_000_000;
const TICKS_PER_SEC: i64 = 10_000_000;
const TICKS_MASK: u64 = (1 << 62) - 1;
const KIND_UTC: u64 = 1;

/// Compact tag identifying the on-disk encoding of a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DbType {
    Bool,
    Byte,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    Str,
    Guid,
    DateTime,
    DateTimeOffset,
    TimeSpan,
    Uri,
    Bytes,
    List(Box<DbType>),
    Dict(Box<DbType>, Box<DbType>),
}

impl DbType {
    fn tag(&self) -> u8 {
        match self {
            DbType::Bool => 1,
            DbType::Byte => 2,
            DbType::Int => 3,
            DbType::Long => 4,
            DbType::Float => 5,
            DbType::Double => 6,
            DbType::Decimal => 7,
            DbType::Str => 8,
            DbType::Guid => 9,
            DbType::DateTime => 10,
            DbType::DateTimeOffset => 11,
            DbType::TimeSpan => 12,
            DbType::Uri => 13,
            DbType::Bytes => 14,
            DbType::List(_) => 15,
            DbType::Dict(_, _) => 16,
        }
    }

    /// Whether values of this type may key a Dict member.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, DbType::Bytes | DbType::List(_) | DbType::Dict(_, _))
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        put_u8(buf, self.tag());
        match self {
            DbType::List(elem) => elem.encode(buf),
            DbType::Dict(key, value) => {
                key.encode(buf);
                value.encode(buf);
            }
            _ => (),
        }
    }

    pub(crate) fn decode(dec: &mut Dec) -> Result<DbType> {
        let dbt = match dec.read_u8()? {
            1 => DbType::Bool,
            2 => DbType::Byte,
            3 => DbType::Int,
            4 => DbType::Long,
            5 => DbType::Float,
            6 => DbType::Double,
            7 => DbType::Decimal,
            8 => DbType::Str,
            9 => DbType::Guid,
            10 => DbType::DateTime,
            11 => DbType::DateTimeOffset,
            12 => DbType::TimeSpan,
            13 => DbType::Uri,
            14 => DbType::Bytes,
            15 => DbType::List(Box::new(DbType::decode(dec)?)),
            16 => {
                let key = Box::new(DbType::decode(dec)?);
                let value = Box::new(DbType::decode(dec)?);
                DbType::Dict(key, value)
            }
            tag => return err_at!(DecodeFail, msg: "unknown dbtype tag {}", tag),
        };
        Ok(dbt)
    }
}

/// A member value in wire-ready form.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Str(String),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeSpan(Duration),
    Uri(Uri),
    Bytes(Blob),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Byte(_) => 2,
            Value::Int(_) => 3,
            Value::Long(_) => 4,
            Value::Float(_) => 5,
            Value::Double(_) => 6,
            Value::Decimal(_) => 7,
            Value::Str(_) => 8,
            Value::Guid(_) => 9,
            Value::DateTime(_) => 10,
            Value::DateTimeOffset(_) => 11,
            Value::TimeSpan(_) => 12,
            Value::Uri(_) => 13,
            Value::Bytes(_) => 14,
            Value::List(_) => 15,
            Value::Dict(_) => 16,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Value) -> Ordering {
        use Value::*;

        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Byte(a), Byte(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Guid(a), Guid(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (DateTimeOffset(a), DateTimeOffset(b)) => a.cmp(b),
            (TimeSpan(a), TimeSpan(b)) => a.cmp(b),
            (Uri(a), Uri(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Dict(a), Dict(b)) => a.cmp(b),
            // null orders before any present value; distinct types by
            // their tag rank. Well-formed indexes never mix types.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

/// Uri member value: the raw string plus whether it parses as an
/// absolute URI.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uri {
    pub uri: String,
    pub absolute: bool,
}

impl Uri {
    pub fn parse(uri: &str) -> Uri {
        Uri {
            uri: uri.to_string(),
            absolute: url::Url::parse(uri).is_ok(),
        }
    }
}

/// Byte-array member value, encoded with an i32 length prefix rather
/// than as a list of bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Blob(pub Vec<u8>);

/// Derived key of a secondary index, one [Value] per component.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct IxKey(pub Vec<Value>);

/// Conversion into a derived-key for index queries. Implemented for
/// the scalar member types and for 1/2/3-component tuples of them.
pub trait IntoIxKey {
    fn into_ixkey(self) -> IxKey;
}

macro_rules! into_ixkey_scalar {
    ($($t:ty,)*) => ($(
        impl IntoIxKey for $t {
            fn into_ixkey(self) -> IxKey {
                IxKey(vec![self.into_value()])
            }
        }

        impl IntoIxKey for ($t,) {
            fn into_ixkey(self) -> IxKey {
                IxKey(vec![self.0.into_value()])
            }
        }
    )*)
}

into_ixkey_scalar! {
    bool, u8, i32, i64, f32, f64, Decimal, String, Uuid,
    DateTime<Utc>, DateTime<FixedOffset>, Duration, Uri, Blob,
}

impl IntoIxKey for &str {
    fn into_ixkey(self) -> IxKey {
        IxKey(vec![Value::Str(self.to_string())])
    }
}

impl<T1, T2> IntoIxKey for (T1, T2)
where
    T1: AsValue,
    T2: AsValue,
{
    fn into_ixkey(self) -> IxKey {
        IxKey(vec![self.0.into_value(), self.1.into_value()])
    }
}

impl<T1, T2, T3> IntoIxKey for (T1, T2, T3)
where
    T1: AsValue,
    T2: AsValue,
    T3: AsValue,
{
    fn into_ixkey(self) -> IxKey {
        IxKey(vec![
            self.0.into_value(),
            self.1.into_value(),
            self.2.into_value(),
        ])
    }
}

/// Ordinal-caseless ordering for strings, used by case-insensitive
/// index components.
pub(crate) fn caseless_cmp(a: &str, b: &str) -> Ordering {
    let a = a.chars().flat_map(char::to_lowercase);
    let b = b.chars().flat_map(char::to_lowercase);
    a.cmp(b)
}

pub(crate) fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => {
            put_u8(buf, 1);
            return Ok(());
        }
        _ => put_u8(buf, 0),
    }

    match value {
        Value::Null => (),
        Value::Bool(v) => put_u8(buf, if *v { 1 } else { 0 }),
        Value::Byte(v) => put_u8(buf, *v),
        Value::Int(v) => put_i32(buf, *v),
        Value::Long(v) => put_i64(buf, *v),
        Value::Float(v) => put_f32(buf, *v),
        Value::Double(v) => put_f64(buf, *v),
        Value::Decimal(v) => {
            let mantissa = v.mantissa();
            let m = mantissa.unsigned_abs();
            let flags: u32 =
                (v.scale() << 16) | if mantissa < 0 { 0x8000_0000 } else { 0 };
            put_i32(buf, m as u32 as i32);
            put_i32(buf, (m >> 32) as u32 as i32);
            put_i32(buf, (m >> 64) as u32 as i32);
            put_i32(buf, flags as i32);
        }
        Value::Str(v) => put_str(buf, v),
        Value::Guid(v) => buf.extend_from_slice(v.as_bytes()),
        Value::DateTime(v) => {
            let ticks = ticks_of_utc(v)? as u64;
            put_i64(buf, (ticks | (KIND_UTC << 62)) as i64);
        }
        Value::DateTimeOffset(v) => {
            let naive = v.naive_local();
            put_i64(buf, ticks_of_naive(&naive)?);
            let minutes = v.offset().local_minus_utc() / 60;
            put_i16(buf, err_at!(FailConvert, i16::try_from(minutes))?);
        }
        Value::TimeSpan(v) => put_i64(buf, ticks_of_duration(v)?),
        Value::Uri(v) => {
            put_str(buf, &v.uri);
            put_u8(buf, if v.absolute { 1 } else { 0 });
        }
        Value::Bytes(v) => {
            let n = err_at!(FailConvert, i32::try_from(v.0.len()))?;
            put_i32(buf, n);
            buf.extend_from_slice(&v.0);
        }
        Value::List(items) => {
            let n = err_at!(FailConvert, i32::try_from(items.len()))?;
            put_i32(buf, n);
            for item in items.iter() {
                write_value(buf, item)?;
            }
        }
        Value::Dict(pairs) => {
            let n = err_at!(FailConvert, i32::try_from(pairs.len()))?;
            put_i32(buf, n);
            for (key, val) in pairs.iter() {
                write_value(buf, key)?;
                write_value(buf, val)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn read_value(dec: &mut Dec, dbt: &DbType) -> Result<Value> {
    if dec.read_u8()? == 1 {
        return Ok(Value::Null);
    }

    let value = match dbt {
        DbType::Bool => Value::Bool(dec.read_u8()? != 0),
        DbType::Byte => Value::Byte(dec.read_u8()?),
        DbType::Int => Value::Int(dec.read_i32()?),
        DbType::Long => Value::Long(dec.read_i64()?),
        DbType::Float => Value::Float(dec.read_f32()?),
        DbType::Double => Value::Double(dec.read_f64()?),
        DbType::Decimal => {
            let lo = dec.read_i32()? as u32;
            let mid = dec.read_i32()? as u32;
            let hi = dec.read_i32()? as u32;
            let flags = dec.read_i32()? as u32;
            let scale = (flags >> 16) & 0xff;
            let negative = flags & 0x8000_0000 != 0;
            Value::Decimal(Decimal::from_parts(lo, mid, hi, negative, scale))
        }
        DbType::Str => Value::Str(dec.read_str()?),
        DbType::Guid => {
            let mut raw = [0_u8; 16];
            raw.copy_from_slice(dec.read_bytes(16)?);
            Value::Guid(Uuid::from_bytes(raw))
        }
        DbType::DateTime => {
            let ticks = ((dec.read_i64()? as u64) & TICKS_MASK) as i64;
            Value::DateTime(utc_of_ticks(ticks)?)
        }
        DbType::DateTimeOffset => {
            let ticks = dec.read_i64()?;
            let minutes = dec.read_i16()? as i32;
            let naive = naive_of_ticks(ticks)?;
            let offset = match FixedOffset::east_opt(minutes * 60) {
                Some(offset) => offset,
                None => return err_at!(DecodeFail, msg: "bad utc-offset {}", minutes),
            };
            match offset.from_local_datetime(&naive) {
                LocalResult::Single(dt) => Value::DateTimeOffset(dt),
                _ => return err_at!(DecodeFail, msg: "bad local datetime"),
            }
        }
        DbType::TimeSpan => Value::TimeSpan(duration_of_ticks(dec.read_i64()?)),
        DbType::Uri => {
            let uri = dec.read_str()?;
            let absolute = dec.read_u8()? != 0;
            Value::Uri(Uri { uri, absolute })
        }
        DbType::Bytes => {
            let n = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
            Value::Bytes(Blob(dec.read_bytes(n)?.to_vec()))
        }
        DbType::List(elem) => {
            let n = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(read_value(dec, elem)?);
            }
            Value::List(items)
        }
        DbType::Dict(kt, vt) => {
            let n = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
            let mut pairs = Vec::with_capacity(n);
            for _ in 0..n {
                let key = read_value(dec, kt)?;
                let val = read_value(dec, vt)?;
                pairs.push((key, val));
            }
            Value::Dict(pairs)
        }
    };
    Ok(value)
}

// advance past one value of `dbt` without materializing it. This is
// what keeps unknown member-ids skippable.
pub(crate) fn skip_value(dec: &mut Dec, dbt: &DbType) -> Result<()> {
    if dec.read_u8()? == 1 {
        return Ok(());
    }

    match dbt {
        DbType::Bool | DbType::Byte => {
            dec.read_bytes(1)?;
        }
        DbType::Int | DbType::Float => {
            dec.read_bytes(4)?;
        }
        DbType::Long | DbType::Double | DbType::DateTime | DbType::TimeSpan => {
            dec.read_bytes(8)?;
        }
        DbType::DateTimeOffset => {
            dec.read_bytes(10)?;
        }
        DbType::Decimal | DbType::Guid => {
            dec.read_bytes(16)?;
        }
        DbType::Str => {
            let n = err_at!(FailConvert, usize::try_from(dec.read_uvarint()?))?;
            dec.read_bytes(n)?;
        }
        DbType::Uri => {
            let n = err_at!(FailConvert, usize::try_from(dec.read_uvarint()?))?;
            dec.read_bytes(n)?;
            dec.read_bytes(1)?;
        }
        DbType::Bytes => {
            let n = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
            dec.read_bytes(n)?;
        }
        DbType::List(elem) => {
            let n = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
            for _ in 0..n {
                skip_value(dec, elem)?;
            }
        }
        DbType::Dict(kt, vt) => {
            let n = err_at!(FailConvert, usize::try_from(dec.read_i32()?))?;
            for _ in 0..n {
                skip_value(dec, kt)?;
                skip_value(dec, vt)?;
            }
        }
    }
    Ok(())
}

fn ticks_of_utc(dt: &DateTime<Utc>) -> Result<i64> {
    let secs = dt.timestamp();
    let sub = (dt.timestamp_subsec_nanos() as i64) / 100;
    match secs
        .checked_mul(TICKS_PER_SEC)
        .and_then(|t| t.checked_add(sub))
        .and_then(|t| t.checked_add(TICKS_AT_EPOCH))
    {
        Some(ticks) if ticks >= 0 => Ok(ticks),
        _ => err_at!(FailConvert, msg: "datetime out of tick range"),
    }
}

fn ticks_of_naive(dt: &NaiveDateTime) -> Result<i64> {
    let secs = dt.timestamp();
    let sub = (dt.timestamp_subsec_nanos() as i64) / 100;
    match secs
        .checked_mul(TICKS_PER_SEC)
        .and_then(|t| t.checked_add(sub))
        .and_then(|t| t.checked_add(TICKS_AT_EPOCH))
    {
        Some(ticks) if ticks >= 0 => Ok(ticks),
        _ => err_at!(FailConvert, msg: "datetime out of tick range"),
    }
}

fn utc_of_ticks(ticks: i64) -> Result<DateTime<Utc>> {
    let t = ticks - TICKS_AT_EPOCH;
    let secs = t.div_euclid(TICKS_PER_SEC);
    let nanos = (t.rem_euclid(TICKS_PER_SEC) * 100) as u32;
    match Utc.timestamp_opt(secs, nanos) {
        LocalResult::Single(dt) => Ok(dt),
        _ => err_at!(DecodeFail, msg: "ticks out of range {}", ticks),
    }
}

fn naive_of_ticks(ticks: i64) -> Result<NaiveDateTime> {
    let t = ticks - TICKS_AT_EPOCH;
    let secs = t.div_euclid(TICKS_PER_SEC);
    let nanos = (t.rem_euclid(TICKS_PER_SEC) * 100) as u32;
    match NaiveDateTime::from_timestamp_opt(secs, nanos) {
        Some(dt) => Ok(dt),
        None => err_at!(DecodeFail, msg: "ticks out of range {}", ticks),
    }
}

fn ticks_of_duration(d: &Duration) -> Result<i64> {
    let secs = d.num_seconds();
    let rem = *d - Duration::seconds(secs);
    let sub = rem.num_nanoseconds().unwrap_or(0) / 100;
    match secs.checked_mul(TICKS_PER_SEC).and_then(|t| t.checked_add(sub)) {
        Some(ticks) => Ok(ticks),
        None => err_at!(FailConvert, msg: "timespan out of tick range"),
    }
}

fn duration_of_ticks(ticks: i64) -> Duration {
    let secs = ticks.div_euclid(TICKS_PER_SEC);
    let nanos = ticks.rem_euclid(TICKS_PER_SEC) * 100;
    Duration::seconds(secs) + Duration::nanoseconds(nanos)
}

fn unix_epoch() -> DateTime<Utc> {
    match Utc.timestamp_opt(0, 0) {
        LocalResult::Single(dt) => dt,
        _ => unreachable!(),
    }
}

/// Conversion between member types and wire-ready [Value]s.
///
/// A null on the wire converts back to the type's default for plain
/// members and to `None` for `Option` members.
pub trait AsValue: Sized {
    fn dbtype() -> DbType;
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! type_mismatch {
    ($t:expr, $v:expr) => {
        err_at!(DecodeFail, msg: "value {:?} does not fit member type {:?}", $v, $t)
    };
}

impl AsValue for bool {
    fn dbtype() -> DbType {
        DbType::Bool
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Null => Ok(false),
            v => type_mismatch!(DbType::Bool, v),
        }
    }
}

impl AsValue for u8 {
    fn dbtype() -> DbType {
        DbType::Byte
    }

    fn into_value(self) -> Value {
        Value::Byte(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Byte(v) => Ok(v),
            Value::Null => Ok(0),
            v => type_mismatch!(DbType::Byte, v),
        }
    }
}

impl AsValue for i32 {
    fn dbtype() -> DbType {
        DbType::Int
    }

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Null => Ok(0),
            v => type_mismatch!(DbType::Int, v),
        }
    }
}

impl AsValue for i64 {
    fn dbtype() -> DbType {
        DbType::Long
    }

    fn into_value(self) -> Value {
        Value::Long(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Long(v) => Ok(v),
            Value::Null => Ok(0),
            v => type_mismatch!(DbType::Long, v),
        }
    }
}

impl AsValue for f32 {
    fn dbtype() -> DbType {
        DbType::Float
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Null => Ok(0.0),
            v => type_mismatch!(DbType::Float, v),
        }
    }
}

impl AsValue for f64 {
    fn dbtype() -> DbType {
        DbType::Double
    }

    fn into_value(self) -> Value {
        Value::Double(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Double(v) => Ok(v),
            Value::Null => Ok(0.0),
            v => type_mismatch!(DbType::Double, v),
        }
    }
}

impl AsValue for Decimal {
    fn dbtype() -> DbType {
        DbType::Decimal
    }

    fn into_value(self) -> Value {
        Value::Decimal(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Decimal(v) => Ok(v),
            Value::Null => Ok(Decimal::ZERO),
            v => type_mismatch!(DbType::Decimal, v),
        }
    }
}

impl AsValue for String {
    fn dbtype() -> DbType {
        DbType::Str
    }

    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(v) => Ok(v),
            Value::Null => Ok(String::new()),
            v => type_mismatch!(DbType::Str, v),
        }
    }
}

impl AsValue for Uuid {
    fn dbtype() -> DbType {
        DbType::Guid
    }

    fn into_value(self) -> Value {
        Value::Guid(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Guid(v) => Ok(v),
            Value::Null => Ok(Uuid::nil()),
            v => type_mismatch!(DbType::Guid, v),
        }
    }
}

impl AsValue for DateTime<Utc> {
    fn dbtype() -> DbType {
        DbType::DateTime
    }

    fn into_value(self) -> Value {
        Value::DateTime(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::DateTime(v) => Ok(v),
            Value::Null => Ok(unix_epoch()),
            v => type_mismatch!(DbType::DateTime, v),
        }
    }
}

impl AsValue for DateTime<FixedOffset> {
    fn dbtype() -> DbType {
        DbType::DateTimeOffset
    }

    fn into_value(self) -> Value {
        Value::DateTimeOffset(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::DateTimeOffset(v) => Ok(v),
            Value::Null => Ok(unix_epoch().into()),
            v => type_mismatch!(DbType::DateTimeOffset, v),
        }
    }
}

impl AsValue for Duration {
    fn dbtype() -> DbType {
        DbType::TimeSpan
    }

    fn into_value(self) -> Value {
        Value::TimeSpan(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::TimeSpan(v) => Ok(v),
            Value::Null => Ok(Duration::zero()),
            v => type_mismatch!(DbType::TimeSpan, v),
        }
    }
}

impl AsValue for Uri {
    fn dbtype() -> DbType {
        DbType::Uri
    }

    fn into_value(self) -> Value {
        Value::Uri(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uri(v) => Ok(v),
            Value::Null => Ok(Uri::default()),
            v => type_mismatch!(DbType::Uri, v),
        }
    }
}

impl AsValue for Blob {
    fn dbtype() -> DbType {
        DbType::Bytes
    }

    fn into_value(self) -> Value {
        Value::Bytes(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Null => Ok(Blob::default()),
            v => type_mismatch!(DbType::Bytes, v),
        }
    }
}

impl<T> AsValue for Vec<T>
where
    T: AsValue,
{
    fn dbtype() -> DbType {
        DbType::List(Box::new(T::dbtype()))
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(AsValue::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            Value::Null => Ok(Vec::new()),
            v => type_mismatch!(Self::dbtype(), v),
        }
    }
}

impl<K, V> AsValue for HashMap<K, V>
where
    K: AsValue + Eq + Hash,
    V: AsValue,
{
    fn dbtype() -> DbType {
        DbType::Dict(Box::new(K::dbtype()), Box::new(V::dbtype()))
    }

    fn into_value(self) -> Value {
        let mut pairs: Vec<(Value, Value)> = self
            .into_iter()
            .map(|(k, v)| (k.into_value(), v.into_value()))
            .collect();
        // deterministic pair order on disk.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Dict(pairs)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Dict(pairs) => {
                let mut map = HashMap::with_capacity(pairs.len());
                for (k, v) in pairs.into_iter() {
                    map.insert(K::from_value(k)?, V::from_value(v)?);
                }
                Ok(map)
            }
            Value::Null => Ok(HashMap::new()),
            v => type_mismatch!(Self::dbtype(), v),
        }
    }
}

impl<T> AsValue for Option<T>
where
    T: AsValue,
{
    fn dbtype() -> DbType {
        T::dbtype()
    }

    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            v => Ok(Some(T::from_value(v)?)),
        }
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;

use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};
use rust_decimal::Decimal;

use std::collections::HashMap;

use super::*;

fn roundtrip(value: &Value, dbt: &DbType) -> Value {
    let mut buf: Vec<u8> = vec![];
    write_value(&mut buf, value).unwrap();
    let mut dec = Dec::new(&buf);
    let out = read_value(&mut dec, dbt).unwrap();
    assert_eq!(dec.remaining(), 0, "{:?} leftover bytes", dbt);

    // skipping must consume exactly the same bytes.
    let mut dec = Dec::new(&buf);
    skip_value(&mut dec, dbt).unwrap();
    assert_eq!(dec.remaining(), 0, "{:?} bad skip", dbt);

    out
}

fn sample_values() -> Vec<(Value, DbType)> {
    let utc = Utc.timestamp_opt(1_600_000_000, 123_456_700).unwrap();
    let off = FixedOffset::east_opt(5 * 3600 + 1800)
        .unwrap()
        .timestamp_opt(1_600_000_000, 0)
        .unwrap();
    vec![
        (Value::Bool(true), DbType::Bool),
        (Value::Bool(false), DbType::Bool),
        (Value::Byte(0xfe), DbType::Byte),
        (Value::Int(-123456), DbType::Int),
        (Value::Long(i64::MIN / 2), DbType::Long),
        (Value::Float(3.25), DbType::Float),
        (Value::Double(-0.000123), DbType::Double),
        (
            Value::Decimal(Decimal::from_parts(1, 2, 3, true, 14)),
            DbType::Decimal,
        ),
        (Value::Str("héllo".to_string()), DbType::Str),
        (Value::Str(String::new()), DbType::Str),
        (Value::Guid(Uuid::new_v4()), DbType::Guid),
        (Value::DateTime(utc), DbType::DateTime),
        (Value::DateTimeOffset(off), DbType::DateTimeOffset),
        (
            Value::TimeSpan(Duration::seconds(86_400) + Duration::nanoseconds(700)),
            DbType::TimeSpan,
        ),
        (Value::Uri(Uri::parse("https://example.com/a?b=c")), DbType::Uri),
        (Value::Uri(Uri::parse("relative/path")), DbType::Uri),
        (Value::Bytes(Blob(vec![0, 1, 2, 254, 255])), DbType::Bytes),
        (
            Value::List(vec![Value::Int(1), Value::Null, Value::Int(3)]),
            DbType::List(Box::new(DbType::Int)),
        ),
        (
            Value::Dict(vec![
                (Value::Str("a".to_string()), Value::Long(1)),
                (Value::Str("b".to_string()), Value::Null),
            ]),
            DbType::Dict(Box::new(DbType::Str), Box::new(DbType::Long)),
        ),
    ]
}

#[test]
fn test_value_roundtrip() {
    for (value, dbt) in sample_values().into_iter() {
        let out = roundtrip(&value, &dbt);
        assert_eq!(out, value, "{:?}", dbt);
    }
}

#[test]
fn test_value_null_roundtrip() {
    for (_, dbt) in sample_values().into_iter() {
        let out = roundtrip(&Value::Null, &dbt);
        assert_eq!(out, Value::Null, "{:?}", dbt);
    }
    // null encodes as the single flag byte.
    let mut buf: Vec<u8> = vec![];
    write_value(&mut buf, &Value::Null).unwrap();
    assert_eq!(buf, vec![1]);
}

#[test]
fn test_value_decimal_parts() {
    let values = vec![
        Decimal::ZERO,
        Decimal::new(12345, 4),
        Decimal::new(-999_999_999_999, 0),
        Decimal::MAX,
        Decimal::MIN,
    ];
    for d in values.into_iter() {
        let out = roundtrip(&Value::Decimal(d), &DbType::Decimal);
        assert_eq!(out, Value::Decimal(d));
    }
}

#[test]
fn test_value_datetime_ticks() {
    // the utc kind is stamped into the top bits.
    let utc = Utc.timestamp_opt(0, 0).unwrap();
    let mut buf: Vec<u8> = vec![];
    write_value(&mut buf, &Value::DateTime(utc)).unwrap();
    let mut raw = [0_u8; 8];
    raw.copy_from_slice(&buf[1..9]);
    let encoded = i64::from_le_bytes(raw) as u64;
    assert_eq!(encoded >> 62, 1, "kind bits");
    assert_eq!((encoded & ((1 << 62) - 1)) as i64, 621_355_968_000_000_000);
}

#[test]
fn test_value_dbtype_encoding() {
    let dbts = vec![
        DbType::Bool,
        DbType::Guid,
        DbType::List(Box::new(DbType::Str)),
        DbType::Dict(Box::new(DbType::Int), Box::new(DbType::List(Box::new(DbType::Byte)))),
    ];
    for dbt in dbts.into_iter() {
        let mut buf: Vec<u8> = vec![];
        dbt.encode(&mut buf);
        let mut dec = Dec::new(&buf);
        assert_eq!(DbType::decode(&mut dec).unwrap(), dbt);
        assert_eq!(dec.remaining(), 0);
    }
}

#[test]
fn test_value_ordering() {
    // null sorts first.
    assert!(Value::Null < Value::Int(i32::MIN));
    assert!(Value::Int(1) < Value::Int(2));
    assert!(Value::Str("a".to_string()) < Value::Str("b".to_string()));
    // case-sensitive by default.
    assert!(Value::Str("B".to_string()) < Value::Str("a".to_string()));
    // floats order totally, including nan.
    assert!(Value::Float(f32::NEG_INFINITY) < Value::Float(0.0));
    assert!(Value::Float(f32::INFINITY) < Value::Float(f32::NAN));
}

#[test]
fn test_value_caseless_cmp() {
    use std::cmp::Ordering;

    assert_eq!(caseless_cmp("Test5", "tEST5"), Ordering::Equal);
    assert_eq!(caseless_cmp("apple", "Banana"), Ordering::Less);
    assert_eq!(caseless_cmp("ÜBER", "über"), Ordering::Equal);
    assert_ne!(caseless_cmp("a", "b"), Ordering::Equal);
}

#[test]
fn test_asvalue_defaults_from_null() {
    assert_eq!(i32::from_value(Value::Null).unwrap(), 0);
    assert_eq!(String::from_value(Value::Null).unwrap(), "");
    assert_eq!(Uuid::from_value(Value::Null).unwrap(), Uuid::nil());
    assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
    assert_eq!(Vec::<i64>::from_value(Value::Null).unwrap(), Vec::<i64>::new());
    // present values round through option.
    assert_eq!(Option::<i32>::from_value(Value::Int(7)).unwrap(), Some(7));
    // mismatched types are decode failures.
    assert!(i32::from_value(Value::Long(1)).is_err());
}

#[test]
fn test_asvalue_collections() {
    let mut map: HashMap<String, i32> = HashMap::new();
    map.insert("x".to_string(), 1);
    map.insert("y".to_string(), 2);

    let value = map.clone().into_value();
    match &value {
        Value::Dict(pairs) => {
            // pair order is deterministic.
            assert_eq!(pairs[0].0, Value::Str("x".to_string()));
            assert_eq!(pairs[1].0, Value::Str("y".to_string()));
        }
        v => panic!("unexpected value {:?}", v),
    }
    let out = HashMap::<String, i32>::from_value(value).unwrap();
    assert_eq!(out, map);

    let list = vec![Some(1_i64), None, Some(3)];
    let out = Vec::<Option<i64>>::from_value(list.clone().into_value()).unwrap();
    assert_eq!(out, list);
}

#[test]
fn test_value_arbitrary_blobs() {
    use arbitrary::{Arbitrary, Unstructured};

    let seed: u64 = random();
    println!("test_value_arbitrary_blobs {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for _i in 0..200 {
        let raw: Vec<u8> = (0..rng.gen_range(1..256)).map(|_| rng.gen()).collect();
        let mut uns = Unstructured::new(&raw);
        let bytes: Vec<u8> = Vec::<u8>::arbitrary(&mut uns).unwrap();
        let out = roundtrip(&Value::Bytes(Blob(bytes.clone())), &DbType::Bytes);
        assert_eq!(out, Value::Bytes(Blob(bytes)));
    }
}

#[test]
fn test_value_random_strings() {
    let seed: u64 = random();
    println!("test_value_random_strings {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for _i in 0..1_000 {
        let n = rng.gen_range(0..300);
        let s: String = (0..n).map(|_| rng.gen::<char>()).collect();
        let out = roundtrip(&Value::Str(s.clone()), &DbType::Str);
        assert_eq!(out, Value::Str(s));
    }
}

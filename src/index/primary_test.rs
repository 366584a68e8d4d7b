use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::collections::BTreeMap;

use crate::fs::{TableInfo, TableReader, TableWriter};

use super::*;

// in-memory stand-in for the storage writer, enough for compaction.
#[derive(Default)]
struct MemWriter {
    data: Vec<u8>,
    side: Vec<u8>,
}

impl MemWriter {
    fn put(&mut self, data: &[u8], offset: u64) {
        let end = offset as usize + data.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(data);
    }
}

impl TableReader for MemWriter {
    fn ts(&mut self) -> Result<Option<std::time::SystemTime>> {
        Ok(None)
    }

    fn read_index(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn read_data(&mut self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let end = offset as usize + length as usize;
        Ok(self.side[offset as usize..end].to_vec())
    }

    fn info(&mut self) -> Result<TableInfo> {
        Ok(TableInfo::default())
    }
}

impl TableWriter for MemWriter {
    fn write_index(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        self.put(data, offset);
        Ok(())
    }

    fn copy_data(&mut self, src: u64, dst: u64, length: u32) -> Result<()> {
        let chunk = self.data[src as usize..src as usize + length as usize].to_vec();
        let end = dst as usize + chunk.len();
        if self.side.len() < end {
            self.side.resize(end, 0);
        }
        self.side[dst as usize..end].copy_from_slice(&chunk);
        Ok(())
    }

    fn crop_data(&mut self, size: u64) -> Result<()> {
        self.side.truncate(size as usize);
        Ok(())
    }

    fn commit_data(&mut self) -> Result<()> {
        Ok(())
    }

    fn purge(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_reader(&mut self) -> &mut dyn TableReader {
        self
    }
}

#[test]
fn test_primary_update_realloc() {
    let mut pk: PrimaryIndex<i32> = PrimaryIndex::new(0);

    let (id, inserted) = pk.update(1, 10).unwrap();
    assert!(inserted);
    let (offset, length) = {
        let slot = &pk.node(id).payload;
        (slot.offset, slot.length)
    };
    assert_eq!((offset, length), (0, 10));

    // same length: nothing moves.
    let (id2, inserted) = pk.update(1, 10).unwrap();
    assert!(!inserted);
    assert_eq!(id2, id);
    assert_eq!(pk.node(id).payload.offset, 0);

    // grown: the old range is freed and a fresh one allocated.
    let (_, _) = pk.update(2, 5).unwrap();
    let (id3, inserted) = pk.update(1, 30).unwrap();
    assert!(!inserted);
    assert_eq!(id3, id);
    let slot = &pk.node(id).payload;
    assert_eq!(slot.length, 30);
    assert_eq!(slot.offset, 15);
    pk.validate().unwrap();
}

#[test]
fn test_primary_remove() {
    let mut pk: PrimaryIndex<i32> = PrimaryIndex::new(0);
    for key in 0..10 {
        pk.update(key, 8).unwrap();
    }
    assert_eq!(pk.len(), 10);
    assert_eq!(pk.data_map().max(), 80);

    let id = pk.find(&4).unwrap();
    let (key, slot) = pk.remove(id).unwrap();
    assert_eq!(key, 4);
    assert_eq!(slot.offset, 32);
    assert_eq!(pk.len(), 9);
    assert_eq!(pk.find(&4), None);
    pk.validate().unwrap();

    // the freed range is reused by the next same-size update.
    let (id, _) = pk.update(100, 8).unwrap();
    assert_eq!(pk.node(id).payload.offset, 32);
    pk.validate().unwrap();
}

#[test]
fn test_primary_key_list_min_max() {
    let mut pk: PrimaryIndex<i64> = PrimaryIndex::new(0);
    assert_eq!(pk.min_key(), None);
    assert_eq!(pk.max_key(), None);

    for key in [5_i64, 3, 9, 1, 7].iter() {
        pk.update(*key, 4).unwrap();
    }
    assert_eq!(pk.min_key(), Some(1));
    assert_eq!(pk.max_key(), Some(9));
    assert_eq!(pk.make_key_list(), vec![1, 3, 5, 7, 9]);
}

#[test]
fn test_primary_serialize_load() {
    let seed: u64 = random();
    println!("test_primary_serialize_load {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut pk: PrimaryIndex<i64> = PrimaryIndex::new(2);
    let mut refmap: BTreeMap<i64, u32> = BTreeMap::new();
    for _i in 0..2_000 {
        let key: i64 = rng.gen_range(0..5_000);
        let length: u32 = rng.gen_range(1..64);
        if refmap.contains_key(&key) {
            continue;
        }
        pk.update(key, length).unwrap();
        refmap.insert(key, length);
    }
    for _i in 0..500 {
        let key: i64 = rng.gen_range(0..5_000);
        if let Some(id) = pk.find(&key) {
            pk.remove(id).unwrap();
            refmap.remove(&key);
        }
    }

    let mut buf: Vec<u8> = vec![];
    pk.serialize(&mut buf).unwrap();

    let mut dec = Dec::new(&buf);
    let loaded: PrimaryIndex<i64> = PrimaryIndex::load(&mut dec, 2).unwrap();
    assert_eq!(dec.remaining(), 0);
    loaded.validate().unwrap();

    assert_eq!(loaded.len(), pk.len());
    assert_eq!(loaded.make_key_list(), pk.make_key_list());
    for (key, length) in refmap.iter() {
        let a = pk.find(key).unwrap();
        let b = loaded.find(key).unwrap();
        assert_eq!(pk.node(a).payload.offset, loaded.node(b).payload.offset);
        assert_eq!(loaded.node(b).payload.length, *length);
    }
    assert_eq!(loaded.data_map().as_allocs(), pk.data_map().as_allocs());

    // the stored shape survives byte-for-byte.
    let mut buf2: Vec<u8> = vec![];
    loaded.serialize(&mut buf2).unwrap();
    assert_eq!(buf2, buf);
}

#[test]
fn test_primary_compact() {
    let seed: u64 = random();
    println!("test_primary_compact {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut pk: PrimaryIndex<i32> = PrimaryIndex::new(0);
    let mut wr = MemWriter::default();
    let mut payloads: BTreeMap<i32, Vec<u8>> = BTreeMap::new();

    for key in 0..200 {
        let n = rng.gen_range(1..40);
        let data: Vec<u8> = (0..n).map(|_| rng.gen()).collect();
        let (id, _) = pk.update(key, data.len() as u32).unwrap();
        let offset = pk.node(id).payload.offset;
        wr.put(&data, offset);
        payloads.insert(key, data);
    }
    // delete every other record, leaving holes.
    for key in (0..200).step_by(2) {
        let id = pk.find(&key).unwrap();
        pk.remove(id).unwrap();
        payloads.remove(&key);
    }
    let live_total: u64 = payloads.values().map(|d| d.len() as u64).sum();
    assert!(pk.data_map().max() > live_total);

    pk.compact(&mut wr).unwrap();
    pk.validate().unwrap();
    assert_eq!(pk.data_map().max(), live_total);
    assert_eq!(pk.data_map().len(), 1);

    // payloads sit at their rewritten offsets, tightly packed in key
    // order.
    let mut expect_offset = 0_u64;
    for (key, data) in payloads.iter() {
        let id = pk.find(key).unwrap();
        let slot = &pk.node(id).payload;
        assert_eq!(slot.offset, expect_offset, "key {}", key);
        let out = wr.read_data(slot.offset, slot.length).unwrap();
        assert_eq!(&out, data, "key {}", key);
        expect_offset += data.len() as u64;
    }
}

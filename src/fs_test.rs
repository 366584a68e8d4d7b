use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

fn scratch_dir(name: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!("recstore-{}-{:x}", name, random::<u64>()));
    dir
}

#[test]
fn test_fs_read_write_cycle() {
    let dir = scratch_dir("fs-cycle");
    let storage = FsStorage::new(&dir);
    storage.open().unwrap();
    let table = storage.table("items").unwrap();

    // fresh table: nothing on disk yet.
    {
        let mut rd = table.begin_read().unwrap();
        assert_eq!(rd.ts().unwrap(), None);
        assert_eq!(rd.read_index().unwrap(), None);
        assert_eq!(rd.info().unwrap(), TableInfo::default());
    }

    {
        let mut wr = table.begin_write().unwrap();
        wr.write_data(b"payload-a", 0).unwrap();
        wr.write_data(b"payload-b", 9).unwrap();
        wr.commit_data().unwrap();
        wr.write_index(b"index-image").unwrap();
        wr.close().unwrap();
    }

    {
        let mut rd = table.begin_read().unwrap();
        assert!(rd.ts().unwrap().is_some());
        assert_eq!(rd.read_index().unwrap().unwrap(), b"index-image");
        assert_eq!(rd.read_data(0, 9).unwrap(), b"payload-a");
        assert_eq!(rd.read_data(9, 9).unwrap(), b"payload-b");
        let info = rd.info().unwrap();
        assert_eq!(info.data_size, 18);
        assert_eq!(info.index_size, 11);
    }

    // a shorter index image truncates the file.
    {
        let mut wr = table.begin_write().unwrap();
        wr.write_index(b"short").unwrap();
        wr.close().unwrap();
    }
    {
        let mut rd = table.begin_read().unwrap();
        assert_eq!(rd.read_index().unwrap().unwrap(), b"short");
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_fs_compact_swaps() {
    let dir = scratch_dir("fs-compact");
    let storage = FsStorage::new(&dir);
    storage.open().unwrap();
    let table = storage.table("items").unwrap();

    {
        let mut wr = table.begin_write().unwrap();
        wr.write_data(b"aaaa", 0).unwrap();
        wr.write_data(b"bbbb", 4).unwrap();
        wr.write_data(b"cccc", 8).unwrap();
        wr.commit_data().unwrap();
        wr.write_index(b"v1").unwrap();
        wr.close().unwrap();
    }

    {
        let mut wr = table.begin_compact().unwrap();
        // keep ranges 0 and 8, drop the middle.
        wr.copy_data(0, 0, 4).unwrap();
        wr.copy_data(8, 4, 4).unwrap();
        // reads go to the scratch file while compacting.
        assert_eq!(wr.read_data(4, 4).unwrap(), b"cccc");
        wr.commit_data().unwrap();
        wr.crop_data(8).unwrap();
        wr.write_index(b"v2").unwrap();
        wr.close().unwrap();
    }

    // the scratch file is gone and the data file holds the survivors.
    assert!(!dir.join("items.data.bak").exists());
    {
        let mut rd = table.begin_read().unwrap();
        assert_eq!(rd.read_data(0, 4).unwrap(), b"aaaa");
        assert_eq!(rd.read_data(4, 4).unwrap(), b"cccc");
        assert_eq!(rd.info().unwrap().data_size, 8);
        assert_eq!(rd.read_index().unwrap().unwrap(), b"v2");
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_fs_purge() {
    let dir = scratch_dir("fs-purge");
    let storage = FsStorage::new(&dir);
    storage.open().unwrap();
    let table = storage.table("items").unwrap();

    {
        let mut wr = table.begin_write().unwrap();
        wr.write_data(b"data", 0).unwrap();
        wr.write_index(b"index").unwrap();
        wr.purge().unwrap();
        wr.close().unwrap();
    }
    {
        let mut rd = table.begin_read().unwrap();
        assert_eq!(rd.read_index().unwrap(), None);
        assert_eq!(rd.info().unwrap().data_size, 0);
    }

    // storage purge removes the files wholesale.
    {
        let mut wr = table.begin_write().unwrap();
        wr.write_index(b"index").unwrap();
        wr.close().unwrap();
    }
    storage.purge().unwrap();
    assert!(!dir.join("items.index").exists());
    assert!(!dir.join("items.data").exists());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_fs_random_payloads() {
    let seed: u64 = random();
    println!("test_fs_random_payloads {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = scratch_dir("fs-random");
    let storage = FsStorage::new(&dir);
    storage.open().unwrap();
    let table = storage.table("blobs").unwrap();

    let mut written: Vec<(u64, Vec<u8>)> = vec![];
    let mut fpos = 0_u64;
    {
        let mut wr = table.begin_write().unwrap();
        for _i in 0..100 {
            let n = rng.gen_range(1..512);
            let data: Vec<u8> = (0..n).map(|_| rng.gen()).collect();
            wr.write_data(&data, fpos).unwrap();
            written.push((fpos, data.clone()));
            fpos += n as u64;
        }
        wr.commit_data().unwrap();
        wr.close().unwrap();
    }

    {
        let mut rd = table.begin_read().unwrap();
        for (offset, data) in written.iter() {
            let out = rd.read_data(*offset, data.len() as u32).unwrap();
            assert_eq!(&out, data);
        }
    }

    std::fs::remove_dir_all(&dir).ok();
}

//! Module implement the storage backend contract and its filesystem
//! implementation.
//!
//! The engine depends on a narrow reader/writer interface per table:
//! a reader serves the index image, payload bytes and sizes; a writer
//! adds one-pass index writes, positioned data writes, copies into a
//! compaction scratch file and truncation. Every table locks
//! independently: shared on the index file for readers, exclusive for
//! writers.

use fs2::FileExt;

use std::{
    fs,
    io::SeekFrom,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{util, Error, Result};

/// On-disk sizes of one table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub data_size: u64,
    pub index_size: u64,
}

/// A database home: a place that can enumerate tables and wipe itself.
pub trait Storage: Send + Sync {
    fn open(&self) -> Result<()>;

    fn purge(&self) -> Result<()>;

    fn table(&self, name: &str) -> Result<Box<dyn StorageTable>>;

    fn to_path(&self) -> PathBuf;
}

/// Per-table handle factory.
pub trait StorageTable: Send + Sync {
    fn begin_read(&self) -> Result<Box<dyn TableReader>>;

    fn begin_write(&self) -> Result<Box<dyn TableWriter>>;

    /// A writer whose data writes go to a scratch file, swapped in as
    /// the data file by `commit_data`.
    fn begin_compact(&self) -> Result<Box<dyn TableWriter>>;
}

pub trait TableReader: Send {
    /// Last-modified timestamp of the index file; None until the
    /// table's first commit.
    fn ts(&mut self) -> Result<Option<SystemTime>>;

    /// The full index image; None when the table has no index file or
    /// it is empty.
    fn read_index(&mut self) -> Result<Option<Vec<u8>>>;

    fn read_data(&mut self, offset: u64, length: u32) -> Result<Vec<u8>>;

    fn info(&mut self) -> Result<TableInfo>;
}

pub trait TableWriter: TableReader {
    /// Replace the index file's content in one pass.
    fn write_index(&mut self, data: &[u8]) -> Result<()>;

    fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()>;

    /// Copy `length` bytes from the current data file at `src` to the
    /// write target (scratch file while compacting) at `dst`.
    fn copy_data(&mut self, src: u64, dst: u64, length: u32) -> Result<()>;

    fn crop_data(&mut self, size: u64) -> Result<()>;

    /// Make data durable before the index image is written. The
    /// compacting writer swaps its scratch file in here.
    fn commit_data(&mut self) -> Result<()>;

    /// Truncate both files.
    fn purge(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn as_reader(&mut self) -> &mut dyn TableReader;
}

/// Filesystem-backed [Storage]: one directory per database,
/// `<table>.index` and `<table>.data` per table, with a transient
/// `<table>.data.bak` during compaction.
pub struct FsStorage {
    dir: PathBuf,
}

impl FsStorage {
    pub fn new(dir: &Path) -> FsStorage {
        FsStorage { dir: dir.to_path_buf() }
    }
}

impl Storage for FsStorage {
    fn open(&self) -> Result<()> {
        err_at!(IOError, fs::create_dir_all(&self.dir))?;
        Ok(())
    }

    fn purge(&self) -> Result<()> {
        for entry in err_at!(IOError, fs::read_dir(&self.dir))? {
            let path = err_at!(IOError, entry)?.path();
            let matches = path
                .to_str()
                .map(|p| {
                    p.ends_with(".index") || p.ends_with(".data") || p.ends_with(".data.bak")
                })
                .unwrap_or(false);
            if matches {
                err_at!(IOError, fs::remove_file(&path), "purging {:?}", path)?;
            }
        }
        Ok(())
    }

    fn table(&self, name: &str) -> Result<Box<dyn StorageTable>> {
        let table = FsTable {
            index_path: self.dir.join(format!("{}.index", name)),
            data_path: self.dir.join(format!("{}.data", name)),
            bak_path: self.dir.join(format!("{}.data.bak", name)),
        };
        Ok(Box::new(table))
    }

    fn to_path(&self) -> PathBuf {
        self.dir.clone()
    }
}

struct FsTable {
    index_path: PathBuf,
    data_path: PathBuf,
    bak_path: PathBuf,
}

impl StorageTable for FsTable {
    fn begin_read(&self) -> Result<Box<dyn TableReader>> {
        let index_fd = match util::open_file_r(self.index_path.as_os_str()) {
            Ok(fd) => {
                err_at!(IOError, fd.lock_shared(), "read lock {:?}", self.index_path)?;
                Some(fd)
            }
            Err(_) => None,
        };
        let reader = FsReader {
            index_path: self.index_path.clone(),
            data_path: self.data_path.clone(),
            index_fd,
            data_fd: None,
        };
        Ok(Box::new(reader))
    }

    fn begin_write(&self) -> Result<Box<dyn TableWriter>> {
        // a leftover scratch file means a compaction never committed.
        fs::remove_file(&self.bak_path).ok();

        let index_fd = util::open_file_rw(self.index_path.as_os_str())?;
        err_at!(IOError, index_fd.lock_exclusive(), "write lock {:?}", self.index_path)?;
        let data_fd = util::open_file_rw(self.data_path.as_os_str())?;

        let writer = FsWriter {
            index_path: self.index_path.clone(),
            data_path: self.data_path.clone(),
            bak_path: self.bak_path.clone(),
            index_fd,
            data_fd,
            side_fd: None,
        };
        Ok(Box::new(writer))
    }

    fn begin_compact(&self) -> Result<Box<dyn TableWriter>> {
        let index_fd = util::open_file_rw(self.index_path.as_os_str())?;
        err_at!(IOError, index_fd.lock_exclusive(), "write lock {:?}", self.index_path)?;
        let data_fd = util::open_file_rw(self.data_path.as_os_str())?;
        let side_fd = util::create_file_rw(self.bak_path.as_os_str())?;

        let writer = FsWriter {
            index_path: self.index_path.clone(),
            data_path: self.data_path.clone(),
            bak_path: self.bak_path.clone(),
            index_fd,
            data_fd,
            side_fd: Some(side_fd),
        };
        Ok(Box::new(writer))
    }
}

struct FsReader {
    index_path: PathBuf,
    data_path: PathBuf,
    index_fd: Option<fs::File>,
    data_fd: Option<fs::File>,
}

fn file_ts(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(err_at!(IOError, meta.modified())?)),
        Err(_) => Ok(None),
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

impl TableReader for FsReader {
    fn ts(&mut self) -> Result<Option<SystemTime>> {
        file_ts(&self.index_path)
    }

    fn read_index(&mut self) -> Result<Option<Vec<u8>>> {
        let fd = match &mut self.index_fd {
            Some(fd) => fd,
            None => return Ok(None),
        };
        let n = err_at!(IOError, fd.metadata())?.len();
        if n == 0 {
            return Ok(None);
        }
        let data = read_file!(fd, SeekFrom::Start(0), n, "reading index image")?;
        Ok(Some(data))
    }

    fn read_data(&mut self, offset: u64, length: u32) -> Result<Vec<u8>> {
        if self.data_fd.is_none() {
            self.data_fd = Some(util::open_file_r(self.data_path.as_os_str())?);
        }
        let fd = match &mut self.data_fd {
            Some(fd) => fd,
            None => unreachable!(),
        };
        read_file!(fd, SeekFrom::Start(offset), length, "reading record payload")
    }

    fn info(&mut self) -> Result<TableInfo> {
        Ok(TableInfo {
            data_size: file_len(&self.data_path),
            index_size: file_len(&self.index_path),
        })
    }
}

impl Drop for FsReader {
    fn drop(&mut self) {
        if let Some(fd) = &self.index_fd {
            fd.unlock().ok();
        }
    }
}

struct FsWriter {
    index_path: PathBuf,
    data_path: PathBuf,
    bak_path: PathBuf,
    index_fd: fs::File,
    data_fd: fs::File,
    // compaction scratch; data writes land here until commit_data
    // swaps it in.
    side_fd: Option<fs::File>,
}

impl TableReader for FsWriter {
    fn ts(&mut self) -> Result<Option<SystemTime>> {
        file_ts(&self.index_path)
    }

    fn read_index(&mut self) -> Result<Option<Vec<u8>>> {
        let fd = &mut self.index_fd;
        let n = err_at!(IOError, fd.metadata())?.len();
        if n == 0 {
            return Ok(None);
        }
        let data = read_file!(fd, SeekFrom::Start(0), n, "reading index image")?;
        Ok(Some(data))
    }

    fn read_data(&mut self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let fd = match &mut self.side_fd {
            Some(fd) => fd,
            None => &mut self.data_fd,
        };
        read_file!(fd, SeekFrom::Start(offset), length, "reading record payload")
    }

    fn info(&mut self) -> Result<TableInfo> {
        Ok(TableInfo {
            data_size: file_len(&self.data_path),
            index_size: file_len(&self.index_path),
        })
    }
}

impl TableWriter for FsWriter {
    fn write_index(&mut self, data: &[u8]) -> Result<()> {
        use std::io::Seek;

        err_at!(IOError, self.index_fd.seek(SeekFrom::Start(0)))?;
        write_file!(self.index_fd, data, &self.index_path, "writing index image")?;
        err_at!(IOError, self.index_fd.set_len(data.len() as u64))?;
        err_at!(IOError, self.index_fd.sync_all())?;
        Ok(())
    }

    fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        use std::io::Seek;

        let (fd, path) = match &mut self.side_fd {
            Some(fd) => (fd, &self.bak_path),
            None => (&mut self.data_fd, &self.data_path),
        };
        err_at!(IOError, fd.seek(SeekFrom::Start(offset)))?;
        write_file!(fd, data, path, "writing record payload")?;
        Ok(())
    }

    fn copy_data(&mut self, src: u64, dst: u64, length: u32) -> Result<()> {
        use std::io::Seek;

        let data = {
            let fd = &mut self.data_fd;
            read_file!(fd, SeekFrom::Start(src), length, "copying record payload")?
        };
        let (fd, path) = match &mut self.side_fd {
            Some(fd) => (fd, &self.bak_path),
            None => (&mut self.data_fd, &self.data_path),
        };
        err_at!(IOError, fd.seek(SeekFrom::Start(dst)))?;
        write_file!(fd, &data, path, "copying record payload")?;
        Ok(())
    }

    fn crop_data(&mut self, size: u64) -> Result<()> {
        err_at!(IOError, self.data_fd.set_len(size))?;
        Ok(())
    }

    fn commit_data(&mut self) -> Result<()> {
        match self.side_fd.take() {
            Some(side) => {
                err_at!(IOError, side.sync_all())?;
                err_at!(
                    IOError,
                    fs::rename(&self.bak_path, &self.data_path),
                    "swapping {:?}",
                    self.bak_path
                )?;
                // the scratch inode is now the data file.
                self.data_fd = side;
            }
            None => err_at!(IOError, self.data_fd.sync_all())?,
        }
        Ok(())
    }

    fn purge(&mut self) -> Result<()> {
        self.side_fd = None;
        fs::remove_file(&self.bak_path).ok();
        err_at!(IOError, self.index_fd.set_len(0))?;
        err_at!(IOError, self.data_fd.set_len(0))?;
        err_at!(IOError, self.index_fd.sync_all())?;
        err_at!(IOError, self.data_fd.sync_all())?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        err_at!(IOError, self.data_fd.sync_all())?;
        err_at!(IOError, self.index_fd.sync_all())?;
        self.index_fd.unlock().ok();
        Ok(())
    }

    fn as_reader(&mut self) -> &mut dyn TableReader {
        self
    }
}

impl Drop for FsWriter {
    fn drop(&mut self) {
        self.index_fd.unlock().ok();
    }
}

#[cfg(test)]
#[path = "fs_test.rs"]
mod fs_test;

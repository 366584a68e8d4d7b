//! Module implement the free-space map over a table's data file.
//!
//! The data file is an arena of record payloads. [DataMap] owns its
//! address space as a sorted list of used ranges, maximally merged:
//! no two adjacent allocations touch. The map is derived state, fully
//! reconstructible from the primary key index at load.

use crate::{Error, Result};

/// A used range `[begin, end)` of the data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub begin: u64,
    pub end: u64,
}

impl Allocation {
    #[inline]
    fn len(&self) -> u64 {
        self.end - self.begin
    }
}

/// Free-space allocator for a table's data file.
pub struct DataMap {
    allocs: Vec<Allocation>,
}

impl DataMap {
    pub fn new() -> DataMap {
        DataMap { allocs: Vec::new() }
    }

    /// Rebuild the map from the live `(offset, length)` ranges of a
    /// primary key index. Ranges are sorted and adjacent ranges are
    /// merged. Overlapping ranges mean a corrupt index.
    pub fn rebuild<I>(ranges: I) -> Result<DataMap>
    where
        I: Iterator<Item = (u64, u32)>,
    {
        let mut allocs: Vec<Allocation> = ranges
            .filter(|(_, length)| *length > 0)
            .map(|(offset, length)| Allocation {
                begin: offset,
                end: offset + (length as u64),
            })
            .collect();
        allocs.sort_by_key(|a| a.begin);

        let mut merged: Vec<Allocation> = Vec::with_capacity(allocs.len());
        for a in allocs.into_iter() {
            match merged.last_mut() {
                Some(last) if a.begin < last.end => {
                    return err_at!(
                        Fatal, msg: "overlapping ranges {:?} {:?}", last, a
                    );
                }
                Some(last) if a.begin == last.end => last.end = a.end,
                _ => merged.push(a),
            }
        }
        Ok(DataMap { allocs: merged })
    }

    /// Number of distinct used ranges.
    #[inline]
    pub fn len(&self) -> usize {
        self.allocs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocs.is_empty()
    }

    /// End of the last allocation, the minimum data-file length that
    /// holds every live record.
    pub fn max(&self) -> u64 {
        self.allocs.last().map(|a| a.end).unwrap_or(0)
    }

    pub fn as_allocs(&self) -> &[Allocation] {
        &self.allocs
    }

    /// Allocate `length` bytes, first-fit and leftward-growing. The
    /// head gap before the first allocation and every gap between two
    /// adjacent allocations are candidates; when none fits, the last
    /// allocation is extended.
    pub fn alloc(&mut self, length: u32) -> u64 {
        let length = length as u64;
        if length == 0 {
            return self.max();
        }
        if self.allocs.is_empty() {
            self.allocs.push(Allocation { begin: 0, end: length });
            return 0;
        }

        if self.allocs[0].begin >= length {
            if self.allocs[0].begin == length {
                self.allocs[0].begin = 0;
            } else {
                self.allocs.insert(0, Allocation { begin: 0, end: length });
            }
            return 0;
        }

        for i in 0..self.allocs.len() - 1 {
            let gap = self.allocs[i + 1].begin - self.allocs[i].end;
            if gap < length {
                continue;
            }
            let offset = self.allocs[i].end;
            if gap == length {
                // the new range bridges both neighbours into one.
                self.allocs[i].end = self.allocs[i + 1].end;
                self.allocs.remove(i + 1);
            } else {
                self.allocs[i].end += length;
            }
            return offset;
        }

        let last = match self.allocs.last_mut() {
            Some(last) => last,
            None => unreachable!(),
        };
        let offset = last.end;
        last.end += length;
        offset
    }

    /// Release `[offset, offset+length)`. The span must lie within a
    /// single allocation.
    pub fn free(&mut self, offset: u64, length: u32) -> Result<()> {
        let length = length as u64;
        if length == 0 {
            return Ok(());
        }
        let end = offset + length;

        let i = match self.allocs.iter().rposition(|a| a.begin <= offset) {
            Some(i) => i,
            None => return err_at!(Fatal, msg: "free {} {} outside map", offset, length),
        };
        let a = self.allocs[i];
        if end > a.end {
            return err_at!(
                Fatal, msg: "free {} {} crosses allocation {:?}", offset, length, a
            );
        }

        if offset == a.begin {
            if length == a.len() {
                self.allocs.remove(i);
            } else {
                self.allocs[i].begin = end;
            }
        } else if end == a.end {
            self.allocs[i].end = offset;
        } else {
            self.allocs[i].end = offset;
            let tail = Allocation { begin: end, end: a.end };
            self.allocs.insert(i + 1, tail);
        }
        Ok(())
    }

    /// Check that the list is sorted, disjoint and maximally merged.
    pub fn validate(&self) -> Result<()> {
        for w in self.allocs.windows(2) {
            if w[0].end >= w[1].begin {
                return err_at!(
                    Fatal, msg: "allocations not merged/sorted {:?} {:?}", w[0], w[1]
                );
            }
        }
        for a in self.allocs.iter() {
            if a.begin >= a.end {
                return err_at!(Fatal, msg: "empty allocation {:?}", a);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "space_test.rs"]
mod space_test;

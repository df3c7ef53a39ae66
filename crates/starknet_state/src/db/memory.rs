//! In-memory store with the same transaction surface as the mdbx backend.
//!
//! Backs unit tests and the throwaway tries built while verifying range
//! proofs. The `RefCell` gives writes the same `&self` signature as an mdbx
//! write transaction; the store is not meant to cross threads.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;

use super::{DbCursor, DbResult, DbTx, DbTxMut};

#[derive(Debug, Default)]
pub struct MemDb {
    map: RefCell<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DbTx for MemDb {
    type Cursor<'a> = MemCursor<'a> where Self: 'a;

    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.map.borrow().get(key).cloned())
    }

    fn cursor(&self) -> DbResult<MemCursor<'_>> {
        Ok(MemCursor { db: self, last_key: None, exhausted: false })
    }
}

impl DbTxMut for MemDb {
    fn set(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.map.borrow_mut().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> DbResult<()> {
        self.map.borrow_mut().remove(key);
        Ok(())
    }
}

pub struct MemCursor<'a> {
    db: &'a MemDb,
    last_key: Option<Vec<u8>>,
    exhausted: bool,
}

impl<'a> MemCursor<'a> {
    fn seek(&mut self, bound: Bound<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)> {
        let map = self.db.map.borrow();
        let entry =
            map.range::<[u8], _>((bound, Bound::Unbounded)).next().map(|(k, v)| (k.clone(), v.clone()));
        match &entry {
            Some((key, _)) => self.last_key = Some(key.clone()),
            None => self.exhausted = true,
        }
        entry
    }
}

impl<'a> DbCursor for MemCursor<'a> {
    fn lower_bound(&mut self, key: &[u8]) -> DbResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.exhausted = false;
        Ok(self.seek(Bound::Included(key)))
    }

    fn next(&mut self) -> DbResult<Option<(Vec<u8>, Vec<u8>)>> {
        if self.exhausted {
            return Ok(None);
        }
        match self.last_key.take() {
            // An unpositioned cursor starts at the first entry, as in mdbx.
            None => Ok(self.seek(Bound::Unbounded)),
            Some(last) => Ok(self.seek(Bound::Excluded(last.as_slice()))),
        }
    }
}

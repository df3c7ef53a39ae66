//! libmdbx-backed environment.
//!
//! The whole state lives in the single unnamed mdbx table; the [`Bucket`]
//! prefixes partition it. There is one non-clonable [`DbWriter`], so at most
//! one write transaction exists at any given moment, while readers snapshot
//! freely.
//!
//! [`Bucket`]: crate::db::Bucket

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use libmdbx::{Geometry, WriteFlags, WriteMap};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::{DbCursor, DbResult, DbTx, DbTxMut};

const MIN_SIZE: usize = 1 << 20; // Minimum db size 1MB;
const GROWTH_STEP: isize = 1 << 26; // Growth step 64MB;

// Note that NO_TLS mode is used by default.
type EnvironmentKind = WriteMap;
type Environment = libmdbx::Database<EnvironmentKind>;

/// The configuration of the database.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Validate)]
pub struct DbConfig {
    /// The path of the database directory. It is not created automatically.
    #[validate(custom = "validate_path_exists")]
    pub path: PathBuf,
    /// The maximum size of the database in bytes.
    pub max_size: usize,
}

fn validate_path_exists(path: &PathBuf) -> Result<(), ValidationError> {
    if !path.exists() {
        return Err(ValidationError::new("Database path does not exist"));
    }
    Ok(())
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig { path: PathBuf::from("./data"), max_size: 1 << 35 }
    }
}

/// Opens an MDBX environment and returns a reader and a writer to it.
pub fn open_env(config: &DbConfig) -> DbResult<(DbReader, DbWriter)> {
    let env = Arc::new(
        Environment::new()
            .set_geometry(Geometry {
                size: Some(MIN_SIZE..config.max_size),
                growth_step: Some(GROWTH_STEP),
                ..Default::default()
            })
            .open(&config.path)?,
    );
    Ok((DbReader { env: env.clone() }, DbWriter { env }))
}

#[derive(Clone)]
pub struct DbReader {
    env: Arc<Environment>,
}

pub struct DbWriter {
    env: Arc<Environment>,
}

impl DbReader {
    /// Takes a snapshot of the current state of the database.
    pub fn begin_ro_txn(&self) -> DbResult<DbReadTransaction<'_>> {
        Ok(DbReadTransaction { txn: self.env.begin_ro_txn()? })
    }
}

impl DbWriter {
    pub fn begin_rw_txn(&mut self) -> DbResult<DbWriteTransaction<'_>> {
        Ok(DbWriteTransaction { txn: self.env.begin_rw_txn()? })
    }
}

pub struct DbTransaction<'env, K: libmdbx::TransactionKind> {
    txn: libmdbx::Transaction<'env, K, EnvironmentKind>,
}

pub type DbReadTransaction<'env> = DbTransaction<'env, libmdbx::RO>;
pub type DbWriteTransaction<'env> = DbTransaction<'env, libmdbx::RW>;

impl<'env> DbWriteTransaction<'env> {
    /// Commits the transaction; dropping a transaction without committing it
    /// discards every buffered write.
    pub fn commit(self) -> DbResult<()> {
        self.txn.commit()?;
        Ok(())
    }
}

impl<'env, K: libmdbx::TransactionKind> DbTx for DbTransaction<'env, K> {
    type Cursor<'a> = MdbxCursor<'a, K> where Self: 'a;

    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let table = self.txn.open_table(None)?;
        Ok(self.txn.get::<Cow<'_, [u8]>>(&table, key)?.map(Cow::into_owned))
    }

    fn cursor(&self) -> DbResult<MdbxCursor<'_, K>> {
        let table = self.txn.open_table(None)?;
        Ok(MdbxCursor { cursor: self.txn.cursor(&table)? })
    }
}

impl<'env> DbTxMut for DbWriteTransaction<'env> {
    fn set(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        let table = self.txn.open_table(None)?;
        self.txn.put(&table, key, value, WriteFlags::UPSERT)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> DbResult<()> {
        let table = self.txn.open_table(None)?;
        self.txn.del(&table, key, None)?;
        Ok(())
    }
}

pub struct MdbxCursor<'txn, K: libmdbx::TransactionKind> {
    cursor: libmdbx::Cursor<'txn, K>,
}

type KeyValue<'txn> = (Cow<'txn, [u8]>, Cow<'txn, [u8]>);

impl<'txn, K: libmdbx::TransactionKind> DbCursor for MdbxCursor<'txn, K> {
    fn lower_bound(&mut self, key: &[u8]) -> DbResult<Option<(Vec<u8>, Vec<u8>)>> {
        let entry = self.cursor.set_range::<Cow<'_, [u8]>, Cow<'_, [u8]>>(key)?;
        Ok(entry.map(owned_key_value))
    }

    fn next(&mut self) -> DbResult<Option<(Vec<u8>, Vec<u8>)>> {
        let entry = self.cursor.next::<Cow<'_, [u8]>, Cow<'_, [u8]>>()?;
        Ok(entry.map(owned_key_value))
    }
}

fn owned_key_value((key, value): KeyValue<'_>) -> (Vec<u8>, Vec<u8>) {
    (key.into_owned(), value.into_owned())
}

//! redb-backed metadata store
//!
//! One redb table per logical table. The database handle is reference
//! counted so a writer can hand snapshot readers a clone instead of taking
//! a second file lock on the same store.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use super::{MetaError, MetaResult, MetaStore, ReadTxn, Table, WriteTxn};

const CHUNK_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("chunk");
const BUFFER_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("buffer");
const CELLAR_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("cellar");
const CHECKPOINT_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("checkpoint");

fn definition(table: Table) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match table {
        Table::Chunk => CHUNK_TABLE,
        Table::Buffer => BUFFER_TABLE,
        Table::Cellar => CELLAR_TABLE,
        Table::Checkpoint => CHECKPOINT_TABLE,
    }
}

/// Metadata store backed by a single redb file.
#[derive(Clone)]
pub struct RedbMetaStore {
    db: Arc<Database>,
}

impl RedbMetaStore {
    /// Open the store at `path`, creating the file if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> MetaResult<Self> {
        let db = Database::create(path).map_err(MetaError::backend)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open an existing store, failing fast when the file is absent.
    pub fn open_existing(path: impl AsRef<Path>) -> MetaResult<Self> {
        let db = Database::open(path).map_err(MetaError::backend)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl MetaStore for RedbMetaStore {
    type ReadTxn<'a> = RedbReadTxn
    where
        Self: 'a;
    type WriteTxn<'a> = RedbWriteTxn
    where
        Self: 'a;

    fn begin_read(&self) -> MetaResult<RedbReadTxn> {
        let txn = self.db.begin_read().map_err(MetaError::backend)?;
        Ok(RedbReadTxn { txn })
    }

    fn begin_write(&self) -> MetaResult<RedbWriteTxn> {
        let txn = self.db.begin_write().map_err(MetaError::backend)?;
        Ok(RedbWriteTxn { txn })
    }
}

/// Snapshot transaction over the redb store.
pub struct RedbReadTxn {
    txn: redb::ReadTransaction,
}

impl ReadTxn for RedbReadTxn {
    fn get(&self, table: Table, key: &[u8]) -> MetaResult<Option<Vec<u8>>> {
        let opened = match self.txn.open_table(definition(table)) {
            Ok(opened) => opened,
            // a table nobody has written to yet reads as empty
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(MetaError::backend(err)),
        };
        let guard = opened.get(key).map_err(MetaError::backend)?;
        Ok(guard.map(|g| g.value().to_vec()))
    }

    fn scan(&self, table: Table) -> MetaResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let opened = match self.txn.open_table(definition(table)) {
            Ok(opened) => opened,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(MetaError::backend(err)),
        };
        collect_range(&opened)
    }
}

/// Read-write transaction over the redb store.
pub struct RedbWriteTxn {
    txn: redb::WriteTransaction,
}

impl ReadTxn for RedbWriteTxn {
    fn get(&self, table: Table, key: &[u8]) -> MetaResult<Option<Vec<u8>>> {
        let opened = self
            .txn
            .open_table(definition(table))
            .map_err(MetaError::backend)?;
        let guard = opened.get(key).map_err(MetaError::backend)?;
        Ok(guard.map(|g| g.value().to_vec()))
    }

    fn scan(&self, table: Table) -> MetaResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let opened = self
            .txn
            .open_table(definition(table))
            .map_err(MetaError::backend)?;
        collect_range(&opened)
    }
}

impl WriteTxn for RedbWriteTxn {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> MetaResult<()> {
        let mut opened = self
            .txn
            .open_table(definition(table))
            .map_err(MetaError::backend)?;
        opened.insert(key, value).map_err(MetaError::backend)?;
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &[u8]) -> MetaResult<()> {
        let mut opened = self
            .txn
            .open_table(definition(table))
            .map_err(MetaError::backend)?;
        opened.remove(key).map_err(MetaError::backend)?;
        Ok(())
    }

    fn commit(self) -> MetaResult<()> {
        self.txn.commit().map_err(MetaError::backend)
    }
}

fn collect_range(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
) -> MetaResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut entries = Vec::new();
    for item in table.range::<&[u8]>(..).map_err(MetaError::backend)? {
        let (key, value) = item.map_err(MetaError::backend)?;
        entries.push((key.value().to_vec(), value.value().to_vec()));
    }
    Ok(entries)
}

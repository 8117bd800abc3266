use crate::{KVStore, Result, StorageError, Transaction as KVTransaction};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const RESOURCES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("resources");

/// File name of the database inside a data directory
pub const DATABASE_FILE: &str = "capv.redb";

/// redb-based storage backend
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) the database file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening redb database at: {}", path.as_ref().display());

        let db = Database::create(path.as_ref())?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RESOURCES_TABLE)?;
        }
        write_txn.commit()?;

        info!("redb database initialized successfully");

        Ok(Self { db: Arc::new(db) })
    }

    /// Open the database inside `dir`, creating the directory if needed
    pub fn open_in<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Self::new(dir.as_ref().join(DATABASE_FILE))
    }
}

fn scan_table<T: ReadableTable<&'static [u8], &'static [u8]>>(
    table: &T,
    prefix: &[u8],
) -> Result<Vec<(Bytes, Bytes)>> {
    let mut results = Vec::new();

    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        let key_bytes = key.value();

        // Keys are sorted, so the first key without the prefix ends the scan
        if !key_bytes.starts_with(prefix) {
            break;
        }
        results.push((
            Bytes::copy_from_slice(key_bytes),
            Bytes::copy_from_slice(value.value()),
        ));
    }

    Ok(results)
}

impl KVStore for RedbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        debug!("Getting key: {:?}", String::from_utf8_lossy(key));

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESOURCES_TABLE)?;

        Ok(table.get(key)?.map(|v| Bytes::copy_from_slice(v.value())))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        debug!("Putting key: {:?}", String::from_utf8_lossy(key));

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RESOURCES_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;

        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        debug!("Deleting key: {:?}", String::from_utf8_lossy(key));

        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(RESOURCES_TABLE)?;
            let removed = table.remove(key)?;
            removed.is_some()
        };
        write_txn.commit()?;

        Ok(existed)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        debug!(
            "Scanning with prefix: {:?}",
            String::from_utf8_lossy(prefix)
        );

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESOURCES_TABLE)?;
        let results = scan_table(&table, prefix)?;

        debug!("Scan found {} results", results.len());
        Ok(results)
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESOURCES_TABLE)?;
        Ok(table.get(key)?.is_some())
    }

    fn transaction(&self) -> Result<Box<dyn KVTransaction>> {
        let write_txn = self.db.begin_write()?;
        Ok(Box::new(RedbTransaction {
            txn: Some(write_txn),
        }))
    }
}

/// redb write transaction; dropped without commit means rollback
struct RedbTransaction {
    txn: Option<redb::WriteTransaction>,
}

impl RedbTransaction {
    fn txn(&self) -> Result<&redb::WriteTransaction> {
        self.txn.as_ref().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed or rolled back")
        })
    }
}

impl KVTransaction for RedbTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let table = self.txn()?.open_table(RESOURCES_TABLE)?;
        let value = table.get(key)?.map(|v| Bytes::copy_from_slice(v.value()));
        Ok(value)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table = self.txn()?.open_table(RESOURCES_TABLE)?;
        table.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let mut table = self.txn()?.open_table(RESOURCES_TABLE)?;
        table.remove(key)?;
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let table = self.txn()?.open_table(RESOURCES_TABLE)?;
        scan_table(&table, prefix)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let txn = self.txn.take().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed or rolled back")
        })?;

        txn.commit()?;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        let txn = self.txn.take().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed or rolled back")
        })?;

        txn.abort()?;
        Ok(())
    }
}

impl Drop for RedbTransaction {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            let _ = txn.abort();
        }
    }
}

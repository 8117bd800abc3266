use crate::Result;
use bytes::Bytes;

/// Key-value store trait
pub trait KVStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Put a key-value pair
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key, returning whether it existed
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Scan keys with a given prefix, in key order
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> Result<bool>;

    /// Begin a write transaction
    fn transaction(&self) -> Result<Box<dyn Transaction>>;
}

/// Transaction trait for atomic read-modify-write
pub trait Transaction: Send {
    /// Get a value by key, seeing this transaction's own writes
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Put a key-value pair
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Scan keys with a given prefix
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Commit the transaction
    fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    fn rollback(self: Box<Self>) -> Result<()>;
}

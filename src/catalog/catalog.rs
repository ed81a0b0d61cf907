use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use log::info;
use parking_lot::RwLock;
use thiserror::Error;

use crate::catalog::schema::{Schema, Tuple};
use crate::index::btree::error::BTreeError;
use crate::index::btree_index::{BPlusTreeIndex, Index, IndexMetadata};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::table::{TableHeap, TableHeapError};
use crate::transaction::concurrency::{
    IsolationLevel, LockManager, Transaction, TransactionAbortError,
};
use crate::transaction::wal::LogManager;

pub type TableOid = u32;
pub type IndexOid = u32;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table oid {0} not found")]
    TableOidNotFound(TableOid),

    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Index '{0}' not found")]
    IndexNotFound(String),

    #[error("Index oid {0} not found")]
    IndexOidNotFound(IndexOid),

    #[error("Index '{0}' already exists on table '{1}'")]
    IndexAlreadyExists(String, String),

    #[error("Unknown column {0} in key attributes")]
    UnknownKeyColumn(usize),

    #[error("Index error: {0}")]
    IndexError(#[from] BTreeError),

    #[error("Table heap error: {0}")]
    TableHeapError(#[from] TableHeapError),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[from] TransactionAbortError),
}

/// Metadata about a table. The catalog owns the heap.
pub struct TableInfo {
    pub schema: Schema,
    pub name: String,
    pub table: TableHeap,
    pub oid: TableOid,
}

/// Metadata about an index. The catalog owns the index object.
pub struct IndexInfo {
    pub key_schema: Schema,
    pub name: String,
    pub index: Box<dyn Index>,
    pub oid: IndexOid,
    pub table_name: String,
    pub key_size: usize,
}

/// In-memory catalog: table and index metadata keyed by oid, with parallel
/// name maps. Built for the executors; nothing here is persistent.
pub struct Catalog {
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    #[allow(dead_code)]
    log_manager: Arc<LogManager>,

    tables: RwLock<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: RwLock<HashMap<String, TableOid>>,
    next_table_oid: AtomicU32,

    indexes: RwLock<HashMap<IndexOid, Arc<IndexInfo>>>,
    /// table name -> index name -> index oid
    index_names: RwLock<HashMap<String, HashMap<String, IndexOid>>>,
    next_index_oid: AtomicU32,
}

impl Catalog {
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        lock_manager: Arc<LockManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self {
            buffer_pool,
            lock_manager,
            log_manager,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            next_table_oid: AtomicU32::new(0),
            indexes: RwLock::new(HashMap::new()),
            index_names: RwLock::new(HashMap::new()),
            next_index_oid: AtomicU32::new(0),
        }
    }

    /// Create a new table and return its metadata.
    pub fn create_table(
        &self,
        _txn: &Arc<Transaction>,
        table_name: &str,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, CatalogError> {
        let mut table_names = self.table_names.write();
        if table_names.contains_key(table_name) {
            return Err(CatalogError::TableAlreadyExists(table_name.to_string()));
        }

        let oid = self.next_table_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(TableInfo {
            schema,
            name: table_name.to_string(),
            table: TableHeap::new(self.buffer_pool.clone()),
            oid,
        });

        table_names.insert(table_name.to_string(), oid);
        self.tables.write().insert(oid, info.clone());
        info!("created table '{}' (oid {})", table_name, oid);
        Ok(info)
    }

    pub fn get_table(&self, table_name: &str) -> Result<Arc<TableInfo>, CatalogError> {
        let oid = *self
            .table_names
            .read()
            .get(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.to_string()))?;
        self.get_table_by_oid(oid)
    }

    pub fn get_table_by_oid(&self, oid: TableOid) -> Result<Arc<TableInfo>, CatalogError> {
        self.tables
            .read()
            .get(&oid)
            .cloned()
            .ok_or(CatalogError::TableOidNotFound(oid))
    }

    /// Create an index with an N-byte key over `key_attrs` and backfill it
    /// from the table's current contents under `txn`.
    pub fn create_index<const N: usize>(
        &self,
        txn: &Arc<Transaction>,
        index_name: &str,
        table_name: &str,
        key_attrs: Vec<usize>,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let table = self.get_table(table_name)?;
        if let Some(per_table) = self.index_names.read().get(table_name) {
            if per_table.contains_key(index_name) {
                return Err(CatalogError::IndexAlreadyExists(
                    index_name.to_string(),
                    table_name.to_string(),
                ));
            }
        }
        if let Some(&bad) = key_attrs
            .iter()
            .find(|&&attr| attr >= table.schema.columns().len())
        {
            return Err(CatalogError::UnknownKeyColumn(bad));
        }

        let key_schema = table.schema.project(&key_attrs);
        let key_size = table.schema.key_size(&key_attrs);
        let metadata = IndexMetadata {
            name: index_name.to_string(),
            table_name: table_name.to_string(),
            key_schema: key_schema.clone(),
            key_attrs: key_attrs.clone(),
        };
        let index = Box::new(BPlusTreeIndex::<N>::new(metadata, self.buffer_pool.clone())?);

        // Backfill from the live table, taking read locks as any scan
        // under this transaction would.
        for (rid, data) in table.table.iter() {
            if txn.isolation_level() != IsolationLevel::ReadUncommitted
                && !txn.holds_shared(rid)
                && !txn.holds_exclusive(rid)
            {
                self.lock_manager.lock_shared(txn, rid)?;
            }
            let tuple = Tuple::from_bytes(data);
            let key = tuple.key_from_tuple(&table.schema, &key_attrs);
            index.insert_entry(&key, rid, txn)?;
        }

        let oid = self.next_index_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            key_schema,
            name: index_name.to_string(),
            index,
            oid,
            table_name: table_name.to_string(),
            key_size,
        });

        self.indexes.write().insert(oid, info.clone());
        self.index_names
            .write()
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), oid);
        info!(
            "created index '{}' on '{}' (oid {}, key {} bytes)",
            index_name, table_name, oid, key_size
        );
        Ok(info)
    }

    pub fn get_index(
        &self,
        index_name: &str,
        table_name: &str,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let oid = *self
            .index_names
            .read()
            .get(table_name)
            .and_then(|per_table| per_table.get(index_name))
            .ok_or_else(|| CatalogError::IndexNotFound(index_name.to_string()))?;
        self.get_index_by_oid(oid)
    }

    pub fn get_index_by_oid(&self, oid: IndexOid) -> Result<Arc<IndexInfo>, CatalogError> {
        self.indexes
            .read()
            .get(&oid)
            .cloned()
            .ok_or(CatalogError::IndexOidNotFound(oid))
    }

    /// Every index on `table_name`, in no particular order.
    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let index_names = self.index_names.read();
        let indexes = self.indexes.read();
        index_names
            .get(table_name)
            .map(|per_table| {
                per_table
                    .values()
                    .filter_map(|oid| indexes.get(oid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

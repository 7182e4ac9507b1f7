//! The backend. This contains the sqlite storage of identity rows, the connection pool and the
//! transaction wrappers the identity store runs its operations in.

use rscidm_proto::internal::FsType;

use crate::prelude::*;

pub mod dbidentity;
pub mod identity_sqlite;

pub use crate::be::identity_sqlite::IdentitySqliteTransaction as BackendTransaction;
use crate::be::identity_sqlite::{
    IdentitySqlite, IdentitySqliteReadTransaction, IdentitySqliteWriteTransaction,
};

pub type BackendReadTransaction = IdentitySqliteReadTransaction;
pub type BackendWriteTransaction = IdentitySqliteWriteTransaction;

#[allow(clippy::needless_pass_by_value)] // needs to accept value from `map_err`
pub(crate) fn sqlite_error(e: rusqlite::Error) -> OperationError {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &e {
        if ffi_err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
            admin_warn!(?e, "SQLite unique constraint violated");
            return OperationError::DuplicateKey;
        }
    }
    admin_error!(?e, "SQLite Error");
    OperationError::SqliteError
}

#[allow(clippy::needless_pass_by_value)] // needs to accept value from `map_err`
pub(crate) fn serde_json_error(e: serde_json::Error) -> OperationError {
    admin_error!(?e, "Serde JSON Error");
    OperationError::SerdeJsonError
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    path: String,
    pool_size: u32,
    db_name: &'static str,
    fstype: FsType,
}

impl BackendConfig {
    pub fn new(path: &str, pool_size: u32, fstype: FsType) -> Self {
        // Every connection to "" is its own private in-memory database.
        let pool_size = if path.is_empty() { 1 } else { pool_size.max(1) };
        BackendConfig {
            pool_size,
            path: path.to_string(),
            db_name: "main",
            fstype,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_test(db_name: &'static str) -> Self {
        BackendConfig {
            pool_size: 1,
            path: "".to_string(),
            db_name,
            fstype: FsType::Generic,
        }
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }
}

#[derive(Clone)]
pub struct Backend {
    /// This is the actual datastorage layer.
    idlayer: IdentitySqlite,
    cfg: BackendConfig,
}

impl Backend {
    #[instrument(level = "debug", name = "be::new", skip_all)]
    pub fn new(cfg: BackendConfig) -> Result<Self, OperationError> {
        debug!(db_tickets = ?cfg.pool_size, "Opening identity backend");
        let idlayer = IdentitySqlite::new(&cfg)?;
        Ok(Backend { idlayer, cfg })
    }

    pub fn get_config(&self) -> &BackendConfig {
        &self.cfg
    }

    pub fn read(&self) -> Result<BackendReadTransaction, OperationError> {
        self.idlayer.read()
    }

    pub fn write(&self) -> Result<BackendWriteTransaction, OperationError> {
        self.idlayer.write()
    }

    /// Run `f` inside one write transaction. The transaction commits when `f` succeeds and is
    /// rolled back when it fails.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, OperationError>
    where
        F: FnOnce(&BackendWriteTransaction) -> Result<T, OperationError>,
    {
        let txn = self.write()?;
        let value = f(&txn)?;
        txn.commit()?;
        Ok(value)
    }
}

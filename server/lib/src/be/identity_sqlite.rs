use std::collections::VecDeque;
use std::convert::TryFrom;
use std::sync::{Arc, Condvar, Mutex};

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use super::{serde_json_error, sqlite_error};
use crate::be::dbidentity::{DbIdentity, DbIdentityNew, DB_IDENTITY_COLUMNS};
use crate::be::BackendConfig;
use crate::identity::IdentityRecord;
use crate::prelude::*;

const DBV_IDENTITY: &str = "identity";

type ConnPool = Arc<IdentitySqlitePool>;

/// Idle connections. Callers that find it empty wait for a transaction to hand its
/// connection back.
pub struct IdentitySqlitePool {
    conns: Mutex<VecDeque<Connection>>,
    available: Condvar,
}

impl IdentitySqlitePool {
    fn new(conns: VecDeque<Connection>) -> Self {
        IdentitySqlitePool {
            conns: Mutex::new(conns),
            available: Condvar::new(),
        }
    }

    fn take(&self) -> Result<Connection, OperationError> {
        let guard = self.conns.lock().map_err(|e| {
            error!(err = ?e, "Unable to lock connection pool.");
            OperationError::BackendEngine
        })?;

        let (mut guard, waited) = self
            .available
            .wait_timeout_while(guard, DB_POOL_WAIT, |conns| conns.is_empty())
            .map_err(|e| {
                error!(err = ?e, "Unable to lock connection pool.");
                OperationError::BackendEngine
            })?;

        guard.pop_front().ok_or_else(|| {
            error!(timed_out = %waited.timed_out(), "Unable to retrieve connection from pool.");
            OperationError::BackendEngine
        })
    }

    fn give(&self, conn: Connection) -> Result<(), OperationError> {
        self.conns
            .lock()
            .map_err(|err| {
                error!(?err, "Unable to return connection to pool");
                OperationError::BackendEngine
            })?
            .push_back(conn);
        self.available.notify_one();
        Ok(())
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn propb_to_text(propb: Option<&JsonValue>) -> Result<Option<String>, OperationError> {
    propb
        .map(serde_json::to_string)
        .transpose()
        .map_err(serde_json_error)
}

#[derive(Clone)]
pub struct IdentitySqlite {
    pool: ConnPool,
    db_name: &'static str,
}

pub struct IdentitySqliteReadTransaction {
    pool: ConnPool,
    conn: Option<Connection>,
    db_name: &'static str,
}

pub struct IdentitySqliteWriteTransaction {
    pool: ConnPool,
    conn: Option<Connection>,
    db_name: &'static str,
}

pub trait IdentitySqliteTransaction {
    fn get_db_name(&self) -> &str;

    fn get_conn(&self) -> Result<&Connection, OperationError>;

    fn query_identities<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> Result<Vec<IdentityRecord>, OperationError> {
        let mut stmt = self
            .get_conn()?
            .prepare(&format!(
                "SELECT {} FROM {}.identity {}",
                DB_IDENTITY_COLUMNS,
                self.get_db_name(),
                filter
            ))
            .map_err(sqlite_error)?;
        let idn_iter = stmt
            .query_map(params, DbIdentity::from_row)
            .map_err(sqlite_error)?;
        idn_iter
            .map(|v| v.map_err(sqlite_error).and_then(IdentityRecord::try_from))
            .collect()
    }

    fn query_identity<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> Result<Option<IdentityRecord>, OperationError> {
        self.get_conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM {}.identity {} LIMIT 1",
                    DB_IDENTITY_COLUMNS,
                    self.get_db_name(),
                    filter
                ),
                params,
                DbIdentity::from_row,
            )
            .optional()
            .map_err(sqlite_error)?
            .map(IdentityRecord::try_from)
            .transpose()
    }

    fn query_exists<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> Result<bool, OperationError> {
        self.get_conn()?
            .query_row(
                &format!(
                    "SELECT EXISTS (SELECT 1 FROM {}.identity {})",
                    self.get_db_name(),
                    filter
                ),
                params,
                |row| row.get(0),
            )
            .map_err(sqlite_error)
    }

    fn get_identity(&self, id: IdentityId) -> Result<Option<IdentityRecord>, OperationError> {
        self.query_identity("WHERE id = :id", named_params! { ":id": id })
    }

    fn get_rsc_identities(&self, rsc_id: ResourceId) -> Result<Vec<IdentityRecord>, OperationError> {
        self.query_identities(
            r#"WHERE rsc_id = :rsc_id ORDER BY "type", "key", id"#,
            named_params! { ":rsc_id": rsc_id },
        )
    }

    /// Verified identities first, then by key.
    fn get_rsc_identities_by_type(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
    ) -> Result<Vec<IdentityRecord>, OperationError> {
        self.query_identities(
            r#"WHERE rsc_id = :rsc_id AND "type" = :type ORDER BY is_verified DESC, "key", id"#,
            named_params! { ":rsc_id": rsc_id, ":type": idn_type },
        )
    }

    /// The preferred identity of a type: verified first, then the most recently modified.
    fn get_rsc_identity_by_type(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
    ) -> Result<Option<IdentityRecord>, OperationError> {
        self.query_identity(
            r#"WHERE rsc_id = :rsc_id AND "type" = :type ORDER BY is_verified DESC, modified DESC, id DESC"#,
            named_params! { ":rsc_id": rsc_id, ":type": idn_type },
        )
    }

    fn get_rsc_identity_by_type_key(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
    ) -> Result<Option<IdentityRecord>, OperationError> {
        self.query_identity(
            r#"WHERE rsc_id = :rsc_id AND "type" = :type AND "key" = :key ORDER BY id"#,
            named_params! { ":rsc_id": rsc_id, ":type": idn_type, ":key": key },
        )
    }

    fn get_rsc_types(&self, rsc_id: ResourceId) -> Result<Vec<String>, OperationError> {
        let mut stmt = self
            .get_conn()?
            .prepare(&format!(
                r#"SELECT DISTINCT "type" FROM {}.identity WHERE rsc_id = :rsc_id ORDER BY "type""#,
                self.get_db_name()
            ))
            .map_err(sqlite_error)?;
        let type_iter = stmt
            .query_map(named_params! { ":rsc_id": rsc_id }, |row| row.get(0))
            .map_err(sqlite_error)?;
        type_iter.map(|v| v.map_err(sqlite_error)).collect()
    }

    /// The single holder of a key. Unique rows win over non-unique duplicates.
    fn get_by_type_key(
        &self,
        idn_type: &str,
        key: &str,
    ) -> Result<Option<IdentityRecord>, OperationError> {
        self.query_identity(
            r#"WHERE "type" = :type AND "key" = :key ORDER BY is_unique DESC, is_verified DESC, id"#,
            named_params! { ":type": idn_type, ":key": key },
        )
    }

    fn get_all_by_type_key(
        &self,
        idn_type: &str,
        key: &str,
    ) -> Result<Vec<IdentityRecord>, OperationError> {
        self.query_identities(
            r#"WHERE "type" = :type AND "key" = :key ORDER BY is_verified DESC, id"#,
            named_params! { ":type": idn_type, ":key": key },
        )
    }

    fn get_by_verify_key(&self, verify_key: &str) -> Result<Option<IdentityRecord>, OperationError> {
        self.query_identity(
            "WHERE verify_key = :verify_key",
            named_params! { ":verify_key": verify_key },
        )
    }

    /// Is the key held by any resource, optionally ignoring one resource?
    fn exists_type_key(
        &self,
        idn_type: &str,
        key: &str,
        exclude_rsc: Option<ResourceId>,
    ) -> Result<bool, OperationError> {
        match exclude_rsc {
            Some(rsc_id) => self.query_exists(
                r#"WHERE "type" = :type AND "key" = :key AND rsc_id <> :rsc_id"#,
                named_params! { ":type": idn_type, ":key": key, ":rsc_id": rsc_id },
            ),
            None => self.query_exists(
                r#"WHERE "type" = :type AND "key" = :key"#,
                named_params! { ":type": idn_type, ":key": key },
            ),
        }
    }

    fn exists_verify_key(&self, verify_key: &str) -> Result<bool, OperationError> {
        self.query_exists(
            "WHERE verify_key = :verify_key",
            named_params! { ":verify_key": verify_key },
        )
    }

    fn exists_rsc_type(&self, rsc_id: ResourceId, idn_type: &str) -> Result<bool, OperationError> {
        self.query_exists(
            r#"WHERE rsc_id = :rsc_id AND "type" = :type"#,
            named_params! { ":rsc_id": rsc_id, ":type": idn_type },
        )
    }

    fn is_verified_rsc(&self, rsc_id: ResourceId) -> Result<bool, OperationError> {
        self.query_exists(
            r#"WHERE rsc_id = :rsc_id AND is_verified = 1 AND "type" <> :username_pw"#,
            named_params! { ":rsc_id": rsc_id, ":username_pw": IDENTITY_TYPE_USERNAME_PW },
        )
    }

    /// Username/password identities of every resource holding the given email identity.
    fn get_logins_by_email(&self, email: &str) -> Result<Vec<IdentityRecord>, OperationError> {
        self.query_identities(
            &format!(
                r#"WHERE "type" = :username_pw AND rsc_id IN (
                    SELECT rsc_id FROM {}.identity WHERE "type" = :email AND "key" = :key
                ) ORDER BY visited DESC, id"#,
                self.get_db_name()
            ),
            named_params! {
                ":username_pw": IDENTITY_TYPE_USERNAME_PW,
                ":email": IDENTITY_TYPE_EMAIL,
                ":key": email,
            },
        )
    }

    fn get_db_version_key(&self, key: &str) -> Result<i64, OperationError> {
        self.get_conn()?
            .query_row(
                &format!(
                    "SELECT version FROM {}.db_version WHERE id = :id",
                    self.get_db_name()
                ),
                named_params! { ":id": key },
                |row| row.get(0),
            )
            .optional()
            .map(|v| v.unwrap_or(0))
            .map_err(sqlite_error)
    }
}

impl IdentitySqliteTransaction for IdentitySqliteReadTransaction {
    fn get_db_name(&self) -> &str {
        self.db_name
    }

    fn get_conn(&self) -> Result<&Connection, OperationError> {
        self.conn
            .as_ref()
            .ok_or(OperationError::TransactionAlreadyCommitted)
    }
}

impl Drop for IdentitySqliteReadTransaction {
    // Abort - a read never changes anything.
    fn drop(&mut self) {
        let mut dropping = None;
        std::mem::swap(&mut dropping, &mut self.conn);

        if let Some(conn) = dropping {
            #[allow(clippy::expect_used)]
            conn.execute("ROLLBACK TRANSACTION", [])
                .expect("Unable to rollback transaction! Can not proceed!!!");

            #[allow(clippy::expect_used)]
            self.pool
                .give(conn)
                .expect("Unable to access db pool");
        }
    }
}

impl IdentitySqliteReadTransaction {
    pub fn new(
        pool: ConnPool,
        conn: Connection,
        db_name: &'static str,
    ) -> Result<Self, OperationError> {
        // There is no way to flag this is an RO operation.
        conn.execute("BEGIN DEFERRED TRANSACTION", [])
            .map_err(sqlite_error)?;

        Ok(IdentitySqliteReadTransaction {
            pool,
            conn: Some(conn),
            db_name,
        })
    }
}

impl IdentitySqliteTransaction for IdentitySqliteWriteTransaction {
    fn get_db_name(&self) -> &str {
        self.db_name
    }

    fn get_conn(&self) -> Result<&Connection, OperationError> {
        self.conn
            .as_ref()
            .ok_or(OperationError::TransactionAlreadyCommitted)
    }
}

impl Drop for IdentitySqliteWriteTransaction {
    // Abort
    fn drop(&mut self) {
        let mut dropping = None;
        std::mem::swap(&mut dropping, &mut self.conn);

        if let Some(conn) = dropping {
            #[allow(clippy::expect_used)]
            conn.execute("ROLLBACK TRANSACTION", [])
                .expect("Unable to rollback transaction! Can not proceed!!!");

            #[allow(clippy::expect_used)]
            self.pool
                .give(conn)
                .expect("Unable to access db pool");
        }
    }
}

impl IdentitySqliteWriteTransaction {
    pub fn new(
        pool: ConnPool,
        conn: Connection,
        db_name: &'static str,
    ) -> Result<Self, OperationError> {
        // Exclusive so that uniqueness checks and the write that follows them can't interleave
        // with another writer.
        conn.execute("BEGIN EXCLUSIVE TRANSACTION", [])
            .map_err(sqlite_error)?;
        Ok(IdentitySqliteWriteTransaction {
            pool,
            conn: Some(conn),
            db_name,
        })
    }

    #[instrument(level = "debug", name = "identity_sqlite::commit", skip_all)]
    pub fn commit(mut self) -> Result<(), OperationError> {
        debug_assert!(self.conn.is_some());

        let mut dropping = None;
        std::mem::swap(&mut dropping, &mut self.conn);

        if let Some(conn) = dropping {
            if let Err(e) = conn.execute("COMMIT TRANSACTION", []) {
                admin_error!(?e, "CRITICAL: failed to commit sqlite txn");
                // The connection stays in the pool either way.
                if conn.is_autocommit() {
                    trace!("commit failure ended the transaction");
                } else if let Err(e) = conn.execute("ROLLBACK TRANSACTION", []) {
                    admin_error!(?e, "Unable to rollback after failed commit");
                }
                self.pool.give(conn)?;
                return Err(OperationError::BackendEngine);
            }

            self.pool.give(conn)
        } else {
            Err(OperationError::TransactionAlreadyCommitted)
        }
    }

    pub fn insert_identity(&self, new: &DbIdentityNew) -> Result<IdentityId, OperationError> {
        let now = now_unix();
        let propb = propb_to_text(new.propb)?;
        // Non-unique rows carry NULL so they never collide in the unique constraint.
        let is_unique = new.is_unique.then_some(true);
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                r#"INSERT INTO {}.identity (rsc_id, "type", "key", is_unique, is_verified, verify_key, propb, modified, created)
                VALUES (:rsc_id, :type, :key, :is_unique, :is_verified, :verify_key, :propb, :now, :now)"#,
                self.get_db_name()
            ),
            named_params! {
                ":rsc_id": new.rsc_id,
                ":type": new.idn_type,
                ":key": new.key,
                ":is_unique": is_unique,
                ":is_verified": new.is_verified,
                ":verify_key": new.verify_key,
                ":propb": propb,
                ":now": now,
            },
        )
        .map_err(sqlite_error)?;
        Ok(conn.last_insert_rowid())
    }

    /// Replace key and hash of the username/password identity, marking it verified.
    pub fn update_username_pw(
        &self,
        rsc_id: ResourceId,
        key: &str,
        propb: &JsonValue,
    ) -> Result<usize, OperationError> {
        let propb = propb_to_text(Some(propb))?;
        self.get_conn()?
            .execute(
                &format!(
                    r#"UPDATE {}.identity SET "key" = :key, propb = :propb, is_verified = 1, modified = :now
                    WHERE rsc_id = :rsc_id AND "type" = :type"#,
                    self.get_db_name()
                ),
                named_params! {
                    ":key": key,
                    ":propb": propb,
                    ":now": now_unix(),
                    ":rsc_id": rsc_id,
                    ":type": IDENTITY_TYPE_USERNAME_PW,
                },
            )
            .map_err(sqlite_error)
    }

    pub fn update_key_by_type(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
    ) -> Result<usize, OperationError> {
        self.get_conn()?
            .execute(
                &format!(
                    r#"UPDATE {}.identity SET "key" = :key, modified = :now
                    WHERE rsc_id = :rsc_id AND "type" = :type"#,
                    self.get_db_name()
                ),
                named_params! {
                    ":key": key,
                    ":now": now_unix(),
                    ":rsc_id": rsc_id,
                    ":type": idn_type,
                },
            )
            .map_err(sqlite_error)
    }

    /// Overwrite the key (and propb when given) of every identity of the type on a resource.
    pub fn update_by_type(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
        propb: Option<&JsonValue>,
    ) -> Result<usize, OperationError> {
        let propb = propb_to_text(propb)?;
        self.get_conn()?
            .execute(
                &format!(
                    r#"UPDATE {}.identity SET "key" = :key, propb = COALESCE(:propb, propb), modified = :now
                    WHERE rsc_id = :rsc_id AND "type" = :type"#,
                    self.get_db_name()
                ),
                named_params! {
                    ":key": key,
                    ":propb": propb,
                    ":now": now_unix(),
                    ":rsc_id": rsc_id,
                    ":type": idn_type,
                },
            )
            .map_err(sqlite_error)
    }

    pub fn update_propb(&self, id: IdentityId, propb: &JsonValue) -> Result<usize, OperationError> {
        let propb = propb_to_text(Some(propb))?;
        self.get_conn()?
            .execute(
                &format!(
                    "UPDATE {}.identity SET propb = :propb, modified = :now WHERE id = :id",
                    self.get_db_name()
                ),
                named_params! { ":propb": propb, ":now": now_unix(), ":id": id },
            )
            .map_err(sqlite_error)
    }

    /// Mark verified and consume any pending verification key.
    pub fn set_verified_id(&self, id: IdentityId) -> Result<usize, OperationError> {
        self.get_conn()?
            .execute(
                &format!(
                    "UPDATE {}.identity SET is_verified = 1, verify_key = NULL, modified = :now WHERE id = :id",
                    self.get_db_name()
                ),
                named_params! { ":now": now_unix(), ":id": id },
            )
            .map_err(sqlite_error)
    }

    pub fn set_verified_type_key(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
    ) -> Result<usize, OperationError> {
        self.get_conn()?
            .execute(
                &format!(
                    r#"UPDATE {}.identity SET is_verified = 1, verify_key = NULL, modified = :now
                    WHERE rsc_id = :rsc_id AND "type" = :type AND "key" = :key"#,
                    self.get_db_name()
                ),
                named_params! {
                    ":now": now_unix(),
                    ":rsc_id": rsc_id,
                    ":type": idn_type,
                    ":key": key,
                },
            )
            .map_err(sqlite_error)
    }

    pub fn set_verify_key(&self, id: IdentityId, verify_key: &str) -> Result<usize, OperationError> {
        self.get_conn()?
            .execute(
                &format!(
                    "UPDATE {}.identity SET verify_key = :verify_key, modified = :now WHERE id = :id",
                    self.get_db_name()
                ),
                named_params! { ":verify_key": verify_key, ":now": now_unix(), ":id": id },
            )
            .map_err(sqlite_error)
    }

    pub fn touch_visited(&self, rsc_id: ResourceId, idn_type: &str) -> Result<usize, OperationError> {
        self.get_conn()?
            .execute(
                &format!(
                    r#"UPDATE {}.identity SET visited = :now WHERE rsc_id = :rsc_id AND "type" = :type"#,
                    self.get_db_name()
                ),
                named_params! { ":now": now_unix(), ":rsc_id": rsc_id, ":type": idn_type },
            )
            .map_err(sqlite_error)
    }

    pub fn delete_identity(&self, id: IdentityId) -> Result<usize, OperationError> {
        self.get_conn()?
            .execute(
                &format!("DELETE FROM {}.identity WHERE id = :id", self.get_db_name()),
                named_params! { ":id": id },
            )
            .map_err(sqlite_error)
    }

    pub fn delete_rsc_type(&self, rsc_id: ResourceId, idn_type: &str) -> Result<usize, OperationError> {
        self.get_conn()?
            .execute(
                &format!(
                    r#"DELETE FROM {}.identity WHERE rsc_id = :rsc_id AND "type" = :type"#,
                    self.get_db_name()
                ),
                named_params! { ":rsc_id": rsc_id, ":type": idn_type },
            )
            .map_err(sqlite_error)
    }

    pub fn delete_rsc_type_key(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
    ) -> Result<usize, OperationError> {
        self.get_conn()?
            .execute(
                &format!(
                    r#"DELETE FROM {}.identity WHERE rsc_id = :rsc_id AND "type" = :type AND "key" = :key"#,
                    self.get_db_name()
                ),
                named_params! { ":rsc_id": rsc_id, ":type": idn_type, ":key": key },
            )
            .map_err(sqlite_error)
    }

    /// Move every identity of `loser` onto `winner`. Keys the winner already holds, and the
    /// loser's login identities when the winner has its own, are dropped instead.
    pub fn merge_rsc(&self, winner: ResourceId, loser: ResourceId) -> Result<usize, OperationError> {
        let db_name = self.get_db_name();
        let conn = self.get_conn()?;

        let dup = conn
            .execute(
                &format!(
                    r#"DELETE FROM {db_name}.identity WHERE rsc_id = :loser AND EXISTS (
                        SELECT 1 FROM {db_name}.identity AS w
                        WHERE w.rsc_id = :winner AND w."type" = identity."type" AND w."key" = identity."key"
                    )"#
                ),
                named_params! { ":loser": loser, ":winner": winner },
            )
            .map_err(sqlite_error)?;

        let winner_has_login = self.exists_rsc_type(winner, IDENTITY_TYPE_USERNAME_PW)?;
        let mut login = 0;
        if winner_has_login {
            login += self.delete_rsc_type(loser, IDENTITY_TYPE_USERNAME_PW)?;
        }
        login += self.delete_rsc_type(loser, IDENTITY_TYPE_REMEMBERME)?;

        let moved = conn
            .execute(
                &format!(
                    "UPDATE {db_name}.identity SET rsc_id = :winner, modified = :now WHERE rsc_id = :loser"
                ),
                named_params! { ":winner": winner, ":now": now_unix(), ":loser": loser },
            )
            .map_err(sqlite_error)?;

        trace!(%dup, %login, %moved, "merged identities");
        Ok(dup + login + moved)
    }

    fn set_db_version_key(&self, key: &str, v: i64) -> Result<(), OperationError> {
        self.get_conn()?
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO {}.db_version (id, version) VALUES(:id, :version)",
                    self.get_db_name()
                ),
                named_params! {
                    ":id": &key,
                    ":version": v,
                },
            )
            .map(|_| ())
            .map_err(|e| {
                admin_error!(
                    immediate = true,
                    ?e,
                    "CRITICAL: rusqlite error in set_db_version_key"
                );
                OperationError::SqliteError
            })
    }

    pub fn setup(&self) -> Result<(), OperationError> {
        // If the db_name is NOT main, we MAY need to create it as we are in
        // a test!
        trace!(db_name = %self.get_db_name(), "setup");
        if self.get_db_name() != "main" {
            warn!("Using non-default db-name - this database content WILL be lost!");
            self.get_conn()?
                .execute(&format!("ATTACH DATABASE '' AS {}", self.get_db_name()), [])
                .map_err(sqlite_error)?;
        };

        self.get_conn()?
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {}.db_version (
                    id TEXT PRIMARY KEY,
                    version INTEGER
                )
                ",
                    self.get_db_name()
                ),
                [],
            )
            .map_err(sqlite_error)?;

        let dbv_identity = self.get_db_version_key(DBV_IDENTITY)?;
        trace!(%dbv_identity);

        if dbv_identity == 0 {
            // is_unique is 1 or NULL: NULLs are distinct, so only unique rows are
            // constrained on (type, key).
            self.get_conn()?
                .execute_batch(&format!(
                    r#"CREATE TABLE IF NOT EXISTS {db}.identity (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        rsc_id INTEGER NOT NULL,
                        "type" TEXT NOT NULL,
                        "key" TEXT NOT NULL,
                        is_unique INTEGER,
                        is_verified INTEGER NOT NULL DEFAULT 0,
                        verify_key TEXT,
                        propb TEXT,
                        visited INTEGER,
                        modified INTEGER NOT NULL,
                        created INTEGER NOT NULL,
                        CONSTRAINT identity_type_key_unique UNIQUE ("type", "key", is_unique),
                        CONSTRAINT identity_verify_key_unique UNIQUE (verify_key)
                    );
                    CREATE INDEX IF NOT EXISTS {db}.identity_rsc_type_key ON identity (rsc_id, "type", "key");
                    CREATE INDEX IF NOT EXISTS {db}.identity_type_key ON identity ("type", "key");
                    "#,
                    db = self.get_db_name()
                ))
                .map_err(sqlite_error)?;
            self.set_db_version_key(DBV_IDENTITY, SYSTEM_IDENTITY_VERSION)?;
            admin_debug!(version = %SYSTEM_IDENTITY_VERSION, "identity table created");
        }

        Ok(())
    }
}

impl IdentitySqlite {
    pub fn new(cfg: &BackendConfig) -> Result<Self, OperationError> {
        if cfg.path.is_empty() {
            debug_assert!(cfg.pool_size == 1);
        }
        let mut flags = OpenFlags::default();

        if cfg!(test) {
            flags.insert(OpenFlags::SQLITE_OPEN_NO_MUTEX);
        };

        let fs_page_size = cfg.fstype as u32;
        let checkpoint_pages = cfg.fstype.checkpoint_pages();

        // Page size has to be set before the first table exists to take effect.
        if !cfg.path.is_empty() {
            let vconn =
                Connection::open_with_flags(cfg.path.as_str(), flags).map_err(sqlite_error)?;

            vconn
                .execute_batch(
                    format!(
                        "PRAGMA page_size={fs_page_size};
                         PRAGMA journal_mode=WAL;
                         PRAGMA wal_autocheckpoint={checkpoint_pages};
                         PRAGMA wal_checkpoint(RESTART);"
                    )
                    .as_str(),
                )
                .map_err(sqlite_error)?;
        }

        let pool = (0..cfg.pool_size)
            .map(|i| {
                trace!("Opening Connection {}", i);
                let conn =
                    Connection::open_with_flags(cfg.path.as_str(), flags).map_err(|err| {
                        admin_error!(
                            "Failed to start database connection, cannot start! {:?}",
                            err
                        );
                        sqlite_error(err)
                    })?;
                // Writers queue on the file lock rather than failing with SQLITE_BUSY.
                conn.busy_timeout(DB_BUSY_TIMEOUT).map_err(sqlite_error)?;
                Ok(conn)
            })
            .collect::<Result<VecDeque<Connection>, OperationError>>()
            .map_err(|e| {
                error!(err = ?e, "Failed to build connection pool");
                e
            })?;

        let idlayer = IdentitySqlite {
            pool: Arc::new(IdentitySqlitePool::new(pool)),
            db_name: cfg.db_name,
        };

        let txn = idlayer.write()?;
        txn.setup()?;
        txn.commit()?;

        Ok(idlayer)
    }

    pub fn read(&self) -> Result<IdentitySqliteReadTransaction, OperationError> {
        let conn = self.pool.take()?;
        IdentitySqliteReadTransaction::new(self.pool.clone(), conn, self.db_name)
    }

    pub fn write(&self) -> Result<IdentitySqliteWriteTransaction, OperationError> {
        let conn = self.pool.take()?;
        IdentitySqliteWriteTransaction::new(self.pool.clone(), conn, self.db_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_idn<'a>(rsc_id: ResourceId, idn_type: &'a str, key: &'a str, unique: bool) -> DbIdentityNew<'a> {
        DbIdentityNew {
            rsc_id,
            idn_type,
            key,
            is_unique: unique,
            is_verified: false,
            verify_key: None,
            propb: None,
        }
    }

    #[test]
    fn test_identity_sqlite_setup_is_idempotent() {
        sketching::test_init();
        let cfg = BackendConfig::new_test("main");
        let idl = IdentitySqlite::new(&cfg).expect("setup");
        let txn = idl.write().expect("write");
        txn.setup().expect("second setup");
        assert_eq!(
            txn.get_db_version_key(DBV_IDENTITY),
            Ok(SYSTEM_IDENTITY_VERSION)
        );
        txn.commit().expect("commit");
    }

    #[test]
    fn test_identity_sqlite_unique_constraint() {
        sketching::test_init();
        let cfg = BackendConfig::new_test("main");
        let idl = IdentitySqlite::new(&cfg).expect("setup");
        let txn = idl.write().expect("write");

        txn.insert_identity(&new_idn(10, "email", "a@example.com", true))
            .expect("first unique insert");
        // The constraint itself rejects a second unique holder.
        assert_eq!(
            txn.insert_identity(&new_idn(11, "email", "a@example.com", true)),
            Err(OperationError::DuplicateKey)
        );
        // Non-unique rows are unconstrained.
        txn.insert_identity(&new_idn(11, "email", "a@example.com", false))
            .expect("non-unique insert");
        txn.insert_identity(&new_idn(12, "email", "a@example.com", false))
            .expect("non-unique insert");

        assert_eq!(
            txn.get_all_by_type_key("email", "a@example.com")
                .expect("query")
                .len(),
            3
        );
        let holder = txn
            .get_by_type_key("email", "a@example.com")
            .expect("query")
            .expect("holder");
        assert_eq!(holder.rsc_id, 10);
        assert!(holder.is_unique);
        txn.commit().expect("commit");
    }

    #[test]
    fn test_identity_sqlite_rollback_on_drop() {
        sketching::test_init();
        let cfg = BackendConfig::new_test("main");
        let idl = IdentitySqlite::new(&cfg).expect("setup");
        {
            let txn = idl.write().expect("write");
            txn.insert_identity(&new_idn(10, "email", "a@example.com", true))
                .expect("insert");
            // dropped, not committed
        }
        let r = idl.read().expect("read");
        assert!(r.get_rsc_identities(10).expect("query").is_empty());
    }

    #[test]
    fn test_identity_sqlite_merge() {
        sketching::test_init();
        let cfg = BackendConfig::new_test("main");
        let idl = IdentitySqlite::new(&cfg).expect("setup");
        let txn = idl.write().expect("write");
        txn.insert_identity(&new_idn(10, IDENTITY_TYPE_USERNAME_PW, "jane", true))
            .expect("insert");
        txn.insert_identity(&new_idn(10, "email", "jane@example.com", false))
            .expect("insert");
        txn.insert_identity(&new_idn(20, IDENTITY_TYPE_USERNAME_PW, "jane2", true))
            .expect("insert");
        txn.insert_identity(&new_idn(20, "email", "jane@example.com", false))
            .expect("insert");
        txn.insert_identity(&new_idn(20, "github", "12345", true))
            .expect("insert");

        txn.merge_rsc(10, 20).expect("merge");

        assert!(txn.get_rsc_identities(20).expect("query").is_empty());
        let types: Vec<_> = txn
            .get_rsc_identities(10)
            .expect("query")
            .into_iter()
            .map(|i| (i.idn_type, i.key))
            .collect();
        assert_eq!(
            types,
            vec![
                ("email".to_string(), "jane@example.com".to_string()),
                ("github".to_string(), "12345".to_string()),
                (IDENTITY_TYPE_USERNAME_PW.to_string(), "jane".to_string()),
            ]
        );
        txn.commit().expect("commit");
    }

    #[test]
    fn test_identity_sqlite_pool_waits_for_connection() {
        sketching::test_init();
        let cfg = BackendConfig::new_test("main");
        let idl = IdentitySqlite::new(&cfg).expect("setup");

        let held = idl.read().expect("read");
        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let txn = idl.write()?;
                txn.insert_identity(&new_idn(10, "email", "a@example.com", false))?;
                txn.commit()
            });
            std::thread::sleep(std::time::Duration::from_millis(50));
            // The only connection is still checked out.
            assert!(!waiter.is_finished());
            drop(held);
            assert_eq!(waiter.join().expect("writer thread"), Ok(()));
        });

        let r = idl.read().expect("read");
        assert_eq!(r.get_rsc_identities(10).expect("query").len(), 1);
    }
}

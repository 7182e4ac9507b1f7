use std::convert::TryFrom;

use crate::identity::IdentityRecord;
use crate::prelude::*;

/// The raw shape of an identity row as sqlite returns it. Timestamps are unix seconds,
/// booleans are nullable integers and propb is JSON text.
#[derive(Debug)]
pub struct DbIdentity {
    pub id: i64,
    pub rsc_id: i64,
    pub idn_type: String,
    pub key: String,
    pub is_unique: Option<bool>,
    pub is_verified: bool,
    pub verify_key: Option<String>,
    pub propb: Option<String>,
    pub visited: Option<i64>,
    pub modified: i64,
    pub created: i64,
}

pub const DB_IDENTITY_COLUMNS: &str = r#"id, rsc_id, "type", "key", is_unique, is_verified, verify_key, propb, visited, modified, created"#;

impl DbIdentity {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(DbIdentity {
            id: row.get(0)?,
            rsc_id: row.get(1)?,
            idn_type: row.get(2)?,
            key: row.get(3)?,
            is_unique: row.get(4)?,
            is_verified: row.get(5)?,
            verify_key: row.get(6)?,
            propb: row.get(7)?,
            visited: row.get(8)?,
            modified: row.get(9)?,
            created: row.get(10)?,
        })
    }
}

fn from_unix(ts: i64) -> Result<OffsetDateTime, OperationError> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|e| {
        admin_error!(?e, %ts, "Invalid timestamp in identity row");
        OperationError::InvalidEntryState
    })
}

impl TryFrom<DbIdentity> for IdentityRecord {
    type Error = OperationError;

    fn try_from(value: DbIdentity) -> Result<Self, Self::Error> {
        if value.id <= 0 || value.key.is_empty() {
            admin_error!(id = %value.id, "Corrupt identity row");
            return Err(OperationError::InvalidEntryState);
        }

        let propb = value
            .propb
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(super::serde_json_error)?;

        Ok(IdentityRecord {
            id: value.id,
            rsc_id: value.rsc_id,
            idn_type: value.idn_type,
            key: value.key,
            is_unique: value.is_unique.unwrap_or(false),
            is_verified: value.is_verified,
            verify_key: value.verify_key,
            propb,
            visited: value.visited.map(from_unix).transpose()?,
            modified: from_unix(value.modified)?,
            created: from_unix(value.created)?,
        })
    }
}

/// An identity about to be inserted.
pub struct DbIdentityNew<'a> {
    pub rsc_id: ResourceId,
    pub idn_type: &'a str,
    pub key: &'a str,
    pub is_unique: bool,
    pub is_verified: bool,
    pub verify_key: Option<&'a str>,
    pub propb: Option<&'a JsonValue>,
}

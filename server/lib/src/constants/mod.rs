// Re-export as needed

pub mod names;

pub use crate::constants::names::*;

use std::time::Duration;

use crate::identity::ResourceId;

// How long a caller waits for a pooled connection, and then for sqlite's file lock.
pub const DB_POOL_WAIT: Duration = Duration::from_secs(30);
pub const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(15);

// Increment this as the identity table changes.
pub const SYSTEM_IDENTITY_VERSION: i64 = 1;

/// The built-in administrator. Its credentials live in configuration, never in the table.
pub const RESOURCE_ID_ADMIN: ResourceId = 1;
pub const ADMIN_USERNAME: &str = "admin";

// Identity types this crate gives meaning to. Anything else is opaque.
pub const IDENTITY_TYPE_USERNAME_PW: &str = "username_pw";
pub const IDENTITY_TYPE_EMAIL: &str = "email";
pub const IDENTITY_TYPE_REMEMBERME: &str = "rememberme";

// Resource properties read or written through the property store.
pub const PROPERTY_EMAIL: &str = "email";
pub const PROPERTY_NAME_FIRST: &str = "name_first";
pub const PROPERTY_NAME_SURNAME: &str = "name_surname";
pub const PROPERTY_TITLE: &str = "title";
pub const PROPERTY_CREATOR_ID: &str = "creator_id";

/// Module whose "use" permission allows managing other people's credentials.
pub const MOD_ADMIN_IDENTITY: &str = "mod_admin_identity";

// Random tokens (remember-me, verification keys). Each retry widens the token.
pub const TOKEN_LEN: usize = 32;
pub const TOKEN_LEN_STEP: usize = 8;
pub const TOKEN_MAX_ATTEMPTS: usize = 8;

// Username generation.
pub const USERNAME_MAX_LEN: usize = 32;
pub const USERNAME_SEPARATOR: char = '.';
pub const USERNAME_SUFFIX_BASE: u64 = 10;
pub const USERNAME_MAX_ATTEMPTS: usize = 12;
pub const USERNAME_RANDOM_LEN: usize = 6;

// Generated passwords for accounts that never chose one.
pub const GENERATED_PASSWORD_LEN: usize = 48;

// Fan-out buffer of the in-process notifier.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 1024;

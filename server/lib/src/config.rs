//! The configuration of an identity store, read from a TOML file.
//!
//! ```toml
//! site = "example"
//! db_path = "/var/lib/rscidm/identity.db"
//! db_pool_size = 4
//! db_fs_type = "zfs"
//! admin_password = "changeme"
//! denied_names = ["support", "billing"]
//! ```

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use rscidm_proto::internal::FsType;
use serde::Deserialize;

use crate::be::BackendConfig;

const DEFAULT_DB_POOL_SIZE: u32 = 4;

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct IdentityStoreConfig {
    /// Name of the site, attached to every log line about a failed credential change.
    pub site: String,
    /// Path of the sqlite database. Empty means an in-memory database.
    #[serde(default)]
    pub db_path: String,
    pub db_pool_size: Option<u32>,
    pub db_fs_type: Option<FsType>,
    /// Password of the built-in `admin` account. When unset the admin can't log in.
    pub admin_password: Option<String>,
    /// Extra usernames to refuse, on top of the built-in reserved list.
    #[serde(default)]
    pub denied_names: Vec<String>,
}

impl fmt::Debug for IdentityStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityStoreConfig")
            .field("site", &self.site)
            .field("db_path", &self.db_path)
            .field("db_pool_size", &self.db_pool_size)
            .field("db_fs_type", &self.db_fs_type)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .field("denied_names", &self.denied_names)
            .finish()
    }
}

impl IdentityStoreConfig {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, std::io::Error> {
        let mut f = File::open(config_path.as_ref()).map_err(|e| {
            eprintln!("Unable to open config file [{:?}] 🥺", e);
            e
        })?;

        let mut contents = String::new();
        f.read_to_string(&mut contents).map_err(|e| {
            eprintln!("unable to read contents {:?}", e);
            e
        })?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, std::io::Error> {
        toml::from_str(contents).map_err(|e| {
            eprintln!("unable to parse config {:?}", e);
            std::io::Error::new(std::io::ErrorKind::Other, e)
        })
    }

    /// An in-memory store for tests.
    pub fn new_for_test() -> Self {
        IdentityStoreConfig {
            site: "test".to_string(),
            db_path: String::new(),
            db_pool_size: Some(1),
            db_fs_type: None,
            admin_password: None,
            denied_names: Vec::new(),
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(
            self.db_path.as_str(),
            self.db_pool_size.unwrap_or(DEFAULT_DB_POOL_SIZE),
            self.db_fs_type.unwrap_or_default(),
        )
    }
}

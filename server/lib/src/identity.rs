//! Identity records. An identity binds a typed key (a username, an email address, a token, an
//! external account id) to a resource, optionally carrying an opaque property blob such as a
//! password hash tuple.

use std::fmt;

use crate::prelude::*;

pub type ResourceId = i64;
pub type IdentityId = i64;

/// A committed row of the identity table.
#[derive(Clone, PartialEq)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub rsc_id: ResourceId,
    pub idn_type: String,
    pub key: String,
    pub is_unique: bool,
    pub is_verified: bool,
    pub verify_key: Option<String>,
    pub propb: Option<JsonValue>,
    pub visited: Option<OffsetDateTime>,
    pub modified: OffsetDateTime,
    pub created: OffsetDateTime,
}

// propb can hold password hashes and verify_key is a bearer secret.
impl fmt::Debug for IdentityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRecord")
            .field("id", &self.id)
            .field("rsc_id", &self.rsc_id)
            .field("idn_type", &self.idn_type)
            .field("key", &self.key)
            .field("is_unique", &self.is_unique)
            .field("is_verified", &self.is_verified)
            .field("verify_key", &self.verify_key.as_ref().map(|_| "<redacted>"))
            .field("propb", &self.propb.as_ref().map(|_| "<redacted>"))
            .field("visited", &self.visited)
            .field("modified", &self.modified)
            .field("created", &self.created)
            .finish()
    }
}

impl IdentityRecord {
    pub fn is_type(&self, idn_type: &str) -> bool {
        self.idn_type == idn_type
    }
}

/// Optional attributes supplied when an identity is created.
#[derive(Clone, Default)]
pub struct IdentityProps {
    pub is_unique: bool,
    pub is_verified: bool,
    pub verify_key: Option<String>,
    pub propb: Option<JsonValue>,
}

impl fmt::Debug for IdentityProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityProps")
            .field("is_unique", &self.is_unique)
            .field("is_verified", &self.is_verified)
            .field("verify_key", &self.verify_key.is_some())
            .field("propb", &self.propb.is_some())
            .finish()
    }
}

impl IdentityProps {
    pub fn unique() -> Self {
        IdentityProps {
            is_unique: true,
            ..Default::default()
        }
    }

    pub fn verified(mut self) -> Self {
        self.is_verified = true;
        self
    }

    pub fn with_propb(mut self, propb: JsonValue) -> Self {
        self.propb = Some(propb);
        self
    }

    pub fn with_verify_key(mut self, verify_key: String) -> Self {
        self.verify_key = Some(verify_key);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_debug_redacts_secrets() {
        let now = OffsetDateTime::now_utc();
        let rec = IdentityRecord {
            id: 1,
            rsc_id: 10,
            idn_type: IDENTITY_TYPE_USERNAME_PW.to_string(),
            key: "jane".to_string(),
            is_unique: true,
            is_verified: true,
            verify_key: Some("sekrit-token".to_string()),
            propb: Some(serde_json::json!(["sha512-salted", "c2FsdA", "ZGlnZXN0"])),
            visited: None,
            modified: now,
            created: now,
        };
        let out = format!("{rec:?}");
        assert!(out.contains("jane"));
        assert!(!out.contains("sekrit-token"));
        assert!(!out.contains("sha512-salted"));

        let props = IdentityProps::unique()
            .verified()
            .with_verify_key("sekrit-token".to_string());
        assert!(props.is_unique && props.is_verified);
        assert!(!format!("{props:?}").contains("sekrit-token"));
    }
}

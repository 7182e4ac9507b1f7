//! Per-type rules for identity keys. Every key passes through its type's rule before it is
//! stored or looked up, so `Jane@Example.COM ` and `jane@example.com` are the same identity.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use regex::Regex;

use crate::prelude::*;

lazy_static! {
    // Dot-atom local part, at least one dot in the domain. Keys are lowercased before matching.
    static ref EMAIL_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(
            r"^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)+$"
        ).expect("Invalid email regex")
    };
}

pub trait KeyRule: Send + Sync {
    fn normalize(&self, key: &str) -> String;

    /// Is an already normalized key acceptable?
    fn validate(&self, key: &str) -> bool;
}

/// Keys of unknown types are stored exactly as given.
#[derive(Debug, Default)]
pub struct OpaqueKey;

impl KeyRule for OpaqueKey {
    fn normalize(&self, key: &str) -> String {
        key.to_string()
    }

    fn validate(&self, _key: &str) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct EmailKey;

impl KeyRule for EmailKey {
    fn normalize(&self, key: &str) -> String {
        key.trim().to_lowercase()
    }

    fn validate(&self, key: &str) -> bool {
        EMAIL_RE.is_match(key)
    }
}

#[derive(Debug)]
pub struct UsernameKey {
    reserved: Arc<ReservedNames>,
}

impl KeyRule for UsernameKey {
    fn normalize(&self, key: &str) -> String {
        key.trim().to_lowercase()
    }

    fn validate(&self, key: &str) -> bool {
        !self.reserved.contains(key)
    }
}

/// Names no account may take: the built-in list plus the configured denied names.
#[derive(Debug, Clone)]
pub struct ReservedNames {
    names: HashSet<String>,
}

impl ReservedNames {
    pub fn new(denied_names: &[String]) -> Self {
        let names = RESERVED_USERNAMES
            .iter()
            .map(|n| n.to_string())
            .chain(denied_names.iter().map(|n| n.trim().to_lowercase()))
            .collect();
        ReservedNames { names }
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        name.is_empty() || self.names.contains(&name)
    }
}

pub struct KeyRules {
    rules: HashMap<String, Arc<dyn KeyRule>>,
    opaque: Arc<dyn KeyRule>,
    reserved: Arc<ReservedNames>,
}

impl KeyRules {
    pub fn new(denied_names: &[String]) -> Self {
        let reserved = Arc::new(ReservedNames::new(denied_names));
        let mut rules: HashMap<String, Arc<dyn KeyRule>> = HashMap::new();
        rules.insert(IDENTITY_TYPE_EMAIL.to_string(), Arc::new(EmailKey));
        rules.insert(
            IDENTITY_TYPE_USERNAME_PW.to_string(),
            Arc::new(UsernameKey {
                reserved: reserved.clone(),
            }),
        );
        KeyRules {
            rules,
            opaque: Arc::new(OpaqueKey),
            reserved,
        }
    }

    /// Give a type its own rule, replacing any rule it had.
    pub fn register(&mut self, idn_type: &str, rule: Arc<dyn KeyRule>) {
        debug!(%idn_type, "registered identity key rule");
        self.rules.insert(idn_type.to_string(), rule);
    }

    fn rule(&self, idn_type: &str) -> &dyn KeyRule {
        self.rules
            .get(idn_type)
            .map(|r| r.as_ref())
            .unwrap_or_else(|| self.opaque.as_ref())
    }

    pub fn normalize(&self, idn_type: &str, key: &str) -> String {
        self.rule(idn_type).normalize(key)
    }

    /// Normalize then validate.
    pub fn is_valid(&self, idn_type: &str, key: &str) -> bool {
        let rule = self.rule(idn_type);
        rule.validate(&rule.normalize(key))
    }

    /// Normalize and validate a key that is about to be stored. Empty keys are never stored.
    pub fn prepare(&self, idn_type: &str, key: &str) -> Result<String, OperationError> {
        let rule = self.rule(idn_type);
        let key = rule.normalize(key);
        if key.is_empty() || !rule.validate(&key) {
            request_warn!(%idn_type, "rejected identity key");
            Err(OperationError::InvalidKey)
        } else {
            Ok(key)
        }
    }

    pub fn is_reserved_name(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyrules_email() {
        let rules = KeyRules::new(&[]);
        assert_eq!(
            rules.normalize(IDENTITY_TYPE_EMAIL, "  Jane.Doe@Example.COM "),
            "jane.doe@example.com"
        );
        assert!(rules.is_valid(IDENTITY_TYPE_EMAIL, "Jane.Doe@Example.COM"));
        assert!(rules.is_valid(IDENTITY_TYPE_EMAIL, "a+tag@mail.example.co.uk"));
        assert!(!rules.is_valid(IDENTITY_TYPE_EMAIL, "jane"));
        assert!(!rules.is_valid(IDENTITY_TYPE_EMAIL, "jane@localhost"));
        assert!(!rules.is_valid(IDENTITY_TYPE_EMAIL, "jane@@example.com"));
        assert!(!rules.is_valid(IDENTITY_TYPE_EMAIL, "jane doe@example.com"));
        assert!(!rules.is_valid(IDENTITY_TYPE_EMAIL, ""));
    }

    #[test]
    fn test_keyrules_username() {
        let rules = KeyRules::new(&["Support ".to_string()]);
        assert_eq!(rules.normalize(IDENTITY_TYPE_USERNAME_PW, " Jane "), "jane");
        assert!(rules.is_valid(IDENTITY_TYPE_USERNAME_PW, "jane"));
        assert!(!rules.is_valid(IDENTITY_TYPE_USERNAME_PW, "Admin"));
        assert!(!rules.is_valid(IDENTITY_TYPE_USERNAME_PW, "postmaster"));
        assert!(!rules.is_valid(IDENTITY_TYPE_USERNAME_PW, "support"));
        assert!(rules.is_reserved_name(""));
        assert!(rules.is_reserved_name("ROOT"));
        assert!(!rules.is_reserved_name("jane"));
    }

    #[test]
    fn test_keyrules_opaque_and_registered() {
        let mut rules = KeyRules::new(&[]);
        assert_eq!(rules.normalize("github", " AbC "), " AbC ");
        assert!(rules.is_valid("github", "anything at all"));
        assert_eq!(rules.prepare("github", ""), Err(OperationError::InvalidKey));

        struct Digits;
        impl KeyRule for Digits {
            fn normalize(&self, key: &str) -> String {
                key.trim().to_string()
            }
            fn validate(&self, key: &str) -> bool {
                key.chars().all(|c| c.is_ascii_digit())
            }
        }
        rules.register("github", Arc::new(Digits));
        assert_eq!(rules.prepare("github", " 1234 "), Ok("1234".to_string()));
        assert_eq!(rules.prepare("github", "12a"), Err(OperationError::InvalidKey));
    }
}

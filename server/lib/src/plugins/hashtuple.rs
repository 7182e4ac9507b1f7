// Check passwords stored as this crate's own hash tuples.
use rscidm_lib_crypto::{DbPasswordV1, HashAlgorithm, HashTuple};

use crate::plugins::{PasswordMatch, PasswordMatcher};
use crate::prelude::*;

#[derive(Debug, Default, Clone, Copy)]
pub struct HashTupleMatcher;

impl PasswordMatcher for HashTupleMatcher {
    fn id(&self) -> &'static str {
        "plugin_hash_tuple"
    }

    fn match_password(
        &self,
        rsc_id: ResourceId,
        password: &str,
        stored: &JsonValue,
    ) -> PasswordMatch {
        let Ok(dbpw) = serde_json::from_value::<DbPasswordV1>(stored.clone()) else {
            return PasswordMatch::NoHandler;
        };
        let tuple = HashTuple::from(dbpw);
        if let HashAlgorithm::Other(alg) = tuple.algorithm() {
            debug!(%rsc_id, %alg, "hash tuple with unknown algorithm");
            return PasswordMatch::NoHandler;
        }

        if !tuple.verify(password) {
            PasswordMatch::NoMatch("password mismatch".to_string())
        } else if tuple.requires_upgrade() {
            PasswordMatch::MatchNeedsRehash
        } else {
            PasswordMatch::Match
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(tuple: &HashTuple) -> JsonValue {
        serde_json::to_value(tuple.to_dbpasswordv1()).expect("serialise")
    }

    #[test]
    fn test_hashtuple_matcher() {
        let m = HashTupleMatcher;
        let s = stored(&rscidm_lib_crypto::hash("password"));
        assert_eq!(m.match_password(1, "password", &s), PasswordMatch::Match);
        assert!(matches!(
            m.match_password(1, "Password", &s),
            PasswordMatch::NoMatch(_)
        ));
    }

    #[test]
    fn test_hashtuple_matcher_legacy_rehash() {
        let m = HashTupleMatcher;
        let s = stored(&HashTuple::new_sha1_salted(b"0123456789".to_vec(), "password"));
        assert_eq!(
            m.match_password(1, "password", &s),
            PasswordMatch::MatchNeedsRehash
        );
        assert!(matches!(
            m.match_password(1, "nope", &s),
            PasswordMatch::NoMatch(_)
        ));
    }

    #[test]
    fn test_hashtuple_matcher_foreign() {
        let m = HashTupleMatcher;
        assert_eq!(
            m.match_password(1, "x", &json!({"bcrypt": "$2b$..."})),
            PasswordMatch::NoHandler
        );
        assert_eq!(
            m.match_password(1, "x", &json!(["bcrypt", "c2FsdA", "ZGlnZXN0"])),
            PasswordMatch::NoHandler
        );
    }
}

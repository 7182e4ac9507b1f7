//! Plugins allow the embedding application to take part in password checks. A stored password
//! is an opaque JSON value: the store asks each registered [`PasswordMatcher`] in turn whether it
//! recognises the value, and the first one that does decides the outcome. This is how hashes
//! imported from other systems keep working until the user's next login rehashes them.

use std::sync::Arc;

use crate::prelude::*;

mod hashtuple;

pub use self::hashtuple::HashTupleMatcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordMatch {
    Match,
    /// Correct password stored in a form that should be replaced by a fresh hash.
    MatchNeedsRehash,
    NoMatch(String),
    /// This matcher does not understand the stored value.
    NoHandler,
}

pub trait PasswordMatcher: Send + Sync {
    fn id(&self) -> &'static str;

    fn match_password(
        &self,
        rsc_id: ResourceId,
        password: &str,
        stored: &JsonValue,
    ) -> PasswordMatch;
}

/// Registered matchers, consulted before the built-in hash tuple matcher.
#[derive(Default, Clone)]
pub struct PasswordMatchers {
    matchers: Vec<Arc<dyn PasswordMatcher>>,
    builtin: HashTupleMatcher,
}

impl PasswordMatchers {
    pub fn register(&mut self, matcher: Arc<dyn PasswordMatcher>) {
        debug!(plugin = %matcher.id(), "registered password matcher");
        self.matchers.push(matcher);
    }

    #[instrument(level = "debug", name = "plugins::match_password", skip_all)]
    pub fn match_password(
        &self,
        rsc_id: ResourceId,
        password: &str,
        stored: &JsonValue,
    ) -> PasswordMatch {
        let builtin: &(dyn PasswordMatcher + 'static) = &self.builtin;
        for m in self
            .matchers
            .iter()
            .map(|m| m.as_ref())
            .chain(std::iter::once(builtin))
        {
            match m.match_password(rsc_id, password, stored) {
                PasswordMatch::NoHandler => continue,
                outcome => {
                    trace!(plugin = %m.id(), ?outcome, "password matcher answered");
                    return outcome;
                }
            }
        }
        PasswordMatch::NoHandler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct LegacyMd5;

    impl PasswordMatcher for LegacyMd5 {
        fn id(&self) -> &'static str {
            "plugin_legacy_md5"
        }

        fn match_password(&self, _rsc_id: ResourceId, password: &str, stored: &JsonValue) -> PasswordMatch {
            match stored.get("md5").and_then(JsonValue::as_str) {
                Some(pw) if pw == password => PasswordMatch::MatchNeedsRehash,
                Some(_) => PasswordMatch::NoMatch("md5 mismatch".to_string()),
                None => PasswordMatch::NoHandler,
            }
        }
    }

    #[test]
    fn test_matchers_chain() {
        let mut matchers = PasswordMatchers::default();
        matchers.register(Arc::new(LegacyMd5));

        let stored = json!({"md5": "secret"});
        assert_eq!(
            matchers.match_password(1, "secret", &stored),
            PasswordMatch::MatchNeedsRehash
        );
        assert_eq!(
            matchers.match_password(1, "other", &stored),
            PasswordMatch::NoMatch("md5 mismatch".to_string())
        );

        // Falls through to the builtin.
        let stored = serde_json::to_value(rscidm_lib_crypto::hash("secret").to_dbpasswordv1())
            .expect("serialise");
        assert_eq!(matchers.match_password(1, "secret", &stored), PasswordMatch::Match);

        // Nobody understands this.
        assert_eq!(
            matchers.match_password(1, "secret", &json!({"scrypt": "..."})),
            PasswordMatch::NoHandler
        );
    }
}

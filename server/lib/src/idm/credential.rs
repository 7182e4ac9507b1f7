//! Username/password credentials. A resource is a user when it holds a `username_pw`
//! identity; the identity key is the username and its propb the password hash tuple.

use rscidm_lib_crypto::constant_time_eq;

use crate::be::dbidentity::DbIdentityNew;
use crate::be::{serde_json_error, BackendTransaction};
use crate::idm::verify::replace_remember_me_token;
use crate::prelude::*;
use crate::properties::set_property;
use crate::utils::password_from_random;

fn password_propb(password: &str) -> Result<JsonValue, OperationError> {
    serde_json::to_value(rscidm_lib_crypto::hash(password).to_dbpasswordv1())
        .map_err(serde_json_error)
}

impl IdentityStore {
    /// Give the resource a username and password, replacing any it had. The account's
    /// remember-me token is reset in the same transaction, so existing "remember me" sessions
    /// end exactly when the new credentials take effect.
    #[instrument(level = "debug", skip_all)]
    pub fn set_username_password(
        &self,
        caller: &Caller,
        rsc_id: ResourceId,
        username: &str,
        password: &str,
    ) -> Result<(), OperationError> {
        self.guard_admin(rsc_id)?;
        self.check_credentials_access(caller, rsc_id)?;

        let username = self.key_rules.normalize(IDENTITY_TYPE_USERNAME_PW, username);
        match self.set_username_password_inner(rsc_id, &username, password) {
            Ok(()) => {
                security_info!(%rsc_id, %username, "username/password set, remember-me token reset");
                self.publish(rsc_id, IDENTITY_TYPE_USERNAME_PW);
                self.publish(rsc_id, IDENTITY_TYPE_REMEMBERME);
                self.properties.invalidate(rsc_id);
                Ok(())
            }
            Err(err) => {
                admin_error!(site = %self.site, %rsc_id, %username, ?err, "Could not set username/password");
                Err(err)
            }
        }
    }

    fn set_username_password_inner(
        &self,
        rsc_id: ResourceId,
        username: &str,
        password: &str,
    ) -> Result<(), OperationError> {
        if username.is_empty() {
            return Err(OperationError::InvalidKey);
        }
        let propb = password_propb(password)?;

        let created = self.be.transaction(|txn| {
            match txn.get_rsc_identity_by_type(rsc_id, IDENTITY_TYPE_USERNAME_PW)? {
                Some(existing) => {
                    if existing.key != username {
                        if self.key_rules.is_reserved_name(username) {
                            return Err(OperationError::InvalidKey);
                        }
                        if txn.exists_type_key(IDENTITY_TYPE_USERNAME_PW, username, Some(rsc_id))? {
                            return Err(OperationError::DuplicateKey);
                        }
                    }
                    txn.update_username_pw(rsc_id, username, &propb)?;
                    replace_remember_me_token(txn, rsc_id)?;
                    Ok(false)
                }
                None => {
                    if self.key_rules.is_reserved_name(username) {
                        return Err(OperationError::InvalidKey);
                    }
                    if txn.exists_type_key(IDENTITY_TYPE_USERNAME_PW, username, None)? {
                        return Err(OperationError::DuplicateKey);
                    }
                    txn.insert_identity(&DbIdentityNew {
                        rsc_id,
                        idn_type: IDENTITY_TYPE_USERNAME_PW,
                        key: username,
                        is_unique: true,
                        is_verified: true,
                        verify_key: None,
                        propb: Some(&propb),
                    })?;
                    replace_remember_me_token(txn, rsc_id)?;
                    Ok(true)
                }
            }
        })?;

        // A fresh account owns itself unless something else created it.
        if created
            && self
                .properties
                .get_property(rsc_id, PROPERTY_CREATOR_ID)
                .map_or(true, |v| v.is_null())
        {
            set_property(&*self.properties, rsc_id, PROPERTY_CREATOR_ID, rsc_id.into())?;
        }
        Ok(())
    }

    /// Make sure the resource is a user, generating a username and a random password if it
    /// has no credentials yet.
    #[instrument(level = "debug", skip_all)]
    pub fn ensure_username_password(
        &self,
        caller: &Caller,
        rsc_id: ResourceId,
    ) -> Result<(), OperationError> {
        if self.is_user(rsc_id)? {
            return Ok(());
        }
        let username = self.generate_username(rsc_id)?;
        let password = password_from_random();
        self.set_username_password(caller, rsc_id, &username, &password)
    }

    /// Rename the user. The password is unchanged.
    #[instrument(level = "debug", skip_all)]
    pub fn set_username(
        &self,
        caller: &Caller,
        rsc_id: ResourceId,
        username: &str,
    ) -> Result<(), OperationError> {
        self.guard_admin(rsc_id)?;
        self.check_credentials_access(caller, rsc_id)?;

        let username = self.key_rules.normalize(IDENTITY_TYPE_USERNAME_PW, username);
        let res = if username.is_empty() || self.key_rules.is_reserved_name(&username) {
            Err(OperationError::InvalidKey)
        } else {
            self.be.transaction(|txn| {
                if txn.exists_type_key(IDENTITY_TYPE_USERNAME_PW, &username, Some(rsc_id))? {
                    return Err(OperationError::DuplicateKey);
                }
                match txn.update_key_by_type(rsc_id, IDENTITY_TYPE_USERNAME_PW, &username)? {
                    0 => Err(OperationError::NotFound),
                    _ => Ok(()),
                }
            })
        };

        match res {
            Ok(()) => {
                security_info!(%rsc_id, %username, "username changed");
                self.publish(rsc_id, IDENTITY_TYPE_USERNAME_PW);
                self.properties.invalidate(rsc_id);
                Ok(())
            }
            Err(err) => {
                admin_error!(site = %self.site, %rsc_id, %username, ?err, "Could not set username");
                Err(err)
            }
        }
    }

    /// Remove the credentials of a user, and with them every remember-me token.
    #[instrument(level = "debug", skip_all)]
    pub fn delete_username(&self, caller: &Caller, rsc_id: ResourceId) -> Result<(), OperationError> {
        self.guard_admin(rsc_id)?;
        self.check_credentials_access(caller, rsc_id)?;

        let removed = self.be.transaction(|txn| {
            Ok(txn.delete_rsc_type(rsc_id, IDENTITY_TYPE_USERNAME_PW)?
                + txn.delete_rsc_type(rsc_id, IDENTITY_TYPE_REMEMBERME)?)
        })?;
        if removed > 0 {
            security_info!(%rsc_id, "username/password removed");
            self.publish(rsc_id, IDENTITY_TYPE_USERNAME_PW);
            self.properties.invalidate(rsc_id);
        }
        Ok(())
    }

    /// Authenticate. The name is tried as a username first, then, when it looks like an email
    /// address, against the accounts of every resource with that email identity.
    #[instrument(level = "debug", skip_all)]
    pub fn check_username_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<ResourceId, OperationError> {
        let username = self.key_rules.normalize(IDENTITY_TYPE_USERNAME_PW, username);
        if username == ADMIN_USERNAME {
            return self.check_admin_password(password);
        }

        let (direct, candidates) = {
            let txn = self.be.read()?;
            match txn.get_by_type_key(IDENTITY_TYPE_USERNAME_PW, &username)? {
                Some(idn) => (true, vec![idn]),
                None if self.key_rules.is_valid(IDENTITY_TYPE_EMAIL, &username) => {
                    let email = self.key_rules.normalize(IDENTITY_TYPE_EMAIL, &username);
                    (false, txn.get_logins_by_email(&email)?)
                }
                None => (false, Vec::new()),
            }
        };

        if candidates.is_empty() {
            security_info!(%username, "authentication failed, no such user");
            return Err(OperationError::NoSuchUser);
        }

        for idn in candidates {
            let Some(stored) = idn.propb.as_ref() else {
                security_info!(rsc_id = %idn.rsc_id, "account has no password");
                continue;
            };
            match self.matchers.match_password(idn.rsc_id, password, stored) {
                PasswordMatch::Match => {}
                PasswordMatch::MatchNeedsRehash => {
                    // The password was right. A failed upgrade leaves the old hash in place.
                    if let Err(err) = self.upgrade_password(&idn, password) {
                        admin_warn!(rsc_id = %idn.rsc_id, ?err, "Password hash upgrade failed");
                    }
                }
                PasswordMatch::NoMatch(reason) => {
                    security_info!(rsc_id = %idn.rsc_id, %reason, "password did not match");
                    continue;
                }
                PasswordMatch::NoHandler => {
                    security_error!(rsc_id = %idn.rsc_id, "no password matcher understands the stored password");
                    continue;
                }
            }
            self.set_visited(idn.rsc_id)?;
            security_info!(rsc_id = %idn.rsc_id, "authentication success");
            return Ok(idn.rsc_id);
        }

        if direct {
            Err(OperationError::PasswordMismatch)
        } else {
            Err(OperationError::NoSuchUser)
        }
    }

    fn check_admin_password(&self, password: &str) -> Result<ResourceId, OperationError> {
        match self.admin_password.as_deref() {
            Some(expected)
                if !expected.is_empty()
                    && constant_time_eq(expected.as_bytes(), password.as_bytes()) =>
            {
                self.set_visited(RESOURCE_ID_ADMIN)?;
                security_info!("admin authentication success");
                Ok(RESOURCE_ID_ADMIN)
            }
            _ => {
                security_info!("admin authentication failed");
                Err(OperationError::PasswordMismatch)
            }
        }
    }

    fn upgrade_password(&self, idn: &IdentityRecord, password: &str) -> Result<(), OperationError> {
        admin_info!(rsc_id = %idn.rsc_id, "Processing password hash upgrade");
        let propb = password_propb(password)?;
        match self.be.transaction(|txn| txn.update_propb(idn.id, &propb))? {
            0 => Err(OperationError::NotFound),
            _ => Ok(()),
        }
    }

    /// Record a login. The admin's visits land on its seeded login row.
    pub fn set_visited(&self, rsc_id: ResourceId) -> Result<(), OperationError> {
        self.be
            .transaction(|txn| txn.touch_visited(rsc_id, IDENTITY_TYPE_USERNAME_PW))?;
        Ok(())
    }

    pub fn is_user(&self, rsc_id: ResourceId) -> Result<bool, OperationError> {
        if rsc_id == RESOURCE_ID_ADMIN {
            return Ok(true);
        }
        self.be
            .read()?
            .exists_rsc_type(rsc_id, IDENTITY_TYPE_USERNAME_PW)
    }

    pub fn get_username(&self, rsc_id: ResourceId) -> Result<Option<String>, OperationError> {
        if rsc_id == RESOURCE_ID_ADMIN {
            return Ok(Some(ADMIN_USERNAME.to_string()));
        }
        Ok(self
            .be
            .read()?
            .get_rsc_identity_by_type(rsc_id, IDENTITY_TYPE_USERNAME_PW)?
            .map(|idn| idn.key))
    }

    pub fn lookup_by_username(&self, username: &str) -> Result<Option<IdentityRecord>, OperationError> {
        let username = self.key_rules.normalize(IDENTITY_TYPE_USERNAME_PW, username);
        self.be
            .read()?
            .get_by_type_key(IDENTITY_TYPE_USERNAME_PW, &username)
    }
}

#[cfg(test)]
mod tests {
    use crate::be::Backend;
    use crate::config::IdentityStoreConfig;
    use crate::prelude::*;
    use crate::testkit::*;
    use rscidm_lib_crypto::HashTuple;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_credential_set_and_check() {
        let mut ts = setup_test();
        let caller = Caller::from_internal();
        ts.store
            .set_username_password(&caller, 10, " Jane ", "correct horse")
            .expect("set");

        assert_eq!(ts.store.check_username_password("jane", "correct horse"), Ok(10));
        assert_eq!(ts.store.check_username_password("JANE ", "correct horse"), Ok(10));
        assert_eq!(
            ts.store.check_username_password("jane", "wrong"),
            Err(OperationError::PasswordMismatch)
        );
        assert_eq!(
            ts.store.check_username_password("john", "correct horse"),
            Err(OperationError::NoSuchUser)
        );

        assert!(ts.store.is_user(10).expect("is_user"));
        assert!(!ts.store.is_user(11).expect("is_user"));
        assert_eq!(ts.store.get_username(10), Ok(Some("jane".to_string())));

        let idn = ts
            .store
            .lookup_by_username("Jane")
            .expect("lookup")
            .expect("found");
        assert!(idn.is_unique && idn.is_verified);
        assert!(idn.visited.is_some());
        // The stored hash is a tuple, never the cleartext.
        let propb = idn.propb.expect("propb");
        assert!(!propb.to_string().contains("correct horse"));

        // New accounts own themselves.
        assert_eq!(ts.properties.get(10, PROPERTY_CREATOR_ID), Some(json!(10)));
        assert!(ts.properties.invalidated().contains(&10));

        let events = ts.drain_events();
        assert!(events.contains(&IdentityEvent::new(10, IDENTITY_TYPE_USERNAME_PW)));
        assert!(events.contains(&IdentityEvent::new(10, IDENTITY_TYPE_REMEMBERME)));
    }

    #[test]
    fn test_credential_replace_password_and_rename() {
        let ts = setup_test();
        let caller = Caller::from_user(10);
        ts.store
            .set_username_password(&caller, 10, "jane", "first")
            .expect("set");
        ts.store
            .set_username_password(&caller, 10, "jane", "second")
            .expect("replace");
        assert_eq!(
            ts.store.check_username_password("jane", "first"),
            Err(OperationError::PasswordMismatch)
        );
        assert_eq!(ts.store.check_username_password("jane", "second"), Ok(10));

        ts.store.set_username(&caller, 10, "Jane.Doe").expect("rename");
        assert_eq!(ts.store.check_username_password("jane.doe", "second"), Ok(10));
        assert_eq!(
            ts.store.check_username_password("jane", "second"),
            Err(OperationError::NoSuchUser)
        );

        // Renaming someone who has no credentials.
        assert_eq!(
            ts.store.set_username(&Caller::from_internal(), 11, "nobody-yet"),
            Err(OperationError::NotFound)
        );
    }

    #[test]
    fn test_credential_creator_not_overwritten() {
        let ts = setup_test();
        ts.properties.set(10, PROPERTY_CREATOR_ID, json!(3));
        ts.store
            .set_username_password(&Caller::from_internal(), 10, "jane", "pw")
            .expect("set");
        assert_eq!(ts.properties.get(10, PROPERTY_CREATOR_ID), Some(json!(3)));
    }

    #[test]
    fn test_credential_duplicate_username() {
        let ts = setup_test();
        let caller = Caller::from_internal();
        ts.store
            .set_username_password(&caller, 10, "jane", "pw")
            .expect("set");
        assert_eq!(
            ts.store.set_username_password(&caller, 11, "JANE", "pw"),
            Err(OperationError::DuplicateKey)
        );
        ts.store
            .set_username_password(&caller, 11, "john", "pw")
            .expect("set");
        assert_eq!(
            ts.store.set_username_password(&caller, 11, "jane", "pw"),
            Err(OperationError::DuplicateKey)
        );
        assert_eq!(
            ts.store.set_username(&caller, 11, "jane"),
            Err(OperationError::DuplicateKey)
        );
        // Nothing changed.
        assert_eq!(ts.store.check_username_password("john", "pw"), Ok(11));
    }

    #[test]
    fn test_credential_reserved_names() {
        let ts = setup_test_with_config(IdentityStoreConfig {
            denied_names: vec!["support".to_string()],
            ..IdentityStoreConfig::new_for_test()
        });
        let caller = Caller::from_internal();
        for name in ["admin", "Root", " postmaster", "support", "", "   "] {
            assert_eq!(
                ts.store.set_username_password(&caller, 10, name, "pw"),
                Err(OperationError::InvalidKey),
                "{name:?} should be refused"
            );
        }
        assert!(!ts.store.is_user(10).expect("is_user"));

        ts.store
            .set_username_password(&caller, 10, "jane", "pw")
            .expect("set");
        assert_eq!(
            ts.store.set_username(&caller, 10, "abuse"),
            Err(OperationError::InvalidKey)
        );
    }

    #[test]
    fn test_credential_admin_protected() {
        let ts = setup_test();
        let caller = Caller::from_internal();
        assert_eq!(
            ts.store
                .set_username_password(&caller, RESOURCE_ID_ADMIN, "boss", "pw"),
            Err(OperationError::SystemProtectedObject)
        );
        assert_eq!(
            ts.store.set_username(&caller, RESOURCE_ID_ADMIN, "boss"),
            Err(OperationError::SystemProtectedObject)
        );
        assert_eq!(
            ts.store.delete_username(&caller, RESOURCE_ID_ADMIN),
            Err(OperationError::SystemProtectedObject)
        );

        assert_eq!(
            ts.store.check_username_password("Admin", TEST_ADMIN_PASSWORD),
            Ok(RESOURCE_ID_ADMIN)
        );
        assert_eq!(
            ts.store.check_username_password("admin", "guess"),
            Err(OperationError::PasswordMismatch)
        );
        assert!(ts.store.is_user(RESOURCE_ID_ADMIN).expect("is_user"));
        assert_eq!(
            ts.store.get_username(RESOURCE_ID_ADMIN),
            Ok(Some(ADMIN_USERNAME.to_string()))
        );
    }

    #[test]
    fn test_credential_admin_login_records_visit() {
        let ts = setup_test();
        let admin_visited = || {
            ts.store
                .get_rsc_identity(RESOURCE_ID_ADMIN, IDENTITY_TYPE_USERNAME_PW)
                .expect("lookup")
                .expect("admin identity")
                .visited
        };
        assert!(admin_visited().is_none());

        assert_eq!(
            ts.store.check_username_password("admin", "guess"),
            Err(OperationError::PasswordMismatch)
        );
        assert!(admin_visited().is_none());

        assert_eq!(
            ts.store.check_username_password("admin", TEST_ADMIN_PASSWORD),
            Ok(RESOURCE_ID_ADMIN)
        );
        assert!(admin_visited().is_some());
    }

    #[test]
    fn test_credential_admin_without_password() {
        let ts = setup_test_with_config(IdentityStoreConfig::new_for_test());
        assert_eq!(
            ts.store.check_username_password("admin", ""),
            Err(OperationError::PasswordMismatch)
        );
    }

    #[test]
    fn test_credential_access() {
        let ts = setup_test();
        assert_eq!(
            ts.store
                .set_username_password(&Caller::from_user(11), 10, "jane", "pw"),
            Err(OperationError::AccessDenied)
        );
        assert_eq!(
            ts.store
                .set_username_password(&Caller::anonymous(), 10, "jane", "pw"),
            Err(OperationError::AccessDenied)
        );
        ts.acp.grant_module(11, MOD_ADMIN_IDENTITY);
        ts.store
            .set_username_password(&Caller::from_user(11), 10, "jane", "pw")
            .expect("identity admin may set");
    }

    #[test]
    fn test_credential_email_login() {
        let ts = setup_test();
        let caller = Caller::from_internal();
        ts.store
            .set_username_password(&caller, 10, "jane", "pw-jane")
            .expect("set");
        ts.store
            .set_username_password(&caller, 11, "jane2", "pw-jane2")
            .expect("set");
        ts.store
            .insert(10, IDENTITY_TYPE_EMAIL, "shared@example.com", IdentityProps::default())
            .expect("insert");
        ts.store
            .insert(11, IDENTITY_TYPE_EMAIL, "shared@example.com", IdentityProps::default())
            .expect("insert");

        assert_eq!(
            ts.store.check_username_password("Shared@Example.com", "pw-jane2"),
            Ok(11)
        );
        assert_eq!(
            ts.store.check_username_password("shared@example.com", "pw-jane"),
            Ok(10)
        );
        assert_eq!(
            ts.store.check_username_password("shared@example.com", "nope"),
            Err(OperationError::NoSuchUser)
        );
        assert_eq!(
            ts.store.check_username_password("other@example.com", "pw-jane"),
            Err(OperationError::NoSuchUser)
        );
    }

    #[test]
    fn test_credential_legacy_hash_upgraded() {
        let ts = setup_test();
        let legacy = serde_json::to_value(
            HashTuple::new_sha1_salted(b"0123456789".to_vec(), "old-pw").to_dbpasswordv1(),
        )
        .expect("serialise");
        ts.store
            .insert(
                10,
                IDENTITY_TYPE_USERNAME_PW,
                "legacy",
                IdentityProps::unique().verified().with_propb(legacy.clone()),
            )
            .expect("import");

        assert_eq!(ts.store.check_username_password("legacy", "old-pw"), Ok(10));
        let idn = ts
            .store
            .lookup_by_username("legacy")
            .expect("lookup")
            .expect("found");
        let propb = idn.propb.expect("propb");
        assert_ne!(propb, legacy);
        assert_eq!(propb[0], "sha512-salted");
        assert_eq!(ts.store.check_username_password("legacy", "old-pw"), Ok(10));
    }

    struct PlainText;

    impl PasswordMatcher for PlainText {
        fn id(&self) -> &'static str {
            "plugin_plaintext"
        }

        fn match_password(&self, _rsc_id: ResourceId, password: &str, stored: &JsonValue) -> PasswordMatch {
            match stored.get("plain").and_then(JsonValue::as_str) {
                Some(p) if p == password => PasswordMatch::MatchNeedsRehash,
                Some(_) => PasswordMatch::NoMatch("plaintext mismatch".to_string()),
                None => PasswordMatch::NoHandler,
            }
        }
    }

    #[test]
    fn test_credential_password_matcher_plugin() {
        let mut ts = setup_test();
        ts.store = ts.store.with_password_matcher(Arc::new(PlainText));
        ts.store
            .insert(
                10,
                IDENTITY_TYPE_USERNAME_PW,
                "imported",
                IdentityProps::unique().with_propb(json!({"plain": "hunter2"})),
            )
            .expect("import");
        ts.store
            .insert(
                11,
                IDENTITY_TYPE_USERNAME_PW,
                "unknown",
                IdentityProps::unique().with_propb(json!({"argon2": "$argon2id$..."})),
            )
            .expect("import");

        assert_eq!(
            ts.store.check_username_password("imported", "nope"),
            Err(OperationError::PasswordMismatch)
        );
        assert_eq!(ts.store.check_username_password("imported", "hunter2"), Ok(10));
        // Rehashed into a tuple, the plugin is no longer needed.
        let idn = ts
            .store
            .lookup_by_username("imported")
            .expect("lookup")
            .expect("found");
        assert!(idn.propb.expect("propb").is_array());

        // Nobody handles it, so it can never match.
        assert_eq!(
            ts.store.check_username_password("unknown", "$argon2id$..."),
            Err(OperationError::PasswordMismatch)
        );
    }

    // Deletes the login it is asked about, so the rehash that follows has nothing to update.
    struct DeletesOnMatch {
        be: Backend,
    }

    impl PasswordMatcher for DeletesOnMatch {
        fn id(&self) -> &'static str {
            "plugin_deletes_on_match"
        }

        fn match_password(&self, rsc_id: ResourceId, password: &str, stored: &JsonValue) -> PasswordMatch {
            match stored.get("plain").and_then(JsonValue::as_str) {
                Some(p) if p == password => {
                    self.be
                        .transaction(|txn| txn.delete_rsc_type(rsc_id, IDENTITY_TYPE_USERNAME_PW))
                        .expect("delete login");
                    PasswordMatch::MatchNeedsRehash
                }
                _ => PasswordMatch::NoHandler,
            }
        }
    }

    #[test]
    fn test_credential_failed_rehash_still_logs_in() {
        let mut ts = setup_test();
        ts.store
            .insert(
                10,
                IDENTITY_TYPE_USERNAME_PW,
                "imported",
                IdentityProps::unique().with_propb(json!({"plain": "hunter2"})),
            )
            .expect("import");
        let be = ts.store.be.clone();
        ts.store = ts.store.with_password_matcher(Arc::new(DeletesOnMatch { be }));

        assert_eq!(ts.store.check_username_password("imported", "hunter2"), Ok(10));
        assert_eq!(ts.store.lookup_by_username("imported"), Ok(None));
    }

    #[test]
    fn test_credential_change_resets_remember_me_atomically() {
        let mut ts = setup_test();
        let caller = Caller::from_internal();
        ts.store
            .set_username_password(&caller, 10, "jane", "pw")
            .expect("set");
        ts.store
            .set_username_password(&caller, 11, "john", "pw")
            .expect("set");
        let token = ts.store.get_remember_me_token(10).expect("token");
        ts.drain_events();

        // A refused change leaves the token alone.
        assert_eq!(
            ts.store.set_username_password(&caller, 10, "john", "pw2"),
            Err(OperationError::DuplicateKey)
        );
        assert_eq!(ts.store.lookup_by_remember_me_token(&token), Ok(10));
        assert_eq!(ts.store.check_username_password("jane", "pw"), Ok(10));
        assert!(ts.drain_events().is_empty());

        ts.store
            .set_username_password(&caller, 10, "jane", "pw2")
            .expect("set");
        assert_eq!(
            ts.store.lookup_by_remember_me_token(&token),
            Err(OperationError::NotFound)
        );
        let tokens = ts
            .store
            .get_rsc_by_type(10, IDENTITY_TYPE_REMEMBERME)
            .expect("lookup");
        assert_eq!(tokens.len(), 1);
        assert_ne!(tokens[0].key, token);
        assert_eq!(
            ts.drain_events(),
            vec![
                IdentityEvent::new(10, IDENTITY_TYPE_USERNAME_PW),
                IdentityEvent::new(10, IDENTITY_TYPE_REMEMBERME)
            ]
        );
    }

    #[test]
    fn test_credential_ensure_same_name_twice() {
        let ts = setup_test();
        let caller = Caller::from_internal();
        for rsc_id in [10, 11] {
            ts.properties.set(rsc_id, PROPERTY_NAME_FIRST, json!("Jane"));
            ts.properties.set(rsc_id, PROPERTY_NAME_SURNAME, json!("Doe"));
            ts.store
                .ensure_username_password(&caller, rsc_id)
                .expect("ensure");
        }

        assert_eq!(ts.store.get_username(10), Ok(Some("jane.doe".to_string())));
        let second = ts
            .store
            .get_username(11)
            .expect("lookup")
            .expect("username");
        let suffix = second.strip_prefix("jane.doe.").expect("suffixed");
        assert!(suffix.parse::<u64>().is_ok(), "{second}");
        assert!(ts.store.is_user(11).expect("is_user"));
        assert_eq!(ts.properties.get(11, PROPERTY_CREATOR_ID), Some(json!(11)));
    }

    #[test]
    fn test_credential_concurrent_same_username() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ts = setup_test_on_disk(&dir.path().join("identity.db"), 4);
        let caller = Caller::from_internal();

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let (store, caller) = (&ts.store, &caller);
                    s.spawn(move || store.set_username_password(caller, 100 + i, "jane", "pw"))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("set thread"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| *r == Err(OperationError::DuplicateKey)));

        let winner = ts.store.check_username_password("jane", "pw").expect("login");
        assert!((100..108).contains(&winner));
        assert_eq!(
            ts.store
                .lookup_by_type_and_key_multi(IDENTITY_TYPE_USERNAME_PW, "jane")
                .expect("lookup")
                .len(),
            1
        );
    }

    #[test]
    fn test_credential_ensure_and_delete() {
        let ts = setup_test();
        let caller = Caller::from_internal();
        ts.properties.set(10, PROPERTY_NAME_FIRST, json!("Jane"));
        ts.properties.set(10, PROPERTY_NAME_SURNAME, json!("Doe"));

        ts.store.ensure_username_password(&caller, 10).expect("ensure");
        assert_eq!(ts.store.get_username(10), Ok(Some("jane.doe".to_string())));
        // Already a user, nothing changes.
        ts.store.ensure_username_password(&caller, 10).expect("ensure");
        assert_eq!(ts.store.get_username(10), Ok(Some("jane.doe".to_string())));
        let token = ts.store.get_remember_me_token(10).expect("token");

        ts.store.delete_username(&caller, 10).expect("delete");
        assert!(!ts.store.is_user(10).expect("is_user"));
        assert_eq!(
            ts.store.lookup_by_remember_me_token(&token),
            Err(OperationError::NotFound)
        );
        // Deleting again is harmless.
        ts.store.delete_username(&caller, 10).expect("delete");
    }
}

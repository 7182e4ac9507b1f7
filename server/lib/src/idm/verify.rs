//! Verification state and bearer tokens: one-time verify keys that prove control of an
//! identity, and remember-me tokens for persistent logins.

use crate::be::dbidentity::DbIdentityNew;
use crate::be::{BackendTransaction, BackendWriteTransaction};
use crate::prelude::*;
use crate::utils::unique_token;

/// Drop the resource's remember-me tokens and store a new one, inside the caller's transaction.
pub(crate) fn replace_remember_me_token(
    txn: &BackendWriteTransaction,
    rsc_id: ResourceId,
) -> Result<String, OperationError> {
    txn.delete_rsc_type(rsc_id, IDENTITY_TYPE_REMEMBERME)?;
    let token = unique_token(|t| txn.exists_type_key(IDENTITY_TYPE_REMEMBERME, t, None))?;
    txn.insert_identity(&DbIdentityNew {
        rsc_id,
        idn_type: IDENTITY_TYPE_REMEMBERME,
        key: &token,
        is_unique: true,
        is_verified: false,
        verify_key: None,
        propb: None,
    })?;
    Ok(token)
}

impl IdentityStore {
    /// Mark an identity verified and consume its verify key.
    #[instrument(level = "debug", skip_all)]
    pub fn set_verified(&self, id: IdentityId) -> Result<(), OperationError> {
        let idn = self.be.transaction(|txn| {
            let idn = txn.get_identity(id)?.ok_or(OperationError::NotFound)?;
            txn.set_verified_id(id)?;
            Ok(idn)
        })?;
        request_info!(rsc_id = %idn.rsc_id, idn_type = %idn.idn_type, %id, "identity verified");
        self.publish(idn.rsc_id, &idn.idn_type);
        Ok(())
    }

    /// Mark the resource's (type, key) identity verified, recording it first when it is not
    /// known yet. Logins are always verified and are only managed through the credential
    /// operations.
    #[instrument(level = "debug", skip_all)]
    pub fn set_verified_by_value(
        &self,
        rsc_id: ResourceId,
        idn_type: &str,
        key: &str,
    ) -> Result<(), OperationError> {
        self.guard_admin_identity(rsc_id, idn_type)?;
        if idn_type.is_empty() || key.trim().is_empty() || idn_type == IDENTITY_TYPE_USERNAME_PW {
            return Err(OperationError::BadArgument);
        }
        let key = self.key_rules.prepare(idn_type, key)?;

        self.be
            .transaction(|txn| {
                if txn.set_verified_type_key(rsc_id, idn_type, &key)? > 0 {
                    return Ok(());
                }
                txn.insert_identity(&DbIdentityNew {
                    rsc_id,
                    idn_type,
                    key: &key,
                    is_unique: false,
                    is_verified: true,
                    verify_key: None,
                    propb: None,
                })
                .map(|_| ())
            })
            .map_err(|err| {
                admin_error!(site = %self.site, %rsc_id, %idn_type, ?err, "Could not mark identity verified");
                err
            })?;

        self.publish(rsc_id, idn_type);
        Ok(())
    }

    /// Issue a fresh verify key for the identity, replacing any previous one.
    #[instrument(level = "debug", skip_all)]
    pub fn set_verify_key(&self, id: IdentityId) -> Result<String, OperationError> {
        self.be.transaction(|txn| {
            if txn.get_identity(id)?.is_none() {
                return Err(OperationError::NotFound);
            }
            let verify_key = unique_token(|t| txn.exists_verify_key(t))?;
            txn.set_verify_key(id, &verify_key)?;
            Ok(verify_key)
        })
    }

    /// Has the resource proven control of anything besides its own username?
    pub fn is_verified(&self, rsc_id: ResourceId) -> Result<bool, OperationError> {
        self.be.read()?.is_verified_rsc(rsc_id)
    }

    /// Replace every remember-me token of the resource with a new one.
    #[instrument(level = "debug", skip_all)]
    pub fn reset_remember_me_token(&self, rsc_id: ResourceId) -> Result<String, OperationError> {
        let token = self
            .be
            .transaction(|txn| replace_remember_me_token(txn, rsc_id))?;
        security_info!(%rsc_id, "remember-me token reset");
        self.publish(rsc_id, IDENTITY_TYPE_REMEMBERME);
        Ok(token)
    }

    /// The resource's current remember-me token, creating one if it has none.
    pub fn get_remember_me_token(&self, rsc_id: ResourceId) -> Result<String, OperationError> {
        let current = self
            .be
            .read()?
            .get_rsc_identity_by_type(rsc_id, IDENTITY_TYPE_REMEMBERME)?;
        match current {
            Some(idn) => Ok(idn.key),
            None => self.reset_remember_me_token(rsc_id),
        }
    }

    pub fn lookup_by_remember_me_token(&self, token: &str) -> Result<ResourceId, OperationError> {
        if token.is_empty() {
            return Err(OperationError::NotFound);
        }
        self.be
            .read()?
            .get_by_type_key(IDENTITY_TYPE_REMEMBERME, token)?
            .map(|idn| idn.rsc_id)
            .ok_or(OperationError::NotFound)
    }
}
